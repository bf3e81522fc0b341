use clap::Parser;
use training::util::{run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    let args = TrainArgs::parse();
    let run_dir = run_train(&args)?;
    tracing::info!("run finished: {}", run_dir.display());
    Ok(())
}

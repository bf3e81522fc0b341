use anyhow::Context;
use clap::Parser;
use cli_support::{build_log_path, init_logging, run_timestamp, DataDirArgs, LogDirArgs};
use scene_cube::{build_all, CubeBuildConfig, CubeMode, Parallelism};

#[derive(Parser, Debug)]
#[command(name = "build_datacubes", about = "Build scene data cubes from raw imagery")]
struct Args {
    /// Number of parallel jobs (0 = sequential, negative = all cores).
    #[arg(long = "n_jobs", default_value_t = -1, allow_negative_numbers = true)]
    n_jobs: i64,
    #[command(flatten)]
    data: DataDirArgs,
    #[command(flatten)]
    logs: LogDirArgs,
    /// Which cube family to build.
    #[arg(long, value_enum, default_value_t = CubeMode::Planet)]
    mode: CubeMode,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let log_path = build_log_path(&args.logs.log_dir, &run_timestamp());
    init_logging(&log_path)?;

    let config = CubeBuildConfig::new(&args.data.data_dir, args.mode);
    let report = build_all(&config, Parallelism::from_n_jobs(args.n_jobs))
        .with_context(|| format!("building {} cubes", args.mode))?;
    if report.failed() > 0 {
        anyhow::bail!(
            "{} of {} cube jobs failed, see {}",
            report.failed(),
            report.jobs.len(),
            log_path.display()
        );
    }
    Ok(())
}

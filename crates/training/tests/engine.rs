mod common;

use burn::backend::{Autodiff, NdArray};
use burn::optim::AdamWConfig;
use common::{config_yaml, lines, Workspace, TWO_EPOCHS};
use models::Fcn;
use training::checkpoint::CHECKPOINT_DIR;
use training::{prepare_run, run_train, RunConfig, RunSetup, RunState, TrainError, Trainer};

// Force a CPU backend so the tests never need a GPU.
type ADBackend = Autodiff<NdArray<f32>>;
type Model = Fcn<ADBackend>;

fn trainer(
    setup: RunSetup,
) -> Trainer<ADBackend, Model, impl burn::optim::Optimizer<Model, ADBackend>> {
    let device = Default::default();
    let model = Fcn::<ADBackend>::new(setup.config.model.fcn(), &device);
    let optim = AdamWConfig::new().init::<ADBackend, Model>();
    Trainer::new(setup, model, optim, device).unwrap()
}

fn checkpoint_names(run_dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(run_dir.join(CHECKPOINT_DIR))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn two_epoch_phase_writes_checkpoints_and_csv_rows() {
    let ws = Workspace::new();
    let config = config_yaml(
        TWO_EPOCHS,
        "loss_function: BCELoss\nlearning_rate_scheduler: StepLR\nlr_step_size: 10\n",
    );
    let setup = prepare_run(&ws.args("e2e", &config)).unwrap();
    let mut trainer = trainer(setup);
    trainer.run().unwrap();

    assert_eq!(trainer.state(), &RunState::Completed);
    assert_eq!(trainer.epoch(), 2);
    assert_eq!(trainer.learning_rate(), 0.001);

    let run_dir = trainer.run_dir().to_path_buf();
    assert!(run_dir
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("e2e_"));
    assert_eq!(checkpoint_names(&run_dir), ["01.bin", "02.bin"]);

    let train = lines(&run_dir.join("train.csv"));
    assert_eq!(train.len(), 3);
    assert_eq!(train[0], "Epoch,Accuracy,Precision,Recall,F1,IoU,Loss");
    assert!(train[1].starts_with("1,"));
    assert!(train[2].starts_with("2,"));

    let val = lines(&run_dir.join("val.csv"));
    assert_eq!(val.len(), 3);
    assert_eq!(val[0], train[0]);

    // epoch, trn/* and val/* per epoch
    assert_eq!(lines(&run_dir.join("metrics.jsonl")).len(), 6);
    assert!(run_dir.join("train.log").exists());

    let snapshot = RunConfig::load(&run_dir.join("config.yml")).unwrap();
    assert_eq!(snapshot.model.input_channels, 5);
    assert!(snapshot.run_info.is_some());
}

#[test]
fn exponential_schedule_decays_once_per_epoch() {
    let ws = Workspace::new();
    let config = config_yaml(
        TWO_EPOCHS,
        "loss_function: SoftBCEWithLogitsLoss\nlearning_rate_scheduler: ExponentialLR\nlr_gamma: 0.5\n",
    );
    let mut trainer = trainer(prepare_run(&ws.args("exp", &config)).unwrap());
    trainer.run().unwrap();
    assert!((trainer.learning_rate() - 0.001 * 0.25).abs() < 1e-12);
}

#[test]
fn phase_level_loss_overrides_run_level() {
    let ws = Workspace::new();
    let schedule = "  - phase: warmup
    epochs: 1
    loss_function: DiceLoss
    steps:
      - train_on: slump_tiles(train)
  - phase: main
    epochs: 1
    steps:
      - train_on: train
      - validate_on: slump_tiles(val)
";
    let config = config_yaml(schedule, "loss_function: FocalLoss\n");
    let mut trainer = trainer(prepare_run(&ws.args("phases", &config)).unwrap());
    trainer.run().unwrap();
    assert_eq!(checkpoint_names(trainer.run_dir()), ["01.bin", "02.bin"]);
    assert!(trainer.run_dir().join("slump_tiles_val.csv").exists());
    assert!(trainer.loaders().contains("slump_tiles(train)"));
    assert!(trainer.loaders().contains("train"));
}

#[test]
fn validating_on_the_training_set_keeps_train_csv_intact() {
    let ws = Workspace::new();
    let schedule = "  - phase: p1
    epochs: 2
    steps:
      - train_on: train
      - validate_on: train
";
    let config = config_yaml(schedule, "loss_function: BCELoss\n");
    let mut trainer = trainer(prepare_run(&ws.args("self_val", &config)).unwrap());
    trainer.run().unwrap();

    let run_dir = trainer.run_dir();
    let train = lines(&run_dir.join("train.csv"));
    assert_eq!(train.len(), 3);
    assert!(train[1].starts_with("1,"));
    assert!(train[2].starts_with("2,"));
    assert_eq!(lines(&run_dir.join("val_train.csv")).len(), 3);
}

#[test]
fn missing_loss_function_fails_the_run() {
    let ws = Workspace::new();
    let config = config_yaml(TWO_EPOCHS, "");
    let mut trainer = trainer(prepare_run(&ws.args("noloss", &config)).unwrap());
    let err = trainer.run().unwrap_err();
    assert!(err.to_string().contains("loss_function"), "{err}");
    assert!(matches!(trainer.state(), RunState::Failed(_)));
    assert!(checkpoint_names(trainer.run_dir()).is_empty());
}

#[test]
fn unknown_loader_is_fatal() {
    let ws = Workspace::new();
    let schedule = "  - phase: p1
    epochs: 1
    steps:
      - train_on: test
";
    let config = config_yaml(schedule, "loss_function: BCELoss\n");
    let mut trainer = trainer(prepare_run(&ws.args("badloader", &config)).unwrap());
    assert!(matches!(
        trainer.run(),
        Err(TrainError::UnresolvableLoader(name)) if name == "test"
    ));
}

#[test]
fn log_images_renders_one_panel_per_logged_epoch() {
    let ws = Workspace::new();
    let schedule = "  - phase: p1
    epochs: 2
    steps:
      - train_on: train
      - log_images
";
    let config = config_yaml(schedule, "loss_function: JaccardLoss\n");
    let mut trainer = trainer(prepare_run(&ws.args("vis", &config)).unwrap());
    trainer.run().unwrap();
    let dir = trainer.run_dir().join("tile_predictions");
    for tile in ["scene_b_0", "scene_b_3"] {
        let img = image::open(dir.join(format!("{tile}.jpg"))).unwrap();
        // RGB, truth, auxiliary and two epochs of 2x2 panels with 2px gaps.
        assert_eq!((img.width(), img.height()), (5 * 2 + 4 * 2, 2));
    }
}

#[test]
fn resume_by_run_id_loads_the_latest_checkpoint() {
    let ws = Workspace::new();
    let config = config_yaml(TWO_EPOCHS, "loss_function: BCELoss\n");
    let first = run_train(&ws.args("first", &config)).unwrap();
    let run_id = first.file_name().unwrap().to_string_lossy().into_owned();

    let mut args = ws.args("second", &config);
    args.resume = Some(run_id);
    let setup = prepare_run(&args).unwrap();
    assert_eq!(
        setup.resume.as_deref(),
        Some(first.join(CHECKPOINT_DIR).join("02.bin").as_path())
    );
    let run_dir = run_train_from(setup);
    let snapshot = RunConfig::load(&run_dir.join("config.yml")).unwrap();
    assert!(snapshot.resume.unwrap().ends_with("02.bin"));
}

fn run_train_from(setup: RunSetup) -> std::path::PathBuf {
    let device = Default::default();
    let model = Fcn::<ADBackend>::new(setup.config.model.fcn(), &device);
    let model = match &setup.resume {
        Some(path) => training::checkpoint::load_checkpoint::<ADBackend, Model>(model, path, &device)
            .unwrap(),
        None => model,
    };
    let optim = AdamWConfig::new().init::<ADBackend, Model>();
    let mut trainer = Trainer::new(setup, model, optim, device).unwrap();
    trainer.run().unwrap();
    trainer.run_dir().to_path_buf()
}

#[test]
fn missing_resume_path_is_reported() {
    let ws = Workspace::new();
    let config = config_yaml(TWO_EPOCHS, "loss_function: BCELoss\nresume: no_such_run\n");
    let err = prepare_run(&ws.args("resume", &config)).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<TrainError>(),
        Some(TrainError::CheckpointNotFound(_))
    ));
}

#[test]
fn summary_stops_before_training() {
    let ws = Workspace::new();
    let config = config_yaml(TWO_EPOCHS, "loss_function: BCELoss\n");
    let mut args = ws.args("summary", &config);
    args.summary = true;
    let run_dir = run_train(&args).unwrap();
    assert!(run_dir.join("train.log").exists());
    assert!(!run_dir.join(CHECKPOINT_DIR).exists());
    assert!(!run_dir.join("config.yml").exists());
}

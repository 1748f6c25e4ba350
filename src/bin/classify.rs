//! Command line tool to fine-tune the orientation classifier and to classify large corpora

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::anyhow;
use burn::backend::{Autodiff, LibTorch};
use log::{error, info, warn};
use orientx::{
    cli::{Mode, Model},
    datasets::{orientation, Corpus},
    models::bert::text_classification::{self, load_pretrained},
    pipelines::text_classification::{
        checkpoint, Adapter, CsvSink, Engine, InferenceConfig, Trainer, TrainingConfig,
    },
    utils::{
        device::DevicePreference,
        hugging_face::{download_hf_config, download_hf_model, HfTokenizer},
        renderer::LogObserver,
    },
};
use pico_args::Arguments;

const HELP: &str = "\
Usage: classify MODE [OPTIONS]

Arguments:
  MODE                 'train' to fine-tune a classifier, 'inference' to classify a corpus

Options:
  -h, --help           Print help
  -c, --config         JSON file with training or inference settings
  -m, --model          The pretrained model to use (defaults to 'bert-base-uncased')
      --device         'auto', 'cpu' or 'cuda:N' (defaults to 'auto')
      --checkpoint     Checkpoint path (defaults to 'assets/model')

Train options:
      --data           Labelled CSV with label,text columns (defaults to 'assets/training_dataset.csv')
  -n, --epochs         Number of epochs to train for
  -b, --batch-size     Batch size

Inference options:
      --input          CSV with a 'content' column (defaults to 'assets/parsed_tweets.csv')
      --output         Output CSV (defaults to 'assets/classified_tweets.csv')
  -b, --batch-size     Rows per batch
      --flush-threshold
                       Ordered rows to accumulate before appending them to the output
      --workers        Worker threads (defaults to the available parallelism)
";

const DEFAULT_DATA: &str = "assets/training_dataset.csv";
const DEFAULT_CHECKPOINT: &str = "assets/model";
const DEFAULT_INPUT: &str = "assets/parsed_tweets.csv";
const DEFAULT_OUTPUT: &str = "assets/classified_tweets.csv";

/// Exit status used when the run is interrupted with Ctrl-C
const INTERRUPTED: u8 = 130;

#[derive(Debug)]
struct Args {
    mode: Mode,
    config: Option<PathBuf>,
    model: Option<Model>,
    device: DevicePreference,
    checkpoint: PathBuf,
    data: PathBuf,
    input: PathBuf,
    output: PathBuf,
    num_epochs: Option<usize>,
    batch_size: Option<usize>,
    flush_threshold: Option<usize>,
    num_workers: Option<usize>,
}

impl Args {
    fn parse() -> anyhow::Result<Option<Self>> {
        let mut pargs = Arguments::from_env();

        // Help has a higher priority and should be handled separately.
        if pargs.contains(["-h", "--help"]) {
            return Ok(None);
        }

        let model: Option<String> = pargs.opt_value_from_str(["-m", "--model"])?;
        let device: Option<String> = pargs.opt_value_from_str("--device")?;

        let args = Args {
            config: pargs.opt_value_from_str(["-c", "--config"])?,
            model: model.as_deref().map(Model::try_from).transpose()?,
            device: device
                .as_deref()
                .map(DevicePreference::try_from)
                .transpose()?
                .unwrap_or_default(),
            checkpoint: pargs
                .opt_value_from_str("--checkpoint")?
                .unwrap_or_else(|| DEFAULT_CHECKPOINT.into()),
            data: pargs
                .opt_value_from_str("--data")?
                .unwrap_or_else(|| DEFAULT_DATA.into()),
            input: pargs
                .opt_value_from_str("--input")?
                .unwrap_or_else(|| DEFAULT_INPUT.into()),
            output: pargs
                .opt_value_from_str("--output")?
                .unwrap_or_else(|| DEFAULT_OUTPUT.into()),
            num_epochs: pargs.opt_value_from_str(["-n", "--epochs"])?,
            batch_size: pargs.opt_value_from_str(["-b", "--batch-size"])?,
            flush_threshold: pargs.opt_value_from_str("--flush-threshold")?,
            num_workers: pargs.opt_value_from_str("--workers")?,
            mode: {
                let mode: String = pargs.free_from_str().map_err(|e| match e {
                    pico_args::Error::MissingArgument => anyhow!("Missing required argument: MODE"),
                    _ => anyhow!("{}", e),
                })?;

                Mode::try_from(mode.as_str())?
            },
        };

        let rest = pargs.finish();
        if !rest.is_empty() {
            return Err(anyhow!("Unexpected arguments: {:?}", rest));
        }

        Ok(Some(args))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_env("RUST_LOG")
        .init();

    let args = match Args::parse() {
        Ok(Some(args)) => args,
        Ok(None) => {
            print!("{}", HELP);

            return ExitCode::SUCCESS;
        }
        Err(e) => {
            error!("{}", e);
            eprint!("\n{}", HELP);

            return ExitCode::FAILURE;
        }
    };

    let result = match args.mode {
        Mode::Train => train(&args).await,
        Mode::Inference => classify(&args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{} failed: {:#}", args.mode, e);

            match e.downcast_ref::<orientx::Error>() {
                Some(orientx::Error::Interrupted) => ExitCode::from(INTERRUPTED),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

/// Fine-tune a pretrained encoder on the labelled dataset and checkpoint it
async fn train(args: &Args) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => load_config::<TrainingConfig>(path)?,
        None => TrainingConfig::new(),
    };

    if let Some(model) = &args.model {
        config.model_name = model.to_string();
    }

    if let Some(num_epochs) = args.num_epochs {
        config.num_epochs = num_epochs;
    }

    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }

    let (dataset_train, dataset_valid) = orientation::Dataset::load(
        &args.data,
        config.validation_fraction,
        config.shuffle,
        config.seed,
    )?;

    let device = args.device.resolve();

    let (config_file, model_file) = download_hf_model(&config.model_name).await?;
    let model_config = text_classification::Config::load_pretrained(
        &config_file,
        &config.model_name,
        config.num_classes,
        config.hidden_dropout_prob,
    )?;

    let model = load_pretrained::<Autodiff<LibTorch>>(&model_config, &model_file, &device)?;
    let tokenizer = HfTokenizer::from_pretrained(&config.model_name, model_config.pad_token_id)?;
    model_config.check_tokenizer(&tokenizer)?;

    let adapter = Adapter::for_training(Arc::new(tokenizer), model, device, config.max_length);

    let mut trainer = Trainer::new(config);
    let trained = trainer.fit(
        adapter,
        &dataset_train,
        &dataset_valid,
        &args.checkpoint,
        &mut LogObserver::new(),
    )?;

    model_config.save_to(&checkpoint::config_path(&args.checkpoint))?;

    let metrics_path = checkpoint::metrics_path(&args.checkpoint);
    let metrics = std::fs::File::create(&metrics_path)?;
    serde_json::to_writer_pretty(metrics, &(&trained.history, &trained.evaluation))?;

    info!(
        "Saved model to {} and metrics to {} (validation accuracy {:.4})",
        checkpoint::file_path(&args.checkpoint).display(),
        metrics_path.display(),
        trained.evaluation.accuracy
    );

    Ok(())
}

/// Classify every row of the input corpus with a saved checkpoint
async fn classify(args: &Args) -> anyhow::Result<()> {
    let mut config = match &args.config {
        Some(path) => load_config::<InferenceConfig>(path)?,
        None => InferenceConfig::new(),
    };

    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }

    if let Some(flush_threshold) = args.flush_threshold {
        config.flush_threshold = flush_threshold;
    }

    if args.num_workers.is_some() {
        config.num_workers = args.num_workers;
    }

    let interrupt = Arc::new(AtomicBool::new(false));
    watch_interrupts(interrupt.clone());

    let corpus = Corpus::load(&args.input, &config.text_column, &interrupt)?;

    let device = args.device.resolve();

    let model_config = saved_model_config(&args.checkpoint, args.model.as_ref()).await?;
    let model_name = model_config.tokenizer_model(args.model.as_ref().map(Model::name));

    let model = checkpoint::load::<LibTorch, _>(
        model_config.init::<LibTorch>(&device),
        &args.checkpoint,
        &device,
    )?;
    let tokenizer = HfTokenizer::from_pretrained(model_name, model_config.pad_token_id)?;
    model_config.check_tokenizer(&tokenizer)?;

    let adapter = Adapter::for_inference(Arc::new(tokenizer), model, device, config.max_length);
    let engine = Engine::new(&adapter, config)?.with_interrupt(&interrupt);

    let summary = engine.run(
        &corpus,
        &mut CsvSink::new(&args.output),
        &mut LogObserver::new(),
    )?;

    if summary.write_failures > 0 {
        warn!(
            "{} flushes failed and {} rows were not written to {}",
            summary.write_failures,
            summary.lost_rows,
            args.output.display()
        );
    }

    if summary.interrupted {
        warn!(
            "Interrupted: {} rows were written to {}",
            summary.flushed_rows,
            args.output.display()
        );

        return Err(orientx::Error::Interrupted.into());
    }

    info!(
        "Classified {} rows into {} ({} without a prediction)",
        summary.rows,
        args.output.display(),
        summary.failed_rows + summary.malformed_rows
    );

    Ok(())
}

/// The architecture saved beside the checkpoint, or the pretrained one with the default head
async fn saved_model_config(
    checkpoint: &Path,
    model: Option<&Model>,
) -> anyhow::Result<text_classification::Config> {
    let path = checkpoint::config_path(checkpoint);
    if path.exists() {
        return Ok(text_classification::Config::load_saved(&path)?);
    }

    let model = model.cloned().unwrap_or_default();
    warn!(
        "{} not found, assuming the {} architecture with the default head",
        path.display(),
        model
    );

    let defaults = TrainingConfig::new();
    let config_file = download_hf_config(model.name()).await?;

    Ok(text_classification::Config::load_pretrained(
        &config_file,
        model.name(),
        defaults.num_classes,
        defaults.hidden_dropout_prob,
    )?)
}

/// The first Ctrl-C raises `interrupt`: parsing stops, or no further batches are submitted
/// while those in flight finish and flush. A second one ends the process at once.
fn watch_interrupts(interrupt: Arc<AtomicBool>) {
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupt.swap(true, Ordering::SeqCst) {
                warn!("Interrupted again, exiting with only the rows flushed so far");
                std::process::exit(INTERRUPTED.into());
            }

            warn!("Interrupted, finishing the work in flight");
        }
    });
}

fn load_config<C: burn::config::Config>(path: &Path) -> anyhow::Result<C> {
    C::load(path).map_err(|e| anyhow!("Unable to load config {}: {}", path.display(), e))
}

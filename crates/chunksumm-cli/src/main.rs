//! ChunkSumm command-line front end.
//!
//! `inspect` loads the three record splits, builds the data module and reports
//! split sizes and batch shapes. `score` runs a trained head over a text and
//! prints per-token summary probabilities as JSON lines.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chunksumm_core::{
    get_token_scores, load_jsonl_records, load_tokenizer, BertEncoder, ChunkSumm, Granularity,
    PipelineConfig, SummDataModule, TextTokenizer, TrainSize, WhitespaceTokenizer,
};

/// CLI arguments
#[derive(Parser)]
#[command(name = "chunksumm")]
#[command(about = "Chunked long-document extractive summarization")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Pipeline configuration (JSON). Missing keys take defaults.
    #[arg(short, long, env = "CHUNKSUMM_CONFIG")]
    config: Option<PathBuf>,

    /// Compute device: cpu, metal, cuda or cuda:N
    #[arg(short, long, env = "CHUNKSUMM_DEVICE")]
    device: Option<String>,

    /// Random seed
    #[arg(short, long, env = "CHUNKSUMM_SEED")]
    seed: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the data module and report split sizes and batch shapes
    Inspect {
        /// Training records (JSON lines)
        #[arg(long)]
        train: PathBuf,
        /// Validation records (JSON lines)
        #[arg(long)]
        val: PathBuf,
        /// Test records (JSON lines)
        #[arg(long)]
        test: PathBuf,
        /// Hugging Face tokenizer.json; whitespace tokenization when omitted
        #[arg(short, long, env = "CHUNKSUMM_TOKENIZER")]
        tokenizer: Option<PathBuf>,
        /// Build one example per sentence or per paper
        #[arg(short, long)]
        granularity: Option<GranularityArg>,
        #[arg(short, long)]
        batch_size: Option<usize>,
        /// Data loading threads (0 loads on the calling thread)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Keep only this many training sentences (or papers)
        #[arg(long)]
        train_size: Option<usize>,
        /// Number of batches to print per split
        #[arg(long, default_value_t = 3)]
        show: usize,
    },
    /// Print per-token summary probabilities for a text
    Score {
        /// Directory holding config.json, model.safetensors and tokenizer.json
        #[arg(short, long, env = "CHUNKSUMM_MODEL_DIR")]
        model_dir: String,
        /// Classification head weights written by a training run
        #[arg(long, env = "CHUNKSUMM_HEAD")]
        head: PathBuf,
        /// Text to score; read from stdin when omitted
        text: Option<String>,
        /// Encode long inputs window by window instead of truncating
        #[arg(long)]
        chunk: bool,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum GranularityArg {
    Sentence,
    Paper,
}

impl From<GranularityArg> for Granularity {
    fn from(arg: GranularityArg) -> Self {
        match arg {
            GranularityArg::Sentence => Granularity::Sentence,
            GranularityArg::Paper => Granularity::Paper,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Inspect {
            train,
            val,
            test,
            tokenizer,
            granularity,
            batch_size,
            workers,
            train_size,
            show,
        } => {
            let mut config = config;
            if let Some(granularity) = granularity {
                config.data.granularity = granularity.into();
            }
            if let Some(batch_size) = batch_size {
                config.data.batch_size = batch_size;
            }
            if let Some(workers) = workers {
                config.data.workers = workers;
            }
            if let Some(n) = train_size {
                config.data.train_size = TrainSize::Count(n);
            }
            config.validate().context("Invalid configuration")?;
            inspect(&config, &train, &val, &test, tokenizer.as_deref(), show)
        }
        Commands::Score {
            model_dir,
            head,
            text,
            chunk,
        } => {
            let text = match text {
                Some(text) => text,
                None => std::io::read_to_string(std::io::stdin())
                    .context("Failed to read text from stdin")?,
            };
            score(&config, &model_dir, &head, &text, chunk)
        }
    }
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(device) = &cli.device {
        config.device = device.clone();
    }
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    Ok(config)
}

fn open_tokenizer(path: Option<&Path>) -> Result<Arc<dyn TextTokenizer>> {
    match path {
        Some(path) => {
            let tokenizer = load_tokenizer(path)
                .with_context(|| format!("Failed to load tokenizer from {}", path.display()))?;
            Ok(Arc::new(tokenizer))
        }
        None => {
            warn!("No tokenizer given, falling back to whitespace tokenization");
            Ok(Arc::new(WhitespaceTokenizer::default()))
        }
    }
}

fn inspect(
    config: &PipelineConfig,
    train: &Path,
    val: &Path,
    test: &Path,
    tokenizer: Option<&Path>,
    show: usize,
) -> Result<()> {
    let load = |path: &Path| {
        load_jsonl_records(path)
            .with_context(|| format!("Failed to load records from {}", path.display()))
    };
    let tokenizer = open_tokenizer(tokenizer)?;

    let mut module = SummDataModule::new(load(train)?, load(val)?, load(test)?, tokenizer, config)?;
    module.setup()?;

    println!(
        "records: train={} val={} test={}",
        module.train_len()?,
        module.val_len()?,
        module.test_len()?
    );

    let loaders = [
        ("train", module.train_dataloader()?),
        ("val", module.val_dataloader()?),
        ("test", module.test_dataloader()?),
    ];
    for (name, loader) in loaders {
        println!("{name}: {} batches", loader.num_batches());
        for (i, batch) in loader.take(show).enumerate() {
            let batch = batch.with_context(|| format!("Failed to build {name} batch {i}"))?;
            println!(
                "  batch {i}: input_ids {:?} targets {:?}",
                batch.input_ids.dims(),
                batch.targets.dims()
            );
        }
    }

    Ok(())
}

fn score(
    config: &PipelineConfig,
    model_dir: &str,
    head: &Path,
    text: &str,
    chunk: bool,
) -> Result<()> {
    if text.trim().is_empty() {
        bail!("Nothing to score: the text is empty");
    }
    let model_dir = config
        .resolve_model_dir(model_dir)
        .context("Cannot use model location")?;

    let device = config.device()?;
    let encoder = BertEncoder::from_pretrained(&model_dir, &device)
        .with_context(|| format!("Failed to load encoder from {}", model_dir.display()))?;
    let tokenizer = open_tokenizer(Some(&model_dir.join("tokenizer.json")))?;

    let model_config = config
        .model
        .clone()
        .with_hidden_size(encoder.config().hidden_size)
        .with_chunking(chunk || config.model.enable_chunk);
    let mut model = ChunkSumm::new(encoder, model_config, &device)?;
    model
        .load_head(head)
        .with_context(|| format!("Failed to load head from {}", head.display()))?;

    let scores = get_token_scores(&model, tokenizer.as_ref(), text)?;
    info!(tokens = scores.len(), "scored text");
    for score in &scores {
        println!("{}", serde_json::to_string(score)?);
    }

    Ok(())
}

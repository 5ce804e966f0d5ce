use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lexrag::app::{build_index, AppContext};
use lexrag::cli::{self, UnitSource};
use lexrag::config::{AppConfig, IndexBackend};
use lexrag::embedding::backends::EmbedderKind;
use lexrag::models::DevicePreference;
use lexrag::rag::{GenerationConfig, GeneratorKind};
use lexrag::retrieval::DistanceMetric;

#[derive(Parser)]
#[command(name = "lexrag")]
#[command(about = "Retrieval-augmented question answering over legal articles and short texts", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Index backend: chroma (default) or memory (demo only)
    #[arg(long, global = true)]
    index: Option<IndexBackend>,

    /// Chroma host
    #[arg(long, global = true)]
    chroma_host: Option<String>,

    /// Chroma port
    #[arg(long, global = true)]
    chroma_port: Option<u16>,

    /// Embedder: token or bert
    #[arg(long, global = true)]
    embedder: Option<EmbedderKind>,

    /// Generator: local or hosted
    #[arg(long, global = true)]
    generator: Option<GeneratorKind>,

    /// Generator checkpoint id or local path
    #[arg(long, global = true)]
    model: Option<String>,

    /// Device: auto, cpu, cuda, or metal
    #[arg(long, global = true)]
    device: Option<DevicePreference>,

    /// Never contact the HuggingFace Hub
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a legal code into articles and write them as JSON
    Split {
        /// Input text file
        #[arg(short, long)]
        input: PathBuf,

        /// Output JSON file
        #[arg(short, long)]
        output: PathBuf,

        /// Boundary pattern: "ru", "en", or "REGEX|LABEL_TEMPLATE"
        #[arg(short, long, default_value = "ru")]
        pattern: String,
    },

    /// Embed units and add them to a collection
    Ingest {
        #[command(flatten)]
        source: SourceArgs,

        /// Collection name
        #[arg(short = 'n', long)]
        collection: String,

        /// Create the collection if it does not exist
        #[arg(long)]
        create: bool,

        /// Metric for a newly created collection
        #[arg(long)]
        metric: Option<DistanceMetric>,
    },

    /// Answer a question from a collection
    Ask {
        /// Question text
        question: String,

        /// Collection name
        #[arg(short = 'n', long)]
        collection: String,

        #[command(flatten)]
        generation: GenerationArgs,

        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Index the built-in "Репка" tale and ask about it
    Demo {
        #[arg(default_value = "Кто посадил репку?")]
        question: String,

        #[command(flatten)]
        generation: GenerationArgs,
    },

    /// Delete a collection
    Drop {
        /// Collection name
        collection: String,
    },

    /// List collections with their sizes
    Collections,

    /// Check that the index backend is reachable
    Heartbeat,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct SourceArgs {
    /// JSON article map written by `split`
    #[arg(long)]
    articles: Option<String>,

    /// Text file, one unit per line
    #[arg(long)]
    lines: Option<String>,

    /// Text file, one unit per sentence
    #[arg(long)]
    sentences: Option<String>,

    /// The built-in "Репка" tale
    #[arg(long)]
    repka: bool,
}

impl SourceArgs {
    fn into_source(self) -> UnitSource {
        if let Some(path) = self.articles {
            UnitSource::Articles(path)
        } else if let Some(path) = self.lines {
            UnitSource::Lines(path)
        } else if let Some(path) = self.sentences {
            UnitSource::Sentences(path)
        } else {
            UnitSource::Repka
        }
    }
}

#[derive(Args)]
struct GenerationArgs {
    /// Number of units to retrieve
    #[arg(short = 'k', long)]
    top_k: Option<usize>,

    /// Context budget in characters
    #[arg(long)]
    max_context_chars: Option<usize>,

    /// Sampling temperature (0 for greedy)
    #[arg(long)]
    temperature: Option<f64>,

    /// Maximum tokens to generate
    #[arg(long)]
    max_new_tokens: Option<usize>,

    /// Nucleus sampling threshold
    #[arg(long)]
    top_p: Option<f64>,

    /// Sampling seed
    #[arg(long)]
    seed: Option<u64>,
}

impl GenerationArgs {
    fn apply(self, config: &mut AppConfig) -> GenerationConfig {
        if let Some(top_k) = self.top_k {
            config.rag.top_k = top_k;
        }
        if let Some(chars) = self.max_context_chars {
            config.rag.max_context_chars = chars;
        }

        let mut generation = config.generation.clone();
        if let Some(temperature) = self.temperature {
            generation = generation.with_temperature(temperature);
        }
        if let Some(max_new_tokens) = self.max_new_tokens {
            generation = generation.with_max_new_tokens(max_new_tokens);
        }
        if let Some(top_p) = self.top_p {
            generation = generation.with_top_p(top_p);
        }
        if let Some(seed) = self.seed {
            generation = generation.with_seed(seed);
        }
        generation
    }
}

impl Cli {
    /// File config with command-line overrides applied
    fn app_config(&self) -> Result<AppConfig> {
        let mut config = AppConfig::load(self.config.as_deref())?;

        if let Some(backend) = self.index {
            config.index.backend = backend;
        }
        if let Some(host) = &self.chroma_host {
            config.index.chroma.host = host.clone();
        }
        if let Some(port) = self.chroma_port {
            config.index.chroma.port = port;
        }
        if let Some(kind) = self.embedder {
            config.embedder.kind = kind;
        }
        if let Some(kind) = self.generator {
            config.generator.kind = kind;
        }
        if let Some(model) = &self.model {
            config.generator.local.model_id = model.clone();
        }
        if let Some(device) = self.device {
            config.generator.local.device = device;
            config.embedder.bert.device = device;
        }
        if self.offline {
            config.offline = true;
        }

        Ok(config)
    }
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing subscriber for logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lexrag=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = cli.app_config()?;

    match cli.command {
        Commands::Split {
            input,
            output,
            pattern,
        } => {
            cli::split(&input, &output, &pattern)?;
        }

        Commands::Ingest {
            source,
            collection,
            create,
            metric,
        } => {
            cli::require_shared_index(&config.index, "ingest")?;
            let metric = metric.unwrap_or(config.index.metric);
            let ctx = AppContext::from_config(config)?;
            cli::ingest(&ctx, &source.into_source(), &collection, create, metric)?;
        }

        Commands::Ask {
            question,
            collection,
            generation,
            timeout,
        } => {
            cli::require_shared_index(&config.index, "ask")?;
            let generation = generation.apply(&mut config);
            let ctx = AppContext::from_config(config)?;
            cli::ask(&ctx, &question, &collection, &generation, timeout)?;
        }

        Commands::Demo {
            question,
            generation,
        } => {
            let generation = generation.apply(&mut config);
            let ctx = AppContext::from_config(config)?;
            cli::demo(&ctx, &question, &generation)?;
        }

        Commands::Drop { collection } => {
            cli::require_shared_index(&config.index, "drop")?;
            let index = build_index(&config.index)?;
            cli::drop_collection(index.as_ref(), &collection)?;
        }

        Commands::Collections => {
            cli::require_shared_index(&config.index, "collections")?;
            let index = build_index(&config.index)?;
            cli::collections(index.as_ref())?;
        }

        Commands::Heartbeat => {
            let index = build_index(&config.index)?;
            cli::heartbeat(index.as_ref())?;
        }
    }

    Ok(())
}

mod cmd;

use clap::{Parser, Subcommand};
use std::process;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use wordweaver::envconfig::{expand_home, DTypePreference, DevicePreference, EnvConfig, Host};
use wordweaver::introspect::{
    DEFAULT_LAYER_INDEX, DEFAULT_NUM_TOKENS, DEFAULT_TEMPERATURE, DEFAULT_TOP_K,
};

#[derive(Parser)]
#[command(name = "wordweaver")]
#[command(version)]
#[command(about = "Inspect how a language model sees the next token", long_about = None)]
struct Cli {
    /// Directory holding config.json, tokenizer.json and safetensors weights
    #[arg(long, global = true)]
    model_dir: Option<String>,

    /// Force CPU inference
    #[arg(long, global = true)]
    cpu: bool,

    /// Weight dtype: f32, f16 or bf16
    #[arg(long, global = true)]
    dtype: Option<DTypePreference>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP service
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Sample the next token and show the top candidates
    Generate {
        context: String,
        #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
        temperature: f32,
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: i64,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Print input embeddings of the trailing tokens
    Embed {
        context: String,
        #[arg(long, default_value_t = DEFAULT_NUM_TOKENS)]
        num_tokens: i64,
    },
    /// Snapshot one layer's internal state
    Inspect {
        context: String,
        #[arg(long, default_value_t = DEFAULT_NUM_TOKENS)]
        num_tokens: i64,
        #[arg(long, default_value_t = DEFAULT_LAYER_INDEX, allow_hyphen_values = true)]
        layer_index: i64,
    },
    /// Show the loaded model's shape
    Info,
    /// List checkpoints under a models directory
    List {
        /// Defaults to ~/.wordweaver/models
        #[arg(long)]
        models_dir: Option<String>,
    },
    Version,
}

impl Cli {
    fn config(&self) -> EnvConfig {
        let mut config = EnvConfig::from_env();
        if let Some(dir) = &self.model_dir {
            config.model_dir = expand_home(dir);
        }
        if self.cpu {
            config.device = DevicePreference::Cpu;
        }
        if let Some(dtype) = self.dtype {
            config.dtype = dtype;
        }
        if let Commands::Serve { host, port } = &self.command {
            if let Some(host) = host {
                config.host = Host {
                    host: host.clone(),
                    port: config.host.port,
                };
            }
            if let Some(port) = port {
                config.host.port = *port;
            }
        }
        config
    }
}

fn init_logging(verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.verbose) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    let config = cli.config();
    let result = match cli.command {
        Commands::Serve { .. } => cmd::serve(config).await,
        Commands::Generate {
            context,
            temperature,
            top_k,
            seed,
        } => cmd::generate(config, context, temperature, top_k, seed).await,
        Commands::Embed { context, num_tokens } => cmd::embed(config, context, num_tokens).await,
        Commands::Inspect {
            context,
            num_tokens,
            layer_index,
        } => cmd::inspect(config, context, num_tokens, layer_index).await,
        Commands::Info => cmd::info(config).await,
        Commands::List { models_dir } => cmd::list(models_dir.as_deref().map(expand_home)).await,
        Commands::Version => cmd::version().await,
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

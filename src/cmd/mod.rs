use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use wordweaver::api::types::{EmbedResponse, GenerateResponse, ModelResponse};
use wordweaver::app::{create_router, AppState, Server};
use wordweaver::envconfig::EnvConfig;
use wordweaver::infra::{self, ModelFiles, ModelRepository};
use wordweaver::introspect::Introspector;

fn load_introspector(config: &EnvConfig) -> Result<Introspector> {
    let files = ModelFiles::resolve(&config.model_dir)
        .with_context(|| format!("cannot use model directory {}", config.model_dir.display()))?;
    let (model, tokenizer) = infra::load(&files, config.device, config.dtype)?;
    Ok(Introspector::new(Arc::new(model), Arc::new(tokenizer)))
}

async fn load_in_background(config: &EnvConfig) -> Result<Introspector> {
    let config = config.clone();
    tokio::task::spawn_blocking(move || load_introspector(&config)).await?
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn serve(config: EnvConfig) -> Result<()> {
    println!("Starting WordWeaver server...");
    let introspector = load_in_background(&config).await?;
    let router = create_router(AppState::new(introspector), config.origins.clone());

    Server::new()
        .host(config.host.host.clone())
        .port(config.host.port)
        .routes(router)
        .run()
        .await
}

pub async fn generate(
    config: EnvConfig,
    context: String,
    temperature: f32,
    top_k: i64,
    seed: Option<u64>,
) -> Result<()> {
    let introspector = load_in_background(&config).await?;
    let generation = tokio::task::spawn_blocking(move || {
        introspector.sample_next(&context, temperature, top_k, seed)
    })
    .await??;
    print_json(&GenerateResponse::from(generation))
}

pub async fn embed(config: EnvConfig, context: String, num_tokens: i64) -> Result<()> {
    let introspector = load_in_background(&config).await?;
    let embeddings =
        tokio::task::spawn_blocking(move || introspector.get_embeddings(&context, num_tokens)).await??;
    print_json(&EmbedResponse { embeddings })
}

pub async fn inspect(config: EnvConfig, context: String, num_tokens: i64, layer_index: i64) -> Result<()> {
    let introspector = load_in_background(&config).await?;
    let snapshot = tokio::task::spawn_blocking(move || {
        introspector.internal_forward(&context, num_tokens, layer_index)
    })
    .await??;
    print_json(&snapshot)
}

pub async fn info(config: EnvConfig) -> Result<()> {
    let introspector = load_in_background(&config).await?;
    print_json(&ModelResponse {
        info: introspector.info().clone(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn list(models_dir: Option<PathBuf>) -> Result<()> {
    let repo = models_dir.map(ModelRepository::new).unwrap_or_default();
    let models = repo.list()?;
    if models.is_empty() {
        println!("No models found in {}", repo.models_dir().display());
        return Ok(());
    }
    for name in models {
        match repo.resolve(&name) {
            Ok(files) => {
                let params = files
                    .parameter_count()
                    .map(|n| format!("{:.1}M", n as f64 / 1e6))
                    .unwrap_or_else(|_| "?".to_string());
                println!("{:<32} {:>10}  {}", name, params, files.root.display());
            }
            Err(e) => println!("{:<32} {:>10}  {:#}", name, "-", e),
        }
    }
    Ok(())
}

pub async fn version() -> Result<()> {
    println!("wordweaver version {}", env!("CARGO_PKG_VERSION"));
    println!("architectures: {}", wordweaver::core::model::registry::architectures().join(", "));
    Ok(())
}

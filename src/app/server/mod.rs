use axum::{
    extract::State,
    middleware,
    routing::{get, post},
    Json, Router,
};
use std::future::Future;
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;

use crate::api::types::{
    EmbedRequest, EmbedResponse, GenerateRequest, GenerateResponse, InternalForwardRequest,
    InternalSnapshot, ModelResponse, StatusResponse, STATUS_RUNNING,
};
use crate::app::Result;
use crate::envconfig::{AllowedOrigins, DEFAULT_PORT};
use crate::error::WordWeaverError;
use crate::introspect::Introspector;
use crate::middleware::cors_middleware;

#[derive(Clone)]
pub struct AppState {
    pub introspector: Arc<Introspector>,
}

impl AppState {
    pub fn new(introspector: Introspector) -> Self {
        Self {
            introspector: Arc::new(introspector),
        }
    }
}

pub struct Server {
    host: String,
    port: u16,
    router: Router,
}

impl Server {
    pub fn new() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            router: Router::new(),
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn routes(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    pub async fn run(self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        tracing::info!("Server listening on {}", addr);

        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an already bound listener until `shutdown` resolves.
    pub async fn serve<F>(self, listener: tokio::net::TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("Server stopped");
        Ok(())
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
    }
}

pub fn create_router(state: AppState, origins: AllowedOrigins) -> Router {
    let origins = Arc::new(origins);

    Router::new()
        .route("/", get(status))
        .route("/model", get(model_info))
        .route("/generate", post(generate))
        .route("/embed", post(embed))
        .route("/internal_forward", post(internal_forward))
        .layer(ServiceBuilder::new().layer(middleware::from_fn_with_state(origins, cors_middleware)))
        .with_state(state)
}

async fn status() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: STATUS_RUNNING,
    })
}

async fn model_info(State(state): State<AppState>) -> Json<ModelResponse> {
    Json(ModelResponse {
        info: state.introspector.info().clone(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Run blocking model work off the async executor.
async fn run_blocking<T, F>(state: &AppState, work: F) -> std::result::Result<T, WordWeaverError>
where
    T: Send + 'static,
    F: FnOnce(&Introspector) -> std::result::Result<T, WordWeaverError> + Send + 'static,
{
    let introspector = Arc::clone(&state.introspector);
    tokio::task::spawn_blocking(move || work(&introspector)).await?
}

async fn generate(
    State(state): State<AppState>,
    Json(req): Json<GenerateRequest>,
) -> std::result::Result<Json<GenerateResponse>, WordWeaverError> {
    let generation = run_blocking(&state, move |svc| {
        svc.sample_next(&req.context, req.temperature, req.top_k, req.seed)
    })
    .await?;
    Ok(Json(generation.into()))
}

async fn embed(
    State(state): State<AppState>,
    Json(req): Json<EmbedRequest>,
) -> std::result::Result<Json<EmbedResponse>, WordWeaverError> {
    let embeddings =
        run_blocking(&state, move |svc| svc.get_embeddings(&req.context, req.num_tokens)).await?;
    Ok(Json(EmbedResponse { embeddings }))
}

async fn internal_forward(
    State(state): State<AppState>,
    Json(req): Json<InternalForwardRequest>,
) -> std::result::Result<Json<InternalSnapshot>, WordWeaverError> {
    let snapshot = run_blocking(&state, move |svc| {
        svc.internal_forward(&req.context, req.num_tokens, req.layer_index)
    })
    .await?;
    Ok(Json(snapshot))
}

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use calm_core::{ResetRequest, ResetResponse, TurnRequest};
use calm_orchestrator::{CalmConfig, Collaborators, ConversationOrchestrator, OrchestratorError};
use calm_storage::{CalmStore, JsonlTurnStore};
use clap::Parser;
use serde::Serialize;
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    data_dir: PathBuf,
    config_path: Option<PathBuf>,
    debug: bool,
    seed_demo: bool,
}

#[derive(Parser, Debug)]
#[command(name = "calm-hub")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:8000")]
    addr: String,
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    debug: bool,
    /// Load the demo therapist directory when the store is empty.
    #[arg(long, default_value_t = false)]
    seed_demo: bool,
}

struct HubState {
    orchestrator: ConversationOrchestrator,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[tokio::main]
async fn main() {
    let config = load_config();
    init_logging(&config);
    let addr: SocketAddr = match config.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %config.addr);
            return;
        }
    };
    if !addr.ip().is_loopback() {
        error!(event = "invalid_addr", addr = %config.addr);
        return;
    }

    let hub = match build_state(&config) {
        Ok(hub) => Arc::new(hub),
        Err(err) => {
            error!(event = "hub_error", error = %err);
            return;
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "hub_error", error = %err);
            return;
        }
    };

    info!(
        event = "hub_start",
        addr = %config.addr,
        data_dir = %config.data_dir.display(),
    );

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!(event = "hub_shutdown");
    };

    if let Err(err) = axum::serve(listener, app(hub))
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(event = "hub_error", error = %err);
    }
}

fn app(hub: Arc<HubState>) -> Router {
    Router::new()
        .route("/turn", post(turn_handler))
        .route("/memory/reset", post(reset_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(hub)
}

fn load_config() -> Config {
    let args = Args::parse();
    Config {
        addr: args.addr,
        data_dir: args.data_dir,
        config_path: args.config,
        debug: args.debug || env_true("CALM_HUB_DEBUG"),
        seed_demo: args.seed_demo,
    }
}

fn init_logging(config: &Config) {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("CALM_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(value.trim(), "1" | "true" | "TRUE" | "yes"),
        Err(_) => false,
    }
}

fn build_state(config: &Config) -> Result<HubState, String> {
    let calm_config =
        CalmConfig::load(config.config_path.as_deref()).map_err(|err| err.to_string())?;
    let orchestrator = open_orchestrator(&config.data_dir, calm_config, config.seed_demo)?;
    Ok(HubState { orchestrator })
}

fn open_orchestrator(
    data_dir: &Path,
    config: CalmConfig,
    seed_demo: bool,
) -> Result<ConversationOrchestrator, String> {
    std::fs::create_dir_all(data_dir)
        .map_err(|err| format!("create {}: {err}", data_dir.display()))?;
    let store = Arc::new(CalmStore::open(data_dir.join("calm.db")).map_err(|err| err.to_string())?);
    if seed_demo {
        let seeded = store.seed_demo_directory().map_err(|err| err.to_string())?;
        info!(event = "demo_directory_seeded", therapists = seeded);
    }
    let memory =
        Arc::new(JsonlTurnStore::open(data_dir.join("user_logs")).map_err(|err| err.to_string())?);
    let collaborators =
        Collaborators::deterministic(memory, store.clone()).with_sessions(store);
    Ok(ConversationOrchestrator::new(config, collaborators))
}

async fn turn_handler(
    State(hub): State<Arc<HubState>>,
    Json(request): Json<TurnRequest>,
) -> Response {
    match hub.orchestrator.process_turn(request).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => error_response(err),
    }
}

async fn reset_handler(
    State(hub): State<Arc<HubState>>,
    Json(request): Json<ResetRequest>,
) -> Response {
    match hub.orchestrator.reset_memory(&request.user_id).await {
        Ok(response) => Json(response).into_response(),
        Err(OrchestratorError::Memory(err)) => {
            error!(event = "memory_reset_failed", error = %err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ResetResponse { success: false }),
            )
                .into_response()
        }
        Err(err) => error_response(err),
    }
}

fn error_response(err: OrchestratorError) -> Response {
    let status = match &err {
        OrchestratorError::Contract(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::Memory(_) => StatusCode::SERVICE_UNAVAILABLE,
    };
    warn!(event = "request_rejected", status = status.as_u16(), error = %err);
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
        .into_response()
}

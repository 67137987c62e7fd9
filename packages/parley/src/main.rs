use anyhow::{Context, Result};
use axum::{
    Router,
    http::{HeaderValue, Method},
    routing::{get, post},
};
use clap::{Parser, Subcommand};
use parley_presence::{HubHandle, PresenceHub};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::MakeSpan;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod auth;
mod config;
mod db;
mod error;
mod handlers;
mod metrics;
mod models;
mod repository;
#[cfg(test)]
mod test_helpers;
mod ws;

use crate::auth::AuthState;
use crate::config::{
    AuthConfig, DEFAULT_HOST, DEFAULT_PORT, FileConfig, ParleyConfig, PresenceConfig, Profile,
};
use crate::db::Database;
use crate::metrics::ServerMetrics;
use crate::repository::ChatRepository;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Direct-message chat server with live presence")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Custom data directory (defaults to ~/.parley)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chat server in the foreground (the default)
    Server(ServerArgs),

    /// Print database row counts
    Stats,
}

#[derive(Parser, Default)]
struct ServerArgs {
    /// Port for the web server (0 = auto-select)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Configuration preset
    #[arg(long, value_enum)]
    profile: Option<Profile>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub repository: Arc<ChatRepository>,
    pub db: Arc<Database>,
    /// Handle to the presence hub that owns the online-user registry
    pub hub: HubHandle,
    /// Authentication configuration
    pub auth_config: Arc<AuthConfig>,
    pub presence_config: Arc<PresenceConfig>,
    /// Server metrics for observability
    pub metrics: Arc<ServerMetrics>,
    /// Cancelled on shutdown so open WebSockets don't hold the server up
    pub shutdown: CancellationToken,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ParleyConfig::new(cli.data_dir.clone())?;

    match cli.command {
        None => run_server(ServerArgs::default(), config).await,
        Some(Commands::Server(args)) => run_server(args, config).await,
        Some(Commands::Stats) => stats_command(&config).await,
    }
}

async fn stats_command(config: &ParleyConfig) -> Result<()> {
    let db = Database::new(config).await?;
    let stats = db.get_stats().await?;
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}

/// Assemble the HTTP application: API routes, auth middleware and tower layers.
pub(crate) fn build_router(state: AppState, cors_origin: Option<&str>) -> Result<Router> {
    let auth_state = AuthState {
        repository: state.repository.clone(),
        auth_config: state.auth_config.clone(),
    };

    let app = Router::new()
        .route("/api/ws", get(handlers::presence_websocket_handler))
        .route("/api/messages/users", get(handlers::list_contacts_handler))
        .route("/api/messages/{id}", get(handlers::get_conversation_handler))
        .route(
            "/api/messages/send/{id}",
            post(handlers::send_message_handler),
        )
        // Health and metrics endpoints (public, no auth required)
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/health/ready", get(handlers::health_ready_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .merge(auth::auth_routes().with_state(auth_state.clone()))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            auth::auth_middleware,
        ));

    let cors = match cors_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(
                origin
                    .parse::<HeaderValue>()
                    .with_context(|| format!("Invalid CORS origin: {origin}"))?,
            )
            .allow_methods([Method::GET, Method::POST, Method::PUT])
            .allow_headers([axum::http::header::CONTENT_TYPE])
            .allow_credentials(true),
        None => CorsLayer::permissive(),
    };

    Ok(app
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(cors)
        .with_state(state))
}

async fn run_server(args: ServerArgs, config: ParleyConfig) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "parley=debug,parley_presence=debug,tower_http=debug,info"
    } else {
        "parley=info,parley_presence=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting Parley");
    info!("Config file: {}", config.config_toml_path().display());

    let file_config: FileConfig = config::load_config(&config.data_dir, args.profile.as_ref())
        .extract()
        .context("Failed to load configuration")?;

    let auth_config = Arc::new(AuthConfig::from_file(&file_config.auth));
    let presence_config = Arc::new(PresenceConfig::from_file(&file_config.presence));

    // Initialize database
    info!("Initializing database...");
    let db = Arc::new(Database::new(&config).await?);
    let repository = Arc::new(ChatRepository::new(db.pool.clone()));

    let hub = PresenceHub::spawn(presence_config.hub.clone());
    let shutdown = CancellationToken::new();

    let app_state = AppState {
        repository: repository.clone(),
        db,
        hub: hub.clone(),
        auth_config,
        presence_config,
        metrics: Arc::new(ServerMetrics::new()),
        shutdown: shutdown.clone(),
    };

    let app = build_router(app_state, file_config.server.cors_origin.as_deref())?;

    // Spawn periodic expired session cleanup
    let cleanup_repo = repository.clone();
    let cleanup_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(3600));
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = cleanup_shutdown.cancelled() => break,
            }
            match cleanup_repo.cleanup_expired_sessions().await {
                Ok(n) if n > 0 => info!("Cleaned up {} expired sessions", n),
                Ok(_) => {}
                Err(e) => warn!("Session cleanup failed: {}", e),
            }
        }
    });

    let host = args
        .host
        .or(file_config.server.host)
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = args.port.or(file_config.server.port).unwrap_or(DEFAULT_PORT);
    let addr = format!("{}:{}", host, port)
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid listen address {host}:{port}"))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    let actual_addr = listener.local_addr()?;

    info!("Parley listening on http://{}", actual_addr);
    info!("API endpoints:");
    info!("  POST   /api/auth/signup        - Create an account");
    info!("  POST   /api/auth/login         - Start a session");
    info!("  GET    /api/messages/users     - List contacts");
    info!("  GET    /api/messages/:id       - Conversation with a user");
    info!("  POST   /api/messages/send/:id  - Send a message");
    info!("  GET    /api/ws                 - Real-time presence WebSocket");

    // Create shutdown signal handler
    let signal_token = shutdown.clone();
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Received shutdown signal, cleaning up...");
        signal_token.cancel();
    };

    // Run server with graceful shutdown
    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    info!("Stopping presence hub...");
    match hub.shutdown().await {
        Ok(dropped) => info!("Presence hub stopped ({} users were online)", dropped),
        Err(e) => warn!("Presence hub did not stop cleanly: {}", e),
    }

    info!("Shutdown complete");
    server_result
}

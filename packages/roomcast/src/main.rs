use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

use roomcast::auth::JwtValidator;
use roomcast::config::{
    AuthConfig, ChatConfig, FileConfig, RoomcastConfig, RuntimeOverrides, ServerConfig,
    load_config,
};
use roomcast::db::Database;
use roomcast::metrics::ServerMetrics;
use roomcast::repository::ChatRepository;
use roomcast::services::ChatServices;
use roomcast::ws::ChatHub;
use roomcast::{AppState, router};

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
#[command(name = "roomcast")]
#[command(about = "Real-time room chat server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Custom data directory (defaults to ~/.roomcast)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chat server in the foreground
    Server(ServerArgs),
}

#[derive(Parser)]
struct ServerArgs {
    /// Port for the web server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides config)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Clean start - reset database (prompt for confirmation)
    #[arg(long)]
    reset_db: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => run_server(args, cli.data_dir).await,
    }
}

async fn run_server(args: ServerArgs, data_dir: Option<PathBuf>) -> Result<()> {
    // Setup logging
    let default_directive = if args.debug {
        "roomcast=debug,tower_http=debug,info"
    } else {
        "roomcast=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting roomcast");

    let config = RoomcastConfig::new(data_dir)?;
    let file_config: FileConfig = load_config(&config.data_dir)
        .extract()
        .with_context(|| {
            format!(
                "Failed to load configuration from {}",
                config.config_toml_path().display()
            )
        })?;

    let overrides = RuntimeOverrides {
        host: args.host,
        port: args.port,
    };
    let server_config = ServerConfig::from_file(&file_config.server, &overrides);
    let auth_config = AuthConfig::from_file(&file_config.auth)?;
    let chat_config = ChatConfig::from_file(&file_config.chat);

    // Handle database reset if requested
    if args.reset_db && config.db_path.exists() {
        println!("This will delete all users, rooms and messages!");
        print!("Are you sure? (yes/no): ");
        use std::io::{self, Write};
        io::stdout().flush()?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if input.trim() == "yes" {
            config.reset_database()?;
            println!("Database reset.");
        } else {
            println!("Cancelled.");
        }
    }

    info!("Initializing database...");
    let db = Arc::new(Database::new(&config).await?);
    let repository = Arc::new(ChatRepository::new(db.pool.clone()));

    let tokens = JwtValidator::new(
        auth_config.jwt_secret.as_bytes(),
        auth_config.leeway_secs,
        repository.clone(),
    );
    let services = ChatServices {
        tokens: Arc::new(tokens),
        rooms: repository.clone(),
        messages: repository.clone(),
        identities: repository,
    };

    info!(
        "Chat config: history_limit={}, outbound_capacity={}, idle_timeout={:?}",
        chat_config.history_limit, chat_config.outbound_capacity, chat_config.idle_timeout
    );

    let metrics = Arc::new(ServerMetrics::new());
    let hub = Arc::new(ChatHub::new(services, chat_config, metrics));

    let app_state = AppState {
        hub: hub.clone(),
        db,
    };

    let app = router(app_state)
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive());

    let addr = server_config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    let actual_addr = listener.local_addr()?;

    info!("roomcast listening on http://{}", actual_addr);
    info!("Endpoints:");
    info!("  GET /ws/rooms/:room_id?token=... - Room WebSocket");
    info!("  GET /health                      - Health summary");
    info!("  GET /metrics                     - Server metrics");

    // Sessions close with 1001 as soon as the signal arrives; the server then
    // waits for the remaining HTTP connections to finish.
    let hub_for_shutdown = hub.clone();
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received shutdown signal, cleaning up...");
        hub_for_shutdown.shutdown().await;
    };

    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error");

    info!("Shutdown complete");
    server_result
}

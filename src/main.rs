use std::sync::Arc;

use clap::{Parser, Subcommand};
use stateless_mcp::{
    auth::BearerTokenHook,
    build_app,
    config::Config,
    logging,
    mcp::hooks::Hooks,
    registry::builtin::builtin_registry,
    stdio::StdioBinding,
    AppState,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Stateless JSON-RPC capability server.
#[derive(Parser, Debug)]
#[command(name = "stateless-mcp", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve JSON-RPC over HTTP (default)
    Serve,
    /// Serve newline-delimited JSON-RPC on stdin/stdout
    Stdio,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let cli = Cli::parse();
    let registry = Arc::new(builtin_registry()?);
    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve_http(registry, shutdown).await,
        Command::Stdio => {
            StdioBinding::new(registry, Arc::new(Hooks::default()))
                .with_shutdown(shutdown)
                .run()
                .await?;
            Ok(())
        }
    }
}

async fn serve_http(
    registry: Arc<stateless_mcp::registry::CapabilityRegistry>,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let bind_socket = config.bind_socket()?;

    let mut hooks = Hooks::new();
    match &config.api_token {
        Some(token) => hooks = hooks.with_pre(Arc::new(BearerTokenHook::new(token.clone()))),
        None => warn!("MCP_API_TOKEN is not set, capability calls are unauthenticated"),
    }

    let state = AppState::new(registry)
        .with_hooks(hooks)
        .with_cors(config.cors.clone())
        .with_mcp_endpoint(&config.mcp_endpoint)
        .with_request_timeout(config.request_timeout)
        .with_shutdown(shutdown.clone());
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(bind_socket).await?;

    info!(
        bind_addr = %config.bind_addr,
        bind_port = config.bind_port,
        mcp_endpoint = %config.mcp_endpoint,
        "server starting"
    );

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("server stopped");
    Ok(())
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
    shutdown.cancel();
}

use lxc_executor::{ProcessExecutor, ScriptRunner};
use lxc_gateway_server::config::ServerConfig;
use lxc_gateway_server::events::EventBroadcaster;
use lxc_gateway_server::{create_app, shutdown_on, AppState};
use std::fs::OpenOptions;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing(config: &ServerConfig) -> std::io::Result<()> {
    let default_filter = if config.debug {
        "debug"
    } else {
        "info,lxc_gateway_server=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let file_layer = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Some(fmt::layer().with_ansi(false).with_writer(Arc::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let config = ServerConfig::from_env()?;
    init_tracing(&config)?;

    info!("Starting LXC API Server...");
    if let Some(log_file) = &config.log_file {
        info!("Logging to {}", log_file.display());
    }

    let executor = Arc::new(ProcessExecutor::new(&config.install_root));
    let scripts = ScriptRunner::new(&config.install_root, executor.clone());
    info!("Install root: {}", scripts.root().display());
    let events = Arc::new(EventBroadcaster::new());
    let app = create_app(AppState::new(scripts, events));

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    info!("LXC API Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_on(shutdown_signal(), executor))
        .await?;

    info!("LXC API Server stopped");

    Ok(())
}

use tokio::signal;

use videobalance::config;
use videobalance::startup;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration with graceful error handling
    let config = match config::AppConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            eprintln!("Please check your environment variables and configuration.");
            std::process::exit(1);
        }
    };

    let _guard = match startup::init_logging(&config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            eprintln!("Continuing with default logging configuration...");
            None
        }
    };

    // Log channel, cache, admission, monitor and the redirect engine
    let services = startup::init_services(&config);
    let router = services.router();

    let addr = config.to_socket_addr().await?;
    let served = startup::start_server(router, addr, shutdown_signal()).await;

    // Stop background loops even if the server failed
    startup::shutdown_services(services).await;

    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! { _ = ctrl_c => {}, _ = terminate => {}, }
    tracing::info!("Shutdown signal received");
}

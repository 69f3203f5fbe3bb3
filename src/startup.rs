use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::Router;
use tracing_appender::non_blocking::WorkerGuard;

use crate::{
    admission::AdmissionController,
    balancer::RedirectEngine,
    cache::{CacheSweeper, UrlCache},
    config::{AppConfig, LogFormat},
    error::BalancerError,
    lifecycle::BackgroundTask,
    logging::try_init_subscriber,
    monitor::PoolMonitor,
    state::AppState,
    telemetry::LogChannel,
};

/// Upper bound for each background loop to finish after being signalled
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state plus the background loops serving it
pub struct Services {
    pub state: AppState,
    /// Stopped in order; the log drain comes last so the other loops'
    /// final messages are flushed
    tasks: Vec<BackgroundTask>,
}

impl Services {
    pub fn router(&self) -> Router {
        crate::routes::build_router(self.state.clone())
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.tasks.iter().map(BackgroundTask::name).collect()
    }
}

/// Initialize logging subsystem
///
/// The returned guard must be held for the lifetime of the process so the
/// non-blocking writer flushes on exit.
pub fn init_logging(config: &AppConfig) -> Result<WorkerGuard, BalancerError> {
    let (stdout, guard) = tracing_appender::non_blocking(std::io::stdout());

    match config.log_format {
        LogFormat::Json => {
            let subscriber =
                crate::logging::build_json_subscriber("videobalance", &config.rust_log, stdout)?;
            try_init_subscriber(subscriber)?;
        }
        LogFormat::Plain => {
            let subscriber = crate::logging::build_plain_subscriber(&config.rust_log, stdout);
            try_init_subscriber(subscriber)?;
        }
    }

    Ok(guard)
}

/// Build the cache, falling back to running without one.
///
/// Without a cache every lookup misses and every request takes the
/// decision path.
pub fn init_cache(config: &AppConfig) -> Option<Arc<UrlCache>> {
    match UrlCache::new(config.cache_ttl_secs, config.cache_max_entries) {
        Ok(cache) => {
            tracing::info!(
                ttl_secs = %config.cache_ttl_secs.as_secs(),
                max_entries = %config.cache_max_entries,
                "URL cache initialized"
            );
            Some(Arc::new(cache.with_frequent_access_threshold(
                config.cache_frequent_access_threshold,
            )))
        }
        Err(e) => {
            tracing::error!(
                error = %e,
                "Failed to initialize URL cache, continuing without cache"
            );
            None
        }
    }
}

/// Build every component and spawn the background loops.
///
/// Must be called from within a tokio runtime.
pub fn init_services(config: &AppConfig) -> Services {
    if config.cdn_host_defaulted() {
        tracing::warn!(
            cdn_host = %config.cdn_host(),
            "CDN_HOST not set, using default"
        );
    }

    let (log, drain) = LogChannel::new(config.log_channel_capacity);
    let log = log.with_retry_delay(config.log_retry_delay_ms);
    let drain_task = BackgroundTask::spawn("log-drain", drain.shutdown_handle(), drain.run());

    let mut tasks = Vec::with_capacity(3);

    let cache = init_cache(config);
    if let Some(cache) = &cache {
        let sweeper = CacheSweeper::new(cache.clone(), log.clone())
            .with_interval(config.cache_sweep_interval_secs);
        tasks.push(BackgroundTask::spawn(
            "cache-sweeper",
            sweeper.shutdown_handle(),
            sweeper.run(),
        ));
    }

    let admission = Arc::new(AdmissionController::new(
        config.admission_max_tickets,
        config.admission_worker_slots,
    ));
    tracing::info!(
        max_tickets = %config.admission_max_tickets,
        worker_slots = %config.admission_worker_slots,
        "Admission controller configured"
    );

    let monitor = PoolMonitor::new(admission.active_workers(), log.clone())
        .with_interval(config.monitor_interval_secs)
        .with_ceiling(config.monitor_pool_ceiling);
    let pool_ceiling = monitor.ceiling();
    tasks.push(BackgroundTask::spawn(
        "pool-monitor",
        monitor.shutdown_handle(),
        monitor.run(),
    ));

    let mut engine = RedirectEngine::new(admission, log.clone())
        .with_cdn_host(config.cdn_host())
        .with_request_timeout(config.request_timeout_secs)
        .with_origin_passthrough_every(config.origin_passthrough_every)
        .with_cache_populate_on_miss(config.cache_populate_on_miss);
    if let Some(cache) = cache {
        engine = engine.with_cache(cache);
    }

    tasks.push(drain_task);

    Services {
        state: AppState::new(Arc::new(engine), pool_ceiling, log),
        tasks,
    }
}

/// Gracefully stop every background loop
///
/// Loops are signalled one at a time and each gets [`SHUTDOWN_TIMEOUT`] to
/// exit. A loop that panics or times out is logged and does not block the
/// others.
pub async fn shutdown_services(services: Services) {
    tracing::info!("Shutting down background tasks");

    let log_stats = services.state.log.stats();
    let mut clean = true;
    for task in services.tasks {
        clean &= task.stop(SHUTDOWN_TIMEOUT).await;
    }

    if clean {
        tracing::info!(
            log_delivered = %log_stats.delivered(),
            log_dropped = %log_stats.dropped(),
            "Background tasks stopped"
        );
    } else {
        tracing::warn!(
            log_delivered = %log_stats.delivered(),
            log_dropped = %log_stats.dropped(),
            "Background tasks stopped with errors, buffered log messages may be lost"
        );
    }
}

/// Start the HTTP server with graceful shutdown
pub async fn start_server<F>(
    router: Router,
    addr: SocketAddr,
    shutdown_signal: F,
) -> Result<(), BalancerError>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        BalancerError::InternalServerError(format!("Failed to bind to {}: {}", addr, e))
    })?;

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal)
    .await
    .map_err(|e| BalancerError::InternalServerError(format!("Server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{Config, File, FileFormat};

    fn config_from_toml(toml: &str) -> AppConfig {
        Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[tokio::test]
    async fn services_start_and_stop_cleanly() {
        let config = config_from_toml(
            r#"
            cdn_host = "edge.example.net"
            log_channel_capacity = 128
            monitor_interval_secs = 1
            "#,
        );

        let services = init_services(&config);
        assert_eq!(
            services.task_names(),
            vec!["cache-sweeper", "pool-monitor", "log-drain"]
        );
        assert!(services.state.engine.cache().is_some());
        assert_eq!(services.state.pool_ceiling.get(), 2000);

        let outcome = services
            .state
            .engine
            .redirect(
                "https://s2.origin-cluster/video/1/x.m3u8",
                crate::admission::CallContext::new(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.target_url, "http://edge.example.net/s2");

        shutdown_services(services).await;
    }

    #[test]
    fn zero_capacity_cache_falls_back_to_none() {
        let mut config = config_from_toml("");
        config.cache_max_entries = 0;
        assert!(init_cache(&config).is_none());
    }
}

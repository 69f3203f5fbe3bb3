use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

use anyhow::Context;
use config::{self, Config, Environment};
use dotenvy::dotenv;
use serde::Deserialize;
use serde_with::serde_as;

/// Used when CDN_HOST is unset or empty
pub const DEFAULT_CDN_HOST: &str = "cdn.example.com";

#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct AppConfig {
    // --- Server ---
    /// APP_HOST - bind host (default `0.0.0.0`)
    #[serde(default = "default_app_host")]
    pub app_host: String,
    /// APP_PORT - bind port (default `443`)
    #[serde(default = "default_app_port")]
    pub app_port: u16,
    /// REQUEST_TIMEOUT_SECS - internal deadline for one redirect call (default `10`)
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: Duration,

    // --- Redirect decision ---
    /// CDN_HOST - host that origin URLs are rewritten to (default `cdn.example.com`)
    #[serde(default)]
    pub cdn_host: Option<String>,
    /// ORIGIN_PASSTHROUGH_EVERY - every n-th request per video goes to origin (default `10`)
    #[serde(default = "default_origin_passthrough_every")]
    pub origin_passthrough_every: u64,

    // --- Admission ---
    /// ADMISSION_MAX_TICKETS - weighted ticket pool size (default `5000`)
    #[serde(default = "default_admission_max_tickets")]
    pub admission_max_tickets: usize,
    /// ADMISSION_WORKER_SLOTS - worker slot pool size (default `500`)
    #[serde(default = "default_admission_worker_slots")]
    pub admission_worker_slots: usize,

    // --- Cache ---
    /// CACHE_TTL_SECS - time-to-live for cached decisions (default `600`)
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: Duration,
    /// CACHE_MAX_ENTRIES - LRU capacity (default `5000`)
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    /// CACHE_SWEEP_INTERVAL_SECS - period of the expired-entry sweep (default `300`)
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_cache_sweep_interval_secs")]
    pub cache_sweep_interval_secs: Duration,
    /// CACHE_FREQUENT_ACCESS_THRESHOLD - hits after which expiry is extended (default `100`)
    #[serde(default = "default_cache_frequent_access_threshold")]
    pub cache_frequent_access_threshold: u64,
    /// CACHE_POPULATE_ON_MISS - write CDN decisions back into the cache (default `false`)
    #[serde(default)]
    pub cache_populate_on_miss: bool,

    // --- Pool monitor ---
    /// MONITOR_INTERVAL_SECS - pool monitor period (default `2`)
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: Duration,
    /// MONITOR_POOL_CEILING - initial worker pool ceiling (default `2000`)
    #[serde(default = "default_monitor_pool_ceiling")]
    pub monitor_pool_ceiling: i64,

    // --- Logging ---
    /// LOG_CHANNEL_CAPACITY - async log queue size and flush batch (default `100000`)
    #[serde(default = "default_log_channel_capacity")]
    pub log_channel_capacity: usize,
    /// LOG_RETRY_DELAY_MS - wait before the single enqueue retry (default `100`)
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    #[serde(default = "default_log_retry_delay_ms")]
    pub log_retry_delay_ms: Duration,
    /// LOG_FORMAT - log format (default `json`)
    #[serde(default)]
    pub log_format: LogFormat,
    /// RUST_LOG - Rust log level (default `"info"`)
    #[serde(default = "default_rust_log")]
    pub rust_log: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Plain,
    #[default]
    Json,
}

fn default_app_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_app_port() -> u16 {
    443
}

const fn default_request_timeout_secs() -> Duration {
    Duration::from_secs(10)
}

const fn default_origin_passthrough_every() -> u64 {
    10
}

const fn default_admission_max_tickets() -> usize {
    5000
}

const fn default_admission_worker_slots() -> usize {
    500
}

const fn default_cache_ttl_secs() -> Duration {
    Duration::from_secs(600)
}

const fn default_cache_max_entries() -> usize {
    5000
}

const fn default_cache_sweep_interval_secs() -> Duration {
    Duration::from_secs(300)
}

const fn default_cache_frequent_access_threshold() -> u64 {
    100
}

const fn default_monitor_interval_secs() -> Duration {
    Duration::from_secs(2)
}

const fn default_monitor_pool_ceiling() -> i64 {
    2000
}

const fn default_log_channel_capacity() -> usize {
    100_000
}

const fn default_log_retry_delay_ms() -> Duration {
    Duration::from_millis(100)
}

fn default_rust_log() -> String {
    "info".to_string()
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present
        dotenv().ok();

        let settings = Config::builder()
            .add_source(Environment::default().try_parsing(true).ignore_empty(true))
            .build()?;

        let cfg = settings.try_deserialize::<AppConfig>()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate capacities, intervals and the CDN host format.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(host) = &self.cdn_host {
            if host.contains("://") {
                anyhow::bail!("CDN_HOST must be a bare host, without a scheme");
            }
            if host.contains('/') {
                anyhow::bail!("CDN_HOST must not contain a path");
            }
        }

        if self.request_timeout_secs.is_zero() {
            anyhow::bail!("REQUEST_TIMEOUT_SECS must be > 0");
        }

        if self.origin_passthrough_every == 0 {
            anyhow::bail!("ORIGIN_PASSTHROUGH_EVERY must be > 0");
        }

        if self.admission_max_tickets == 0 {
            anyhow::bail!("ADMISSION_MAX_TICKETS must be > 0");
        }

        if self.admission_worker_slots == 0 {
            anyhow::bail!("ADMISSION_WORKER_SLOTS must be > 0");
        }

        if self.cache_ttl_secs.is_zero() {
            anyhow::bail!("CACHE_TTL_SECS must be > 0");
        }

        if self.cache_max_entries == 0 {
            anyhow::bail!("CACHE_MAX_ENTRIES must be > 0");
        }

        if self.cache_sweep_interval_secs.is_zero() {
            anyhow::bail!("CACHE_SWEEP_INTERVAL_SECS must be > 0");
        }

        if self.monitor_interval_secs.is_zero() {
            anyhow::bail!("MONITOR_INTERVAL_SECS must be > 0");
        }

        if self.monitor_pool_ceiling < 0 {
            anyhow::bail!("MONITOR_POOL_CEILING must be >= 0");
        }

        if self.log_channel_capacity == 0 {
            anyhow::bail!("LOG_CHANNEL_CAPACITY must be > 0");
        }

        Ok(())
    }

    /// CDN host to rewrite to, falling back to [`DEFAULT_CDN_HOST`].
    pub fn cdn_host(&self) -> &str {
        self.cdn_host.as_deref().unwrap_or(DEFAULT_CDN_HOST)
    }

    /// Whether CDN_HOST was left unset and the fallback is in use
    pub fn cdn_host_defaulted(&self) -> bool {
        self.cdn_host.is_none()
    }

    /// Build a SocketAddr for listening from APP_HOST and APP_PORT.
    pub async fn to_socket_addr(&self) -> anyhow::Result<SocketAddr> {
        // If APP_HOST is an IP literal, use it directly.
        if let Ok(ip) = self.app_host.parse::<IpAddr>() {
            return Ok(SocketAddr::new(ip, self.app_port));
        }

        // Otherwise resolve the hostname.
        tokio::net::lookup_host((self.app_host.as_str(), self.app_port))
            .await
            .with_context(|| format!("Failed to resolve {}:{}", self.app_host, self.app_port))?
            .next()
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "No addresses resolved for {}:{}",
                    self.app_host,
                    self.app_port
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn cfg_from_toml(toml: &str) -> anyhow::Result<AppConfig> {
        let settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        let cfg: AppConfig = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    #[test]
    fn empty_config_uses_defaults() -> anyhow::Result<()> {
        let cfg = cfg_from_toml("")?;
        assert_eq!(cfg.app_host, "0.0.0.0");
        assert_eq!(cfg.app_port, 443);
        assert_eq!(cfg.cdn_host(), DEFAULT_CDN_HOST);
        assert!(cfg.cdn_host_defaulted());
        assert_eq!(cfg.request_timeout_secs, Duration::from_secs(10));
        assert_eq!(cfg.origin_passthrough_every, 10);
        assert_eq!(cfg.admission_max_tickets, 5000);
        assert_eq!(cfg.admission_worker_slots, 500);
        assert_eq!(cfg.cache_ttl_secs, Duration::from_secs(600));
        assert_eq!(cfg.cache_max_entries, 5000);
        assert_eq!(cfg.cache_sweep_interval_secs, Duration::from_secs(300));
        assert_eq!(cfg.cache_frequent_access_threshold, 100);
        assert!(!cfg.cache_populate_on_miss);
        assert_eq!(cfg.monitor_interval_secs, Duration::from_secs(2));
        assert_eq!(cfg.monitor_pool_ceiling, 2000);
        assert_eq!(cfg.log_channel_capacity, 100_000);
        assert_eq!(cfg.log_retry_delay_ms, Duration::from_millis(100));
        assert!(matches!(cfg.log_format, LogFormat::Json));
        assert_eq!(cfg.rust_log, "info");
        Ok(())
    }

    #[test]
    fn overrides_parse_ok() -> anyhow::Result<()> {
        let toml = r#"
            app_host = "127.0.0.1"
            app_port = 34567
            cdn_host = "edge.example.net"
            request_timeout_secs = 3
            origin_passthrough_every = 4
            admission_max_tickets = 64
            admission_worker_slots = 8
            cache_ttl_secs = 42
            cache_max_entries = 10
            cache_sweep_interval_secs = 7
            cache_frequent_access_threshold = 5
            cache_populate_on_miss = true
            monitor_interval_secs = 1
            monitor_pool_ceiling = 16
            log_channel_capacity = 256
            log_retry_delay_ms = 25
            log_format = "plain"
            rust_log = "debug"
        "#;
        let cfg = cfg_from_toml(toml)?;
        assert_eq!(cfg.app_host, "127.0.0.1");
        assert_eq!(cfg.app_port, 34567);
        assert_eq!(cfg.cdn_host(), "edge.example.net");
        assert!(!cfg.cdn_host_defaulted());
        assert_eq!(cfg.request_timeout_secs, Duration::from_secs(3));
        assert_eq!(cfg.origin_passthrough_every, 4);
        assert_eq!(cfg.admission_max_tickets, 64);
        assert_eq!(cfg.admission_worker_slots, 8);
        assert_eq!(cfg.cache_ttl_secs, Duration::from_secs(42));
        assert_eq!(cfg.cache_max_entries, 10);
        assert_eq!(cfg.cache_sweep_interval_secs, Duration::from_secs(7));
        assert_eq!(cfg.cache_frequent_access_threshold, 5);
        assert!(cfg.cache_populate_on_miss);
        assert_eq!(cfg.monitor_interval_secs, Duration::from_secs(1));
        assert_eq!(cfg.monitor_pool_ceiling, 16);
        assert_eq!(cfg.log_channel_capacity, 256);
        assert_eq!(cfg.log_retry_delay_ms, Duration::from_millis(25));
        assert!(matches!(cfg.log_format, LogFormat::Plain));
        assert_eq!(cfg.rust_log, "debug");
        Ok(())
    }

    #[test]
    fn cdn_host_with_scheme_rejected() {
        let err = cfg_from_toml(r#"cdn_host = "https://cdn.example.com""#).unwrap_err();
        assert!(format!("{err:#}").contains("without a scheme"));
    }

    #[test]
    fn cdn_host_with_path_rejected() {
        let err = cfg_from_toml(r#"cdn_host = "cdn.example.com/videos""#).unwrap_err();
        assert!(format!("{err:#}").contains("must not contain a path"));
    }

    #[test]
    fn zero_capacities_rejected() {
        for (toml, needle) in [
            ("admission_max_tickets = 0", "ADMISSION_MAX_TICKETS"),
            ("admission_worker_slots = 0", "ADMISSION_WORKER_SLOTS"),
            ("cache_max_entries = 0", "CACHE_MAX_ENTRIES"),
            ("log_channel_capacity = 0", "LOG_CHANNEL_CAPACITY"),
            ("origin_passthrough_every = 0", "ORIGIN_PASSTHROUGH_EVERY"),
        ] {
            let err = cfg_from_toml(toml).unwrap_err();
            assert!(format!("{err:#}").contains(needle), "{toml}");
        }
    }

    #[test]
    fn zero_intervals_rejected() {
        for (toml, needle) in [
            ("request_timeout_secs = 0", "REQUEST_TIMEOUT_SECS"),
            ("cache_ttl_secs = 0", "CACHE_TTL_SECS"),
            ("cache_sweep_interval_secs = 0", "CACHE_SWEEP_INTERVAL_SECS"),
            ("monitor_interval_secs = 0", "MONITOR_INTERVAL_SECS"),
        ] {
            let err = cfg_from_toml(toml).unwrap_err();
            assert!(format!("{err:#}").contains(needle), "{toml}");
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn to_socket_addr_ip_ok() {
        let toml = r#"
            app_host = "127.0.0.1"
            app_port = 18081
        "#;
        let cfg = cfg_from_toml(toml).unwrap();
        let addr = cfg.to_socket_addr().await.unwrap();
        assert_eq!(addr.port(), 18081);
        assert!(addr.ip().is_ipv4());
    }
}

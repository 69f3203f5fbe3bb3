use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;

use crate::{
    admission::{AdmissionController, CallContext},
    cache::UrlCache,
    error::RedirectError,
    telemetry::{LogChannel, LogMessage},
    video_url::decompose,
};

/// Which branch of the decision produced the target URL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Served from the cache
    Cached,
    /// Periodic origin passthrough on the n-th request for the video
    PeriodicOrigin { request_count: u64 },
    /// No CDN host configured, origin URL returned as is
    OriginNoCdn,
    /// Rewritten to the CDN host
    Cdn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectOutcome {
    pub target_url: String,
    pub decision: Decision,
}

/// Point-in-time numbers for the stats endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    pub cache_entries: usize,
    pub available_tickets: usize,
    pub available_slots: usize,
    pub active_workers: i64,
    pub tracked_videos: usize,
}

/// Decides where a video request goes: the original origin URL or a
/// rewritten CDN URL.
///
/// Every call is admitted through [`AdmissionController`] first and the
/// permit is held until the decision is returned.
pub struct RedirectEngine {
    admission: Arc<AdmissionController>,
    /// `None` runs the engine without a cache: every lookup misses
    cache: Option<Arc<UrlCache>>,
    cdn_host: Option<String>,
    request_counts: DashMap<String, AtomicU64>,
    request_timeout: Duration,
    origin_passthrough_every: u64,
    populate_cache_on_miss: bool,
    log: LogChannel,
}

impl RedirectEngine {
    pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_ORIGIN_PASSTHROUGH_EVERY: u64 = 10;

    pub fn new(admission: Arc<AdmissionController>, log: LogChannel) -> Self {
        Self {
            admission,
            cache: None,
            cdn_host: None,
            request_counts: DashMap::new(),
            request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
            origin_passthrough_every: Self::DEFAULT_ORIGIN_PASSTHROUGH_EVERY,
            populate_cache_on_miss: false,
            log,
        }
    }

    pub fn with_cache(mut self, cache: Arc<UrlCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// An empty host disables CDN rewriting.
    pub fn with_cdn_host(mut self, cdn_host: impl Into<String>) -> Self {
        let cdn_host = cdn_host.into();
        self.cdn_host = (!cdn_host.trim().is_empty()).then_some(cdn_host);
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn with_origin_passthrough_every(mut self, every: u64) -> Self {
        self.origin_passthrough_every = every.max(1);
        self
    }

    pub fn with_cache_populate_on_miss(mut self, populate: bool) -> Self {
        self.populate_cache_on_miss = populate;
        self
    }

    pub fn cache(&self) -> Option<&Arc<UrlCache>> {
        self.cache.as_ref()
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// Resolve `video` to its redirect target.
    pub async fn redirect(
        &self,
        video: &str,
        ctx: CallContext,
    ) -> Result<RedirectOutcome, RedirectError> {
        let ctx = ctx.bounded_by(self.request_timeout);

        let _permit = match self.admission.acquire(&ctx).await {
            Ok(permit) => permit,
            Err(e) => {
                self.log
                    .log(
                        LogMessage::warn("Failed to admit redirect request")
                            .with_field("video", video)
                            .with_field("error", e.to_string()),
                    )
                    .await;
                return Err(e.into());
            }
        };

        if let Some(cached_url) = self.cache.as_ref().and_then(|cache| cache.lookup(video)) {
            self.log
                .log(LogMessage::info("URL found in cache").with_field("url", cached_url.as_str()))
                .await;
            return Ok(RedirectOutcome {
                target_url: cached_url,
                decision: Decision::Cached,
            });
        }

        let parts = match decompose(video) {
            Ok(parts) => parts,
            Err(e) => {
                self.log
                    .log(
                        LogMessage::error("Failed to parse video URL")
                            .with_field("url", video)
                            .with_field("error", e.to_string()),
                    )
                    .await;
                return Err(e.into());
            }
        };

        let request_count = self.increment_request_count(video);

        if request_count % self.origin_passthrough_every == 0 {
            self.log
                .log(
                    LogMessage::info("Redirecting to origin URL")
                        .with_field("url", video)
                        .with_field("request_count", request_count),
                )
                .await;
            return Ok(RedirectOutcome {
                target_url: video.to_owned(),
                decision: Decision::PeriodicOrigin { request_count },
            });
        }

        let Some(cdn_host) = self.cdn_host.as_deref() else {
            self.log
                .log(
                    LogMessage::info("Redirecting to origin URL, no CDN host configured")
                        .with_field("url", video),
                )
                .await;
            return Ok(RedirectOutcome {
                target_url: video.to_owned(),
                decision: Decision::OriginNoCdn,
            });
        };

        let cdn_url = format!("http://{cdn_host}/{}", parts.server);

        self.log
            .log(
                LogMessage::info("Redirecting to CDN")
                    .with_field("url", cdn_url.as_str())
                    .with_field("server", parts.server)
                    .with_field("path", parts.path),
            )
            .await;

        if self.populate_cache_on_miss
            && let Some(cache) = &self.cache
        {
            cache.insert(video, cdn_url.as_str());
        }

        Ok(RedirectOutcome {
            target_url: cdn_url,
            decision: Decision::Cdn,
        })
    }

    /// Requests counted for `video` so far
    pub fn request_count(&self, video: &str) -> u64 {
        self.request_counts
            .get(video)
            .map(|count| count.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            cache_entries: self.cache.as_ref().map(|cache| cache.len()).unwrap_or(0),
            available_tickets: self.admission.available_tickets(),
            available_slots: self.admission.available_slots(),
            active_workers: self.admission.active_workers().current(),
            tracked_videos: self.request_counts.len(),
        }
    }

    fn increment_request_count(&self, video: &str) -> u64 {
        if let Some(count) = self.request_counts.get(video) {
            return count.fetch_add(1, Ordering::AcqRel) + 1;
        }
        self.request_counts
            .entry(video.to_owned())
            .or_default()
            .fetch_add(1, Ordering::AcqRel)
            + 1
    }
}

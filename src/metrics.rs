//! Prometheus metrics for view resolution
//!
//! Metric categories:
//! - Resolutions by source (cache hit, cached base, raw load)
//! - Resolution failures and latency
//! - Transforms applied per operation
//! - Views created or reused by mutations

use crate::error::{Result, SieveError};
use crate::transform::Operation;
use prometheus::{Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};

/// Where a resolved table came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Cache,
    Base,
    Raw,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::Cache => "cache",
            ResolutionSource::Base => "base",
            ResolutionSource::Raw => "raw",
        }
    }
}

/// Prometheus metrics collector for a session
pub struct SieveMetrics {
    registry: Registry,

    resolutions_total: CounterVec,
    resolution_failures_total: Counter,
    resolve_duration: Histogram,

    transforms_applied_total: CounterVec,

    views_total: CounterVec,
}

impl SieveMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let resolutions_total = CounterVec::new(
            Opts::new("sieve_resolutions_total", "View tables resolved, by source"),
            &["source"],
        )?;

        let resolution_failures_total = Counter::new(
            "sieve_resolution_failures_total",
            "View resolutions that failed",
        )?;

        let resolve_duration = Histogram::with_opts(
            HistogramOpts::new("sieve_resolve_duration_seconds", "Time to resolve a view table")
                .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0]),
        )?;

        let transforms_applied_total = CounterVec::new(
            Opts::new("sieve_transforms_applied_total", "Transforms executed against a table"),
            &["operation"],
        )?;

        let views_total = CounterVec::new(
            Opts::new("sieve_views_total", "View mutations, by outcome"),
            &["outcome"],
        )?;

        registry.register(Box::new(resolutions_total.clone()))?;
        registry.register(Box::new(resolution_failures_total.clone()))?;
        registry.register(Box::new(resolve_duration.clone()))?;
        registry.register(Box::new(transforms_applied_total.clone()))?;
        registry.register(Box::new(views_total.clone()))?;

        Ok(SieveMetrics {
            registry,
            resolutions_total,
            resolution_failures_total,
            resolve_duration,
            transforms_applied_total,
            views_total,
        })
    }

    pub fn record_resolution(&self, source: ResolutionSource, seconds: f64) {
        self.resolutions_total
            .with_label_values(&[source.as_str()])
            .inc();
        self.resolve_duration.observe(seconds);
    }

    pub fn record_failure(&self) {
        self.resolution_failures_total.inc();
    }

    pub fn record_transform(&self, operation: Operation) {
        self.transforms_applied_total
            .with_label_values(&[operation.as_str()])
            .inc();
    }

    pub fn record_view(&self, created: bool) {
        let outcome = if created { "created" } else { "reused" };
        self.views_total.with_label_values(&[outcome]).inc();
    }

    pub fn resolutions(&self, source: ResolutionSource) -> u64 {
        self.resolutions_total
            .with_label_values(&[source.as_str()])
            .get() as u64
    }

    pub fn failures(&self) -> u64 {
        self.resolution_failures_total.get() as u64
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Metrics in the Prometheus text exposition format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| SieveError::Metrics(prometheus::Error::Msg(e.to_string())))
    }
}

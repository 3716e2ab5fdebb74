use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

// ============================================================================
// Metrics Module - Prometheus metrics for the persistence core
// ============================================================================
//
// Provides:
// - Flat store throughput (events saved per type, events loaded)
// - Load latency
// - Stream repository commits per mode (single, batch, deferred)
// - Events handed to the publisher after commit
//
// Nothing is served from here; callers expose `render()` however they like.
// ============================================================================

pub struct PersistenceMetrics {
    registry: Registry,

    // Flat event store
    pub events_saved: IntCounterVec,
    pub events_loaded: IntCounter,
    pub load_duration: HistogramVec,

    // Stream repository
    pub commits_total: IntCounterVec,
    pub events_committed: IntCounterVec,
    pub events_published: IntCounter,
}

impl PersistenceMetrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let events_saved = IntCounterVec::new(
            Opts::new("event_store_events_saved_total", "Events saved to the flat event store"),
            &["event_type"],
        )?;
        registry.register(Box::new(events_saved.clone()))?;

        let events_loaded = IntCounter::new(
            "event_store_events_loaded_total",
            "Events replayed from the flat event store",
        )?;
        registry.register(Box::new(events_loaded.clone()))?;

        let load_duration = HistogramVec::new(
            HistogramOpts::new("event_store_load_duration_seconds", "Duration of event loads")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["store"],
        )?;
        registry.register(Box::new(load_duration.clone()))?;

        let commits_total = IntCounterVec::new(
            Opts::new("stream_repository_commits_total", "Stream repository commits"),
            &["mode"],
        )?;
        registry.register(Box::new(commits_total.clone()))?;

        let events_committed = IntCounterVec::new(
            Opts::new("stream_repository_events_committed_total", "Events committed to streams"),
            &["mode"],
        )?;
        registry.register(Box::new(events_committed.clone()))?;

        let events_published = IntCounter::new(
            "stream_repository_events_published_total",
            "Events handed to the publisher after commit",
        )?;
        registry.register(Box::new(events_published.clone()))?;

        Ok(Self {
            registry,
            events_saved,
            events_loaded,
            load_duration,
            commits_total,
            events_committed,
            events_published,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_saved(&self, event_type: &str) {
        self.events_saved.with_label_values(&[event_type]).inc();
    }

    /// `store` is the short name of the store kind the load ran against.
    pub fn record_loaded(&self, store: &str, count: usize, elapsed: Duration) {
        self.events_loaded.inc_by(count as u64);
        self.load_duration
            .with_label_values(&[store])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_commit(&self, mode: CommitMode, event_count: usize) {
        self.commits_total.with_label_values(&[mode.as_str()]).inc();
        self.events_committed
            .with_label_values(&[mode.as_str()])
            .inc_by(event_count as u64);
    }

    pub fn record_published(&self, event_count: usize) {
        self.events_published.inc_by(event_count as u64);
    }

    /// Text exposition format of every registered metric.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    Single,
    Batch,
    Deferred,
}

impl CommitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommitMode::Single => "single",
            CommitMode::Batch => "batch",
            CommitMode::Deferred => "deferred",
        }
    }
}

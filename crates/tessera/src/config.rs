use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Tuning knobs of the command side, per aggregate type.
///
/// A dedup threshold of 0 disables command deduplication; `u64::MAX` keeps
/// command records forever. A snapshot threshold of 0 disables snapshots.
#[derive(Debug, Clone)]
pub struct EventSourcingConfig {
    default_dedup_threshold: u64,
    default_snapshot_threshold: u64,
    dedup_thresholds: HashMap<String, u64>,
    snapshot_thresholds: HashMap<String, u64>,
}

impl EventSourcingConfig {
    pub fn command_dedup_threshold_for(&self, aggregate_type: &str) -> u64 {
        self.dedup_thresholds
            .get(aggregate_type)
            .copied()
            .unwrap_or(self.default_dedup_threshold)
    }

    pub fn snapshot_threshold_for(&self, aggregate_type: &str) -> u64 {
        self.snapshot_thresholds
            .get(aggregate_type)
            .copied()
            .unwrap_or(self.default_snapshot_threshold)
    }

    #[must_use]
    pub fn with_dedup_threshold(mut self, aggregate_type: impl Into<String>, threshold: u64) -> Self {
        self.dedup_thresholds.insert(aggregate_type.into(), threshold);
        self
    }

    #[must_use]
    pub fn with_snapshot_threshold(mut self, aggregate_type: impl Into<String>, threshold: u64) -> Self {
        self.snapshot_thresholds.insert(aggregate_type.into(), threshold);
        self
    }

    #[must_use]
    pub fn with_default_dedup_threshold(mut self, threshold: u64) -> Self {
        self.default_dedup_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_default_snapshot_threshold(mut self, threshold: u64) -> Self {
        self.default_snapshot_threshold = threshold;
        self
    }
}

impl Default for EventSourcingConfig {
    fn default() -> Self {
        Self {
            default_dedup_threshold: u64::MAX,
            default_snapshot_threshold: 0,
            dedup_thresholds: HashMap::new(),
            snapshot_thresholds: HashMap::new(),
        }
    }
}

/// Where a subscription starts reading when it has no saved offset yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdenPolicy {
    /// Replay the feed from before the first event.
    BeginningOfTime,
    /// Start at the wall-clock time the subscription was created.
    FromNow,
}

#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub name: String,
    pub eden_policy: EdenPolicy,
}

impl SubscriptionConfig {
    pub fn new(name: impl Into<String>, eden_policy: EdenPolicy) -> Self {
        Self {
            name: name.into(),
            eden_policy,
        }
    }
}

/// Endpoint and per-subscription tuning of the HTTP event-feed consumer.
#[derive(Debug, Clone)]
pub struct HttpEventSourceConfig {
    pub endpoint_protocol: String,
    pub endpoint_host: String,
    pub endpoint_port: u16,
    pub endpoint_path: String,
    default_batch_size: u32,
    default_repeat_schedule: Duration,
    default_timeout: Duration,
    batch_sizes: HashMap<String, u32>,
    repeat_schedules: HashMap<String, Duration>,
    timeouts: HashMap<String, Duration>,
    disabled: HashSet<String>,
}

impl HttpEventSourceConfig {
    pub fn new(
        endpoint_protocol: impl Into<String>,
        endpoint_host: impl Into<String>,
        endpoint_port: u16,
        endpoint_path: impl Into<String>,
    ) -> Self {
        Self {
            endpoint_protocol: endpoint_protocol.into(),
            endpoint_host: endpoint_host.into(),
            endpoint_port,
            endpoint_path: endpoint_path.into(),
            default_batch_size: 100,
            default_repeat_schedule: Duration::from_secs(1),
            default_timeout: Duration::from_secs(30),
            batch_sizes: HashMap::new(),
            repeat_schedules: HashMap::new(),
            timeouts: HashMap::new(),
            disabled: HashSet::new(),
        }
    }

    pub fn base_url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.endpoint_protocol, self.endpoint_host, self.endpoint_port, self.endpoint_path
        )
    }

    pub fn batch_size_for(&self, subscription_name: &str) -> u32 {
        self.batch_sizes
            .get(subscription_name)
            .copied()
            .unwrap_or(self.default_batch_size)
    }

    pub fn repeat_schedule_for(&self, subscription_name: &str) -> Duration {
        self.repeat_schedules
            .get(subscription_name)
            .copied()
            .unwrap_or(self.default_repeat_schedule)
    }

    pub fn timeout_for(&self, subscription_name: &str) -> Duration {
        self.timeouts
            .get(subscription_name)
            .copied()
            .unwrap_or(self.default_timeout)
    }

    pub fn enabled(&self, subscription_name: &str) -> bool {
        !self.disabled.contains(subscription_name)
    }

    #[must_use]
    pub fn with_batch_size(mut self, subscription_name: impl Into<String>, batch_size: u32) -> Self {
        self.batch_sizes.insert(subscription_name.into(), batch_size);
        self
    }

    #[must_use]
    pub fn with_repeat_schedule(mut self, subscription_name: impl Into<String>, schedule: Duration) -> Self {
        self.repeat_schedules.insert(subscription_name.into(), schedule);
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, subscription_name: impl Into<String>, timeout: Duration) -> Self {
        self.timeouts.insert(subscription_name.into(), timeout);
        self
    }

    #[must_use]
    pub fn disable(mut self, subscription_name: impl Into<String>) -> Self {
        self.disabled.insert(subscription_name.into());
        self
    }
}

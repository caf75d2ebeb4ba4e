use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Observer of the command side of the runtime. Every method has a no-op
/// default, so implementors only override the hooks they care about.
/// Reporters must not block; a panicking reporter is logged and ignored.
pub trait CommandReporter: Send + Sync + 'static {
    fn command_received(&self, _aggregate_type: &str, _aggregate_id: &str, _command_type: &str) {}
    fn command_deduplicated(&self, _aggregate_type: &str, _aggregate_id: &str, _command_id: &str) {}
    fn command_rejected(&self, _aggregate_type: &str, _aggregate_id: &str, _reason: &str) {}
    fn events_persisted(&self, _aggregate_type: &str, _aggregate_id: &str, _count: usize, _last_seq_nr: u64) {}
    fn snapshot_saved(&self, _aggregate_type: &str, _aggregate_id: &str, _version: u64) {}
    fn backend_error(&self, _aggregate_type: &str, _aggregate_id: &str, _error: &str) {}
}

/// Observer of the subscription side of the consumer.
pub trait SubscriptionReporter: Send + Sync + 'static {
    fn page_fetched(&self, _subscription: &str, _page_size: usize) {}
    fn event_handled(&self, _subscription: &str, _event_type: &str, _offset: u64) {}
    fn event_skipped(&self, _subscription: &str, _event_type: &str, _offset: u64) {}
    fn handler_failed(&self, _subscription: &str, _event_type: &str, _offset: u64, _error: &str) {}
    fn offset_saved(&self, _subscription: &str, _offset: u64) {}
}

/// Copy-on-write reporter list. Registration replaces the list behind the
/// lock; notification reads a snapshot, so observers never hold the lock
/// while being called.
pub struct Reporters<R: ?Sized> {
    inner: RwLock<Arc<Vec<Arc<R>>>>,
}

impl<R: ?Sized> Reporters<R> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(Vec::new())),
        }
    }

    pub fn register(&self, reporter: Arc<R>) {
        let mut guard = self.inner.write().unwrap();
        let mut list = guard.as_ref().clone();
        list.push(reporter);
        *guard = Arc::new(list);
    }

    pub fn notify(&self, f: impl Fn(&R)) {
        let snapshot = self.inner.read().unwrap().clone();
        for reporter in snapshot.iter() {
            if catch_unwind(AssertUnwindSafe(|| f(reporter))).is_err() {
                warn!("reporter panicked; continuing");
            }
        }
    }
}

impl<R: ?Sized> Default for Reporters<R> {
    fn default() -> Self {
        Self::new()
    }
}

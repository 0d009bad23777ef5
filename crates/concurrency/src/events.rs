//! Typed telemetry events emitted by the transaction manager and, via the
//! same bus, the ingest pipeline (spec §4.5, §4.3, §9 "Event emission").
//!
//! Subscribers register a callback and get a [`Subscription`] handle back;
//! dropping or explicitly unsubscribing stops further delivery. Dispatch is
//! fault-isolated: a panicking subscriber is caught and logged, it never
//! takes down the emitting operation.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::error;

/// A transaction/ingest lifecycle event (spec §4.5, §4.3).
#[derive(Debug, Clone)]
pub enum Event {
    /// A transaction committed successfully.
    Commit {
        /// Transaction id.
        txn_id: u64,
        /// Wall-clock duration in milliseconds.
        duration_ms: u64,
    },
    /// A transaction rolled back.
    Rollback {
        /// Transaction id.
        txn_id: u64,
        /// Human-readable reason.
        reason: String,
    },
    /// A row-mutating statement ran inside a transaction.
    Mutation {
        /// Transaction id.
        txn_id: u64,
        /// `insert` | `update` | `delete`.
        kind: &'static str,
        /// Table name extracted from the statement, if recognized.
        table: Option<String>,
    },
    /// A read query ran inside a transaction.
    Query {
        /// Transaction id.
        txn_id: u64,
        /// Number of rows returned.
        rows: usize,
    },
    /// The ingest pipeline's memory guard crossed a warning threshold.
    MemoryWarning {
        /// Estimated current heap usage in megabytes.
        current_mb: usize,
        /// Configured limit in megabytes.
        limit_mb: usize,
    },
    /// The ingest pipeline made forward progress.
    Progress {
        /// Total records discovered so far (best-effort, may grow).
        total: u64,
        /// Records fully processed.
        processed: u64,
        /// Records skipped (filtered or errored past the retry point).
        skipped: u64,
    },
}

type Callback = Box<dyn Fn(&Event) + Send + Sync>;

struct Subscriber {
    id: u64,
    callback: Callback,
}

/// An in-process event bus. Cloneable — clones share the same subscriber
/// list, so any clone can publish to every subscriber registered on any
/// other clone.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    next_id: Arc<AtomicU64>,
}

/// A handle returned by [`EventBus::subscribe`]; call [`unsubscribe`](Self::unsubscribe)
/// to stop delivery, or simply let it drop (it does not auto-unsubscribe —
/// subscriptions are explicit, matching the "event emission" contract's
/// caller-managed lifecycle).
pub struct Subscription {
    id: u64,
    bus: EventBus,
}

impl Subscription {
    /// Stop further delivery to this subscriber.
    pub fn unsubscribe(self) {
        self.bus
            .subscribers
            .write()
            .retain(|s| s.id != self.id);
    }
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        EventBus::default()
    }

    /// Register a callback. Returns a handle to later unsubscribe.
    pub fn subscribe(&self, callback: impl Fn(&Event) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.write().push(Subscriber {
            id,
            callback: Box::new(callback),
        });
        Subscription {
            id,
            bus: self.clone(),
        }
    }

    /// Dispatch an event to every current subscriber. A subscriber that
    /// panics is caught and logged; it does not prevent delivery to the
    /// remaining subscribers or propagate to the caller.
    pub fn publish(&self, event: Event) {
        let subscribers = self.subscribers.read();
        for subscriber in subscribers.iter() {
            let callback = AssertUnwindSafe(&subscriber.callback);
            if let Err(panic) = catch_unwind(|| (callback.0)(&event)) {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                error!(subscriber_id = subscriber.id, %message, "event subscriber panicked");
            }
        }
    }

    /// Number of currently registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

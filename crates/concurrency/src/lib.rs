//! Transaction management for the graph store (spec §4.5).
//!
//! [`TransactionManager`] wraps a [`tgdb_storage::StoreConnection`]'s
//! single-level transaction primitive with retry/backoff on recoverable
//! errors, cooperative timeouts, named savepoints for nested scopes,
//! per-operation monitoring, and a typed [`events::EventBus`].

#![warn(missing_docs)]

pub mod events;
pub mod manager;

pub use events::{Event, EventBus, Subscription};
pub use manager::{
    OpRecord, RetryPolicy, SlowTransaction, TransactionManager, TransactionStatsSnapshot,
    TxnHandle, SLOW_TRANSACTION_THRESHOLD_MS,
};

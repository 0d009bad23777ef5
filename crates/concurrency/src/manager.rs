//! The transaction manager (spec §4.5): wraps a single [`StoreConnection`]
//! transaction with retry/backoff, cooperative timeout, nested savepoints,
//! per-operation monitoring, and typed event emission.
//!
//! ## State machine
//!
//! `active → committed | rolled_back | failed`. Cancellation is
//! cooperative: [`TransactionManager::cancel`] flips the transaction's
//! state to `failed` and the next suspension point (the start of a
//! `query`/`run`/`with_savepoint` call) observes it and aborts — no
//! mid-statement interruption is guaranteed.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::Connection;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use tgdb_core::{TgdbError, TgdbResult};
use tgdb_storage::StoreConnection;

use crate::events::{Event, EventBus};

/// Threshold above which a completed transaction is recorded in the
/// slow-transaction list (spec §4.5).
pub const SLOW_TRANSACTION_THRESHOLD_MS: u64 = 1_000;

/// How many past transactions' timings to retain for [`TransactionStatsSnapshot`].
const STATS_WINDOW: usize = 256;

/// Retry behavior for recoverable (lock/busy) errors (spec §4.5).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Base delay; attempt `n`'s backoff is `base_delay * 2^n`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
        }
    }
}

/// Per-operation telemetry captured for every `query`/`run` inside a
/// transaction (spec §4.5 "Monitoring").
#[derive(Debug, Clone)]
pub struct OpRecord {
    /// `query` | `run`.
    pub kind: &'static str,
    /// The SQL text executed.
    pub sql: String,
    /// A cheap hash of the bound parameters, for correlating repeated calls.
    pub params_hash: u64,
    /// Wall-clock duration of the call.
    pub duration: Duration,
    /// Rows returned (`query`) or rows changed (`run`).
    pub rows_or_changes: usize,
    /// When the operation ran.
    pub ts: DateTime<Utc>,
}

/// A record of one completed transaction slower than
/// [`SLOW_TRANSACTION_THRESHOLD_MS`].
#[derive(Debug, Clone)]
pub struct SlowTransaction {
    /// The transaction's id.
    pub txn_id: u64,
    /// Caller-supplied label, for diagnostics.
    pub label: String,
    /// Wall-clock duration of the whole transaction.
    pub duration: Duration,
}

/// Aggregate statistics over recently completed transactions (spec §4.5).
#[derive(Debug, Clone)]
pub struct TransactionStatsSnapshot {
    /// Average commit+body duration across the retained window.
    pub average_duration: Duration,
    /// Fraction of transactions in the retained window that committed.
    pub success_rate: f64,
    /// Transactions slower than [`SLOW_TRANSACTION_THRESHOLD_MS`].
    pub slow_transactions: Vec<SlowTransaction>,
}

struct StatsInner {
    durations: VecDeque<Duration>,
    outcomes: VecDeque<bool>,
    slow: Vec<SlowTransaction>,
}

impl StatsInner {
    fn new() -> Self {
        StatsInner {
            durations: VecDeque::with_capacity(STATS_WINDOW),
            outcomes: VecDeque::with_capacity(STATS_WINDOW),
            slow: Vec::new(),
        }
    }

    fn record(&mut self, txn_id: u64, label: &str, duration: Duration, committed: bool) {
        if self.durations.len() == STATS_WINDOW {
            self.durations.pop_front();
            self.outcomes.pop_front();
        }
        self.durations.push_back(duration);
        self.outcomes.push_back(committed);
        if duration.as_millis() as u64 >= SLOW_TRANSACTION_THRESHOLD_MS {
            self.slow.push(SlowTransaction {
                txn_id,
                label: label.to_string(),
                duration,
            });
            if self.slow.len() > STATS_WINDOW {
                self.slow.remove(0);
            }
        }
    }

    fn snapshot(&self) -> TransactionStatsSnapshot {
        let count = self.durations.len().max(1) as u32;
        let total: Duration = self.durations.iter().sum();
        let successes = self.outcomes.iter().filter(|ok| **ok).count();
        TransactionStatsSnapshot {
            average_duration: total / count,
            success_rate: if self.outcomes.is_empty() {
                1.0
            } else {
                successes as f64 / self.outcomes.len() as f64
            },
            slow_transactions: self.slow.clone(),
        }
    }
}

/// Coordinates retried, savepoint-nested, instrumented transactions over a
/// single [`StoreConnection`] (spec §4.5).
pub struct TransactionManager {
    conn: Arc<StoreConnection>,
    bus: EventBus,
    next_txn_id: AtomicU64,
    cancel_flags: Mutex<FxHashMap<u64, Arc<AtomicBool>>>,
    stats: Mutex<StatsInner>,
}

impl TransactionManager {
    /// Wrap a connection. The manager does not own the connection's
    /// lifecycle — closing it is the caller's responsibility.
    pub fn new(conn: Arc<StoreConnection>) -> Self {
        TransactionManager {
            conn,
            bus: EventBus::new(),
            next_txn_id: AtomicU64::new(1),
            cancel_flags: Mutex::new(FxHashMap::default()),
            stats: Mutex::new(StatsInner::new()),
        }
    }

    /// The event bus transactions publish `commit`/`rollback`/per-op
    /// events to. Subscribe before calling [`execute`](Self::execute) to
    /// observe a given transaction's events.
    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// A snapshot of aggregate transaction statistics (spec §4.5).
    pub fn stats(&self) -> TransactionStatsSnapshot {
        self.stats.lock().snapshot()
    }

    /// Cooperatively cancel an in-flight transaction. Has no effect if the
    /// transaction has already finished. Does not guarantee interruption
    /// mid-statement — only at the next `query`/`run`/`with_savepoint`
    /// suspension point.
    pub fn cancel(&self, txn_id: u64) {
        if let Some(flag) = self.cancel_flags.lock().get(&txn_id) {
            flag.store(true, Ordering::SeqCst);
        }
    }

    /// Run `body` inside a transaction with the given retry policy and
    /// timeout, retrying on recoverable (lock/busy) errors with
    /// exponential backoff. Non-retryable errors (constraint violations,
    /// validation failures, timeouts) surface immediately.
    pub fn execute<T>(
        &self,
        label: &str,
        retry: RetryPolicy,
        timeout: Duration,
        body: impl Fn(&TxnHandle<'_>) -> TgdbResult<T>,
    ) -> TgdbResult<T> {
        let mut attempt = 0;
        loop {
            let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
            let cancel_flag = Arc::new(AtomicBool::new(false));
            self.cancel_flags.lock().insert(txn_id, cancel_flag.clone());

            let started = Instant::now();
            let result = self.conn.transaction(|raw| {
                if started.elapsed() > timeout {
                    return Err(TgdbError::timeout(label.to_string()));
                }
                let handle = TxnHandle {
                    conn: raw,
                    txn_id,
                    cancel_flag: cancel_flag.clone(),
                    bus: self.bus.clone(),
                    timeout,
                    started,
                };
                body(&handle)
            });
            let duration = started.elapsed();
            self.cancel_flags.lock().remove(&txn_id);

            match result {
                Ok(value) => {
                    self.stats.lock().record(txn_id, label, duration, true);
                    self.bus.publish(Event::Commit {
                        txn_id,
                        duration_ms: duration.as_millis() as u64,
                    });
                    debug!(txn_id, label, duration_ms = duration.as_millis() as u64, "transaction committed");
                    return Ok(value);
                }
                Err(e) => {
                    self.stats.lock().record(txn_id, label, duration, false);
                    self.bus.publish(Event::Rollback {
                        txn_id,
                        reason: e.to_string(),
                    });
                    attempt += 1;
                    if !e.is_retryable() || attempt >= retry.max_attempts {
                        if e.is_retryable() {
                            warn!(txn_id, label, attempt, "exhausted retries on recoverable error");
                        }
                        return Err(e);
                    }
                    let backoff = retry.base_delay * 2u32.pow(attempt.min(16));
                    debug!(txn_id, label, attempt, backoff_ms = backoff.as_millis() as u64, "retrying transaction");
                    std::thread::sleep(backoff);
                }
            }
        }
    }
}

/// A handle into one attempt of a managed transaction, offered to the
/// caller's `body` closure in [`TransactionManager::execute`].
pub struct TxnHandle<'a> {
    conn: &'a Connection,
    txn_id: u64,
    cancel_flag: Arc<AtomicBool>,
    bus: EventBus,
    timeout: Duration,
    started: Instant,
}

impl<'a> TxnHandle<'a> {
    /// This transaction's id, for correlating with events or `cancel`.
    pub fn txn_id(&self) -> u64 {
        self.txn_id
    }

    fn check_suspension_point(&self) -> TgdbResult<()> {
        if self.cancel_flag.load(Ordering::SeqCst) {
            return Err(TgdbError::timeout("cancelled"));
        }
        if self.started.elapsed() > self.timeout {
            return Err(TgdbError::timeout("transaction"));
        }
        Ok(())
    }

    /// Run a read query, recording per-op telemetry and emitting a
    /// `query` event.
    pub fn query<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        mut f: impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    ) -> TgdbResult<Vec<T>> {
        self.check_suspension_point()?;
        let started = Instant::now();
        let mut stmt = self.conn.prepare(sql).map_err(TgdbError::from)?;
        let rows = stmt.query_map(params, |row| f(row)).map_err(TgdbError::from)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(TgdbError::from)?);
        }
        self.bus.publish(Event::Query {
            txn_id: self.txn_id,
            rows: out.len(),
        });
        debug!(
            txn_id = self.txn_id,
            duration_us = started.elapsed().as_micros() as u64,
            rows = out.len(),
            "query"
        );
        Ok(out)
    }

    /// Run a write statement, recording per-op telemetry and emitting an
    /// `insert`/`update`/`delete` event with the extracted table name.
    pub fn run(&self, sql: &str, params: impl rusqlite::Params) -> TgdbResult<usize> {
        self.check_suspension_point()?;
        let started = Instant::now();
        self.conn.execute(sql, params).map_err(TgdbError::from)?;
        let changes = self.conn.changes() as usize;
        self.bus.publish(Event::Mutation {
            txn_id: self.txn_id,
            kind: mutation_kind(sql),
            table: extract_table_name(sql),
        });
        debug!(
            txn_id = self.txn_id,
            duration_us = started.elapsed().as_micros() as u64,
            changes,
            "run"
        );
        Ok(changes)
    }

    /// Execute `body` inside a named savepoint: released on success,
    /// rolled back to the savepoint (not the whole transaction) on error
    /// (spec §4.5 "Nested scopes").
    pub fn with_savepoint<T>(
        &self,
        name: &str,
        body: impl FnOnce(&TxnHandle<'_>) -> TgdbResult<T>,
    ) -> TgdbResult<T> {
        self.check_suspension_point()?;
        self.conn
            .execute(&format!("SAVEPOINT {name}"), [])
            .map_err(TgdbError::from)?;
        match body(self) {
            Ok(value) => {
                self.conn
                    .execute(&format!("RELEASE SAVEPOINT {name}"), [])
                    .map_err(TgdbError::from)?;
                Ok(value)
            }
            Err(e) => {
                self.conn
                    .execute(&format!("ROLLBACK TO SAVEPOINT {name}"), [])
                    .map_err(TgdbError::from)?;
                self.conn
                    .execute(&format!("RELEASE SAVEPOINT {name}"), [])
                    .map_err(TgdbError::from)?;
                Err(e)
            }
        }
    }
}

fn mutation_kind(sql: &str) -> &'static str {
    let trimmed = sql.trim_start().to_ascii_uppercase();
    if trimmed.starts_with("INSERT") {
        "insert"
    } else if trimmed.starts_with("UPDATE") {
        "update"
    } else if trimmed.starts_with("DELETE") {
        "delete"
    } else {
        "other"
    }
}

fn extract_table_name(sql: &str) -> Option<String> {
    let upper = sql.trim_start().to_ascii_uppercase();
    let rest = if let Some(stripped) = upper.strip_prefix("INSERT INTO ") {
        stripped
    } else if let Some(stripped) = upper.strip_prefix("UPDATE ") {
        stripped
    } else if let Some(stripped) = upper.strip_prefix("DELETE FROM ") {
        stripped
    } else {
        return None;
    };
    let original_rest = &sql.trim_start()[sql.trim_start().len() - rest.len()..];
    original_rest
        .split_whitespace()
        .next()
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != '_').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TransactionManager {
        let conn = Arc::new(StoreConnection::open_memory().unwrap());
        conn.run("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)", [])
            .unwrap();
        TransactionManager::new(conn)
    }

    #[test]
    fn commits_and_records_stats() {
        let mgr = manager();
        let result = mgr.execute(
            "insert-one",
            RetryPolicy::default(),
            Duration::from_secs(5),
            |tx| tx.run("INSERT INTO t (name) VALUES ('a')", []),
        );
        assert!(result.is_ok());
        let stats = mgr.stats();
        assert_eq!(stats.success_rate, 1.0);
    }

    #[test]
    fn rollback_on_body_error_leaves_no_row() {
        let mgr = manager();
        let result: TgdbResult<()> = mgr.execute(
            "failing",
            RetryPolicy::default(),
            Duration::from_secs(5),
            |tx| {
                tx.run("INSERT INTO t (name) VALUES ('a')", [])?;
                Err(TgdbError::internal("forced"))
            },
        );
        assert!(result.is_err());
        let count: i64 = mgr
            .conn
            .query("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap()[0];
        assert_eq!(count, 0);
    }

    #[test]
    fn savepoint_rolls_back_independently() {
        let mgr = manager();
        let result: TgdbResult<()> = mgr.execute(
            "nested",
            RetryPolicy::default(),
            Duration::from_secs(5),
            |tx| {
                tx.run("INSERT INTO t (name) VALUES ('outer')", [])?;
                let inner: TgdbResult<()> = tx.with_savepoint("inner_scope", |inner_tx| {
                    inner_tx.run("INSERT INTO t (name) VALUES ('inner')", [])?;
                    Err(TgdbError::internal("inner failure"))
                });
                assert!(inner.is_err());
                Ok(())
            },
        );
        assert!(result.is_ok());
        let count: i64 = mgr
            .conn
            .query("SELECT COUNT(*) FROM t", [], |row| row.get(0))
            .unwrap()[0];
        assert_eq!(count, 1);
    }

    #[test]
    fn extract_table_name_handles_common_statements() {
        assert_eq!(
            extract_table_name("INSERT INTO nodes (id) VALUES (1)"),
            Some("nodes".to_string())
        );
        assert_eq!(
            extract_table_name("DELETE FROM hierarchy_edges WHERE parent_id = 1"),
            Some("hierarchy_edges".to_string())
        );
        assert_eq!(extract_table_name("SELECT 1"), None);
    }
}

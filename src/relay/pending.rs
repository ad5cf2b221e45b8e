//! Correlation of outgoing commands with the callers awaiting them.
//!
//! Each pending entry owns the sending half of a `oneshot` channel, so an
//! entry can be resolved at most once: whoever removes it from the table
//! first (a response, a failure, the timeout watchdog, or a cancellation)
//! is the only one able to deliver an outcome.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::relay::error::RelayError;

/// How many settled correlation ids are remembered for duplicate detection.
pub const SETTLED_HISTORY: usize = 1024;

/// Outcome delivered to a waiting caller.
pub type Outcome = Result<Value, RelayError>;

/// Token linking a command to its asynchronous response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Mints a fresh random correlation id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses a correlation id received on the wire.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not a UUID.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What happened to a resolution attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The outcome reached the waiting caller.
    Delivered,
    /// The entry was removed but its caller had already gone away.
    Abandoned,
    /// The id was settled earlier; this attempt was dropped.
    Duplicate,
    /// The id was never registered (or settled too long ago to remember).
    Unknown,
}

/// Waitable half of a pending request.
///
/// Resolves to the outcome of the first resolution attempt. If the entry is
/// cancelled without an outcome, resolves to [`RelayError::Cancelled`].
#[derive(Debug)]
pub struct PendingHandle {
    correlation_id: CorrelationId,
    receiver: oneshot::Receiver<Outcome>,
}

impl PendingHandle {
    /// The correlation id this handle waits on.
    #[must_use]
    pub const fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Takes the outcome if one has already been delivered.
    pub fn try_take(&mut self) -> Option<Outcome> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(RelayError::Cancelled {
                correlation_id: self.correlation_id,
            })),
        }
    }
}

impl Future for PendingHandle {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let correlation_id = self.correlation_id;
        Pin::new(&mut self.receiver).poll(cx).map(|received| {
            received.unwrap_or(Err(RelayError::Cancelled { correlation_id }))
        })
    }
}

/// A registered request waiting for its outcome.
struct PendingRequest {
    sender: oneshot::Sender<Outcome>,
    function: String,
    created_at: Instant,
}

/// The most recently settled ids, oldest evicted first.
#[derive(Default)]
struct SettledHistory {
    ids: HashSet<CorrelationId>,
    order: VecDeque<CorrelationId>,
}

impl SettledHistory {
    fn record(&mut self, id: CorrelationId) {
        if !self.ids.insert(id) {
            return;
        }
        self.order.push_back(id);
        if self.order.len() > SETTLED_HISTORY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn contains(&self, id: &CorrelationId) -> bool {
        self.ids.contains(id)
    }
}

#[derive(Default)]
struct Entries {
    pending: HashMap<CorrelationId, PendingRequest>,
    settled: SettledHistory,
}

impl Entries {
    fn take(&mut self, id: CorrelationId) -> Result<PendingRequest, Resolution> {
        if let Some(request) = self.pending.remove(&id) {
            self.settled.record(id);
            Ok(request)
        } else if self.settled.contains(&id) {
            Err(Resolution::Duplicate)
        } else {
            Err(Resolution::Unknown)
        }
    }
}

/// Counters kept by the pending table.
#[derive(Debug, Default)]
pub struct PendingStats {
    registered: AtomicU64,
    fulfilled: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    cancelled: AtomicU64,
    duplicates: AtomicU64,
}

/// Point-in-time copy of [`PendingStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PendingStatsSnapshot {
    /// Requests registered.
    pub registered: u64,
    /// Requests resolved with a result.
    pub fulfilled: u64,
    /// Requests resolved with a client error.
    pub failed: u64,
    /// Requests expired by the deadline.
    pub timed_out: u64,
    /// Requests cancelled or abandoned without an outcome.
    pub cancelled: u64,
    /// Resolution attempts dropped because the id was already settled.
    pub duplicates: u64,
}

impl PendingStats {
    /// Returns the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> PendingStatsSnapshot {
        PendingStatsSnapshot {
            registered: self.registered.load(Ordering::Relaxed),
            fulfilled: self.fulfilled.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
        }
    }
}

#[derive(Clone, Copy)]
enum Settlement {
    Fulfilled,
    Failed,
    TimedOut,
}

impl Settlement {
    const fn label(self) -> &'static str {
        match self {
            Self::Fulfilled => "resolve",
            Self::Failed => "fail",
            Self::TimedOut => "expire",
        }
    }
}

/// Table of in-flight commands keyed by correlation id.
#[derive(Default)]
pub struct PendingRequestTable {
    entries: Mutex<Entries>,
    stats: PendingStats,
}

impl PendingRequestTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new pending request and returns the handle to await.
    pub fn register(&self, correlation_id: CorrelationId, function: &str) -> PendingHandle {
        let (sender, receiver) = oneshot::channel();
        let request = PendingRequest {
            sender,
            function: function.to_string(),
            created_at: Instant::now(),
        };

        let replaced = self
            .entries
            .lock()
            .pending
            .insert(correlation_id, request);
        debug_assert!(replaced.is_none(), "correlation id registered twice");

        self.stats.registered.fetch_add(1, Ordering::Relaxed);
        debug!(correlation_id = %correlation_id, function, "Registered pending request");

        PendingHandle {
            correlation_id,
            receiver,
        }
    }

    /// Fulfils the waiter with a result.
    pub fn resolve(&self, correlation_id: CorrelationId, result: Value) -> Resolution {
        self.settle(correlation_id, Settlement::Fulfilled, Ok(result))
    }

    /// Fails the waiter with the client's error text.
    pub fn fail(&self, correlation_id: CorrelationId, message: impl Into<String>) -> Resolution {
        self.settle(
            correlation_id,
            Settlement::Failed,
            Err(RelayError::remote(message)),
        )
    }

    /// Expires the waiter with a timeout error, if it is still pending.
    pub fn expire(
        &self,
        correlation_id: CorrelationId,
        timeout: std::time::Duration,
    ) -> Resolution {
        self.settle(
            correlation_id,
            Settlement::TimedOut,
            Err(RelayError::RequestTimeout {
                correlation_id,
                timeout,
            }),
        )
    }

    /// Removes an entry without delivering an outcome.
    ///
    /// Returns `true` if the entry was still pending.
    pub fn cancel(&self, correlation_id: CorrelationId) -> bool {
        let taken = self.entries.lock().take(correlation_id);
        match taken {
            Ok(request) => {
                self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %correlation_id,
                    function = %request.function,
                    "Cancelled pending request"
                );
                true
            }
            Err(_) => false,
        }
    }

    /// Number of requests still waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().pending.len()
    }

    /// Returns `true` if nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().pending.is_empty()
    }

    /// Returns `true` if the id is still waiting.
    #[must_use]
    pub fn is_pending(&self, correlation_id: CorrelationId) -> bool {
        self.entries.lock().pending.contains_key(&correlation_id)
    }

    /// Returns the table's counters.
    #[must_use]
    pub const fn stats(&self) -> &PendingStats {
        &self.stats
    }

    fn settle(
        &self,
        correlation_id: CorrelationId,
        settlement: Settlement,
        outcome: Outcome,
    ) -> Resolution {
        let taken = self.entries.lock().take(correlation_id);
        let request = match taken {
            Ok(request) => request,
            Err(Resolution::Duplicate) => {
                self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
                warn!(
                    correlation_id = %correlation_id,
                    attempt = settlement.label(),
                    "Dropping duplicate resolution of settled request"
                );
                return Resolution::Duplicate;
            }
            Err(other) => {
                debug!(
                    correlation_id = %correlation_id,
                    attempt = settlement.label(),
                    "No pending request for correlation id"
                );
                return other;
            }
        };

        let elapsed = request.created_at.elapsed();
        if request.sender.send(outcome).is_err() {
            self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
            debug!(
                correlation_id = %correlation_id,
                function = %request.function,
                "Waiter dropped before resolution"
            );
            return Resolution::Abandoned;
        }

        let counter = match settlement {
            Settlement::Fulfilled => &self.stats.fulfilled,
            Settlement::Failed => &self.stats.failed,
            Settlement::TimedOut => &self.stats.timed_out,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        debug!(
            correlation_id = %correlation_id,
            function = %request.function,
            attempt = settlement.label(),
            elapsed_ms = elapsed.as_millis(),
            "Settled pending request"
        );
        Resolution::Delivered
    }
}

//! Connection codes: short human-readable names for a relay endpoint.
//!
//! A Rhino user types a code such as `RedRhino123` instead of a full
//! endpoint URL. Codes live in an external store; this module only reads
//! them for display, except for [`MemoryCodeStore`], which also issues and
//! resolves codes for a relay running without an external store.
//!
//! [`ConnectionCodeDirectory::list_active`] never fails: an unavailable store
//! yields an empty listing that carries the error text, so a status page can
//! show "no codes known" instead of crashing.

mod store;

pub use store::{generate_code, FileCodeStore, MemoryCodeStore};

use std::error::Error as _;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Default look-back window for active codes, in hours.
pub const DEFAULT_WINDOW_HOURS: i64 = 24;

/// One connection code as stored externally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCodeRecord {
    /// The code itself, e.g. `RedRhino123`.
    pub code: String,
    /// When the code was issued.
    pub created_time: DateTime<Utc>,
    /// When the code was last resolved.
    pub last_access_time: DateTime<Utc>,
    /// How many times the code has been resolved.
    #[serde(default)]
    pub connection_count: u32,
}

/// Errors raised by a connection code store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing file could not be read.
    #[error("connection code store unavailable: {path}")]
    Read {
        /// Path to the store file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The backing file is not a JSON array of records.
    #[error("failed to parse connection code store: {path}")]
    Parse {
        /// Path to the store file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The store is maintained elsewhere and cannot record resolutions.
    #[error("connection code store is read-only")]
    ReadOnly,

    /// Every generated candidate was already taken.
    #[error("no free connection code after {attempts} attempts")]
    CodeSpaceExhausted {
        /// Number of candidates tried.
        attempts: usize,
    },
}

/// Read-only query interface of an external code store.
#[async_trait]
pub trait ConnectionCodeStore: Send + Sync {
    /// Returns every record whose last access is later than `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached or decoded.
    async fn query_active_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ConnectionCodeRecord>, StoreError>;

    /// Resolves `code` to its endpoint, recording the access.
    ///
    /// Returns `Ok(None)` for an unknown code.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ReadOnly`] unless the store records resolutions.
    async fn resolve_code(&self, code: &str) -> Result<Option<String>, StoreError> {
        let _ = code;
        Err(StoreError::ReadOnly)
    }
}

/// Result of listing active codes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CodeListing {
    /// Active codes, most recently accessed first.
    pub codes: Vec<ConnectionCodeRecord>,
    /// Why the listing is empty, if the store failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Read-through accessor for active connection codes.
pub struct ConnectionCodeDirectory {
    store: Option<Arc<dyn ConnectionCodeStore>>,
    default_window: Duration,
}

impl ConnectionCodeDirectory {
    /// Creates a directory backed by `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ConnectionCodeStore>, default_window: Duration) -> Self {
        Self {
            store: Some(store),
            default_window,
        }
    }

    /// Creates a directory with no store; every listing is empty.
    #[must_use]
    pub fn unconfigured() -> Self {
        Self {
            store: None,
            default_window: Duration::hours(DEFAULT_WINDOW_HOURS),
        }
    }

    /// The window used when the caller passes `None`.
    #[must_use]
    pub const fn default_window(&self) -> Duration {
        self.default_window
    }

    /// Lists codes accessed within `window` (default: the directory's window).
    pub async fn list_active(&self, window: Option<Duration>) -> CodeListing {
        self.list_active_at(Utc::now(), window).await
    }

    /// Lists codes accessed within `window` before `now`.
    pub async fn list_active_at(&self, now: DateTime<Utc>, window: Option<Duration>) -> CodeListing {
        let Some(store) = &self.store else {
            return CodeListing::default();
        };

        // A window reaching before the earliest representable time lists everything.
        let cutoff = now
            .checked_sub_signed(window.unwrap_or(self.default_window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        match store.query_active_since(cutoff).await {
            Ok(mut codes) => {
                codes.retain(|record| record.last_access_time > cutoff);
                codes.sort_by(|a, b| b.last_access_time.cmp(&a.last_access_time));
                CodeListing { codes, error: None }
            }
            Err(e) => {
                let message = describe(&e);
                warn!(error = %message, "Error retrieving connection codes");
                CodeListing {
                    codes: Vec::new(),
                    error: Some(message),
                }
            }
        }
    }
}

impl ConnectionCodeDirectory {
    /// Resolves a code to its endpoint.
    ///
    /// # Errors
    ///
    /// Returns the store's error; a directory without a store knows no codes.
    pub async fn resolve(&self, code: &str) -> Result<Option<String>, StoreError> {
        match &self.store {
            Some(store) => store.resolve_code(code).await,
            None => Ok(None),
        }
    }
}

/// Joins an error with its sources into one line.
fn describe(error: &StoreError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

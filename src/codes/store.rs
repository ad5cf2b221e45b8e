//! Connection code store implementations.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::{debug, info};

use super::{ConnectionCodeRecord, ConnectionCodeStore, StoreError};

const ADJECTIVES: [&str; 8] = [
    "Red", "Blue", "Green", "Happy", "Swift", "Clever", "Bright", "Bold",
];
const ANIMALS: [&str; 8] = [
    "Rhino", "Tiger", "Eagle", "Wolf", "Panda", "Lion", "Falcon", "Bear",
];

/// Candidates tried before giving up on finding an unused code.
const MAX_ISSUE_ATTEMPTS: usize = 64;

/// Generates a code of the form `<Adjective><Animal><100..=999>`.
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    let adjective = ADJECTIVES.choose(rng).copied().unwrap_or("Red");
    let animal = ANIMALS.choose(rng).copied().unwrap_or("Rhino");
    let number: u16 = rng.gen_range(100..1000);
    format!("{adjective}{animal}{number}")
}

#[derive(Debug, Clone)]
struct IssuedCode {
    record: ConnectionCodeRecord,
    endpoint: String,
}

/// Process-local store that issues and resolves codes.
#[derive(Debug, Default)]
pub struct MemoryCodeStore {
    codes: RwLock<IndexMap<String, IssuedCode>>,
}

impl MemoryCodeStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a fresh code bound to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CodeSpaceExhausted`] if no unused code was found.
    pub fn issue(&self, endpoint: &str) -> Result<ConnectionCodeRecord, StoreError> {
        self.issue_with(&mut rand::thread_rng(), endpoint, Utc::now())
    }

    fn issue_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        endpoint: &str,
        now: DateTime<Utc>,
    ) -> Result<ConnectionCodeRecord, StoreError> {
        let mut codes = self.codes.write();
        for _ in 0..MAX_ISSUE_ATTEMPTS {
            let code = generate_code(rng);
            if codes.contains_key(&code) {
                continue;
            }

            let record = ConnectionCodeRecord {
                code: code.clone(),
                created_time: now,
                last_access_time: now,
                connection_count: 0,
            };
            codes.insert(
                code.clone(),
                IssuedCode {
                    record: record.clone(),
                    endpoint: endpoint.to_string(),
                },
            );
            info!(code = %code, endpoint, "Generated connection code");
            return Ok(record);
        }

        Err(StoreError::CodeSpaceExhausted {
            attempts: MAX_ISSUE_ATTEMPTS,
        })
    }

    /// Stores an existing record, replacing any record with the same code.
    pub fn insert(&self, record: ConnectionCodeRecord, endpoint: &str) {
        self.codes.write().insert(
            record.code.clone(),
            IssuedCode {
                record,
                endpoint: endpoint.to_string(),
            },
        );
    }

    fn resolve_at(&self, code: &str, now: DateTime<Utc>) -> Option<String> {
        let mut codes = self.codes.write();
        let issued = codes.get_mut(code)?;
        issued.record.last_access_time = now;
        issued.record.connection_count = issued.record.connection_count.saturating_add(1);
        debug!(code, count = issued.record.connection_count, "Resolved connection code");
        Some(issued.endpoint.clone())
    }

    /// Number of stored codes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.codes.read().len()
    }

    /// Returns `true` if no code is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.codes.read().is_empty()
    }
}

#[async_trait]
impl ConnectionCodeStore for MemoryCodeStore {
    async fn query_active_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ConnectionCodeRecord>, StoreError> {
        Ok(self
            .codes
            .read()
            .values()
            .filter(|issued| issued.record.last_access_time > cutoff)
            .map(|issued| issued.record.clone())
            .collect())
    }

    async fn resolve_code(&self, code: &str) -> Result<Option<String>, StoreError> {
        Ok(self.resolve_at(code, Utc::now()))
    }
}

/// Read-through store over a JSON file maintained by another process.
///
/// The file holds a JSON array of [`ConnectionCodeRecord`] and is re-read on
/// every query. Resolutions are recorded by the owning process, so
/// [`ConnectionCodeStore::resolve_code`] is refused here.
#[derive(Debug, Clone)]
pub struct FileCodeStore {
    path: PathBuf,
}

impl FileCodeStore {
    /// Creates a store reading from `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConnectionCodeStore for FileCodeStore {
    async fn query_active_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ConnectionCodeRecord>, StoreError> {
        let contents =
            tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|source| StoreError::Read {
                    path: self.path.clone(),
                    source,
                })?;

        let records: Vec<ConnectionCodeRecord> =
            serde_json::from_str(&contents).map_err(|source| StoreError::Parse {
                path: self.path.clone(),
                source,
            })?;

        Ok(records
            .into_iter()
            .filter(|record| record.last_access_time > cutoff)
            .collect())
    }
}

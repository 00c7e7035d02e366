//! Per-owner history of accepted recognition results.
//!
//! The repository enforces the authentication precondition; stores only
//! persist and query.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::Connection;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::{self, DatabaseError};
use crate::models::{FoodResult, HistoryEntry, HistoryEntryId};
use crate::pipeline::PipelineOutcome;
use crate::session::SessionContext;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Not signed in")]
    NotAuthenticated,

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

// ═══════════════════════════════════════════════════════════
// Store trait
// ═══════════════════════════════════════════════════════════

/// Backing storage, keyed by owner.
pub trait HistoryStore: Send + Sync {
    fn insert(&self, entry: &HistoryEntry) -> Result<(), HistoryError>;

    /// Newest first.
    fn list_for_owner(&self, owner_id: &str) -> Result<Vec<HistoryEntry>, HistoryError>;
}

// ── SqliteHistoryStore ────────────────────────────────────

pub struct SqliteHistoryStore {
    conn: Mutex<Connection>,
}

impl SqliteHistoryStore {
    pub fn open(path: &Path) -> Result<Self, HistoryError> {
        let conn = db::open_database(path)?;
        info!(path = %path.display(), "History database opened");
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, HistoryError> {
        Ok(Self::from_connection(db::open_memory_database()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn insert(&self, entry: &HistoryEntry) -> Result<(), HistoryError> {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        db::insert_history_entry(&conn, entry)?;
        Ok(())
    }

    fn list_for_owner(&self, owner_id: &str) -> Result<Vec<HistoryEntry>, HistoryError> {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        Ok(db::list_history_for_owner(&conn, owner_id)?)
    }
}

// ── InMemoryHistoryStore ──────────────────────────────────

/// Ephemeral store for tests and sessions without a database.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    entries: Mutex<HashMap<String, Vec<HistoryEntry>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total entries across all owners.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .map(|m| m.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn insert(&self, entry: &HistoryEntry) -> Result<(), HistoryError> {
        let mut entries = self.entries.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        entries
            .entry(entry.owner_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    fn list_for_owner(&self, owner_id: &str) -> Result<Vec<HistoryEntry>, HistoryError> {
        let entries = self.entries.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        let mut list: Vec<HistoryEntry> = entries.get(owner_id).cloned().unwrap_or_default();
        // Stable sort on reversed insertion order: equal timestamps list newest insert first.
        list.reverse();
        list.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(list)
    }
}

// ═══════════════════════════════════════════════════════════
// Repository
// ═══════════════════════════════════════════════════════════

pub struct HistoryRepository {
    store: Box<dyn HistoryStore>,
}

impl HistoryRepository {
    pub fn new(store: Box<dyn HistoryStore>) -> Self {
        Self { store }
    }

    /// Persist a result for the signed-in owner, stamped with the current time.
    ///
    /// Signed out → `NotAuthenticated`, and the store is never touched.
    pub fn save(
        &self,
        session: &SessionContext,
        result: &FoodResult,
    ) -> Result<HistoryEntryId, HistoryError> {
        let Some(owner_id) = session.owner_id() else {
            warn!("History save attempted without a signed-in owner");
            return Err(HistoryError::NotAuthenticated);
        };

        let entry = HistoryEntry {
            id: HistoryEntryId::new(),
            owner_id: owner_id.to_string(),
            timestamp: Utc::now(),
            result: result.clone(),
        };
        self.store.insert(&entry)?;
        info!(id = %entry.id, food = %entry.result.name, "History entry saved");
        Ok(entry.id)
    }

    /// The owner's entries, newest first. Empty when signed out.
    pub fn list(&self, session: &SessionContext) -> Result<Vec<HistoryEntry>, HistoryError> {
        match session.owner_id() {
            Some(owner_id) => self.store.list_for_owner(owner_id),
            None => Ok(Vec::new()),
        }
    }

    /// Save only when the pipeline produced a result; failures write nothing.
    pub fn save_outcome(
        &self,
        session: &SessionContext,
        outcome: &PipelineOutcome,
    ) -> Result<Option<HistoryEntryId>, HistoryError> {
        match outcome.result() {
            Some(result) => self.save(session, result).map(Some),
            None => Ok(None),
        }
    }
}

mod error;
mod scope;
mod tables;
mod timeslot;

pub use error::StoreError;
pub use scope::{unit_of_work, TxScope};
pub use tables::{NodeRegistry, Table};
pub use timeslot::{Neighbors, SlotPatch, SlotQuery, SlotRecord, Timeslots};

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, TryLockError};
use std::time::{Duration, Instant};

use rusqlite::Connection;
use serde::Deserialize;
use tracing::{debug, info};

use crate::limits::MAX_POOL_SIZE;

// ── Configuration ────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file. `None` keeps everything in memory (single connection).
    pub path: Option<PathBuf>,
    pub pool_size: usize,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            pool_size: 4,
            busy_timeout_ms: 5_000,
        }
    }
}

// ── Deadline ─────────────────────────────────────────────

/// Per-operation time budget, checked before every statement.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn none() -> Self {
        Self { at: None }
    }

    pub fn after(budget: Option<Duration>) -> Self {
        Self {
            at: budget.map(|b| Instant::now() + b),
        }
    }

    #[cfg(test)]
    pub(crate) fn expired() -> Self {
        Self {
            at: Some(Instant::now()),
        }
    }

    pub fn check(&self, op: &'static str) -> Result<(), StoreError> {
        match self.at {
            Some(at) if Instant::now() >= at => Err(StoreError::DeadlineExceeded { op }),
            _ => Ok(()),
        }
    }
}

// ── Store ────────────────────────────────────────────────

/// Small pool of SQLite connections plus the node allow-list.
///
/// Connections are handed out round-robin. Writers serialize on SQLite's
/// own lock (`BEGIN IMMEDIATE` + busy timeout), not on the pool.
pub struct Store {
    pool: Vec<Mutex<Connection>>,
    next: AtomicUsize,
    tables: NodeRegistry,
}

impl Store {
    pub fn open(config: &StoreConfig, tables: NodeRegistry) -> Result<Self, StoreError> {
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let pool = match &config.path {
            Some(path) => {
                let size = config.pool_size.clamp(1, MAX_POOL_SIZE);
                let shown = path.display().to_string();
                let mut pool = Vec::with_capacity(size);
                for _ in 0..size {
                    let conn = Connection::open(path).map_err(|source| StoreError::Open {
                        path: shown.clone(),
                        source,
                    })?;
                    configure(&conn, busy_timeout, true).map_err(|source| StoreError::Open {
                        path: shown.clone(),
                        source,
                    })?;
                    pool.push(Mutex::new(conn));
                }
                info!(path = %shown, pool_size = size, "opened store");
                pool
            }
            None => {
                let open_err = |source| StoreError::Open {
                    path: ":memory:".into(),
                    source,
                };
                let conn = Connection::open_in_memory().map_err(open_err)?;
                configure(&conn, busy_timeout, false).map_err(open_err)?;
                debug!("opened in-memory store");
                vec![Mutex::new(conn)]
            }
        };

        let store = Self {
            pool,
            next: AtomicUsize::new(0),
            tables,
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn in_memory(tables: NodeRegistry) -> Result<Self, StoreError> {
        Self::open(&StoreConfig::default(), tables)
    }

    pub fn tables(&self) -> &NodeRegistry {
        &self.tables
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    /// Run `f` on the first idle pooled connection, starting from the next
    /// round-robin slot. Waits on that slot only when every connection is busy.
    pub fn with_conn<T, E>(&self, f: impl FnOnce(&Connection) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let n = self.pool.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % n;
        for i in 0..n {
            match self.pool[(start + i) % n].try_lock() {
                Ok(conn) => return f(&conn),
                Err(TryLockError::WouldBlock) => continue,
                Err(TryLockError::Poisoned(_)) => return Err(StoreError::Pool.into()),
            }
        }
        let conn = self.pool[start].lock().map_err(|_| StoreError::Pool)?;
        f(&conn)
    }

    /// Create every configured node table and its indexes if missing.
    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            for table in self.tables.tables() {
                conn.execute_batch(&table.schema())
                    .map_err(|source| StoreError::Query {
                        op: "create timeslot table",
                        source,
                    })?;
                debug!(table = table.name(), "schema ready");
            }
            Ok(())
        })
    }
}

fn configure(conn: &Connection, busy_timeout: Duration, file: bool) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    if file {
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
    }
    Ok(())
}

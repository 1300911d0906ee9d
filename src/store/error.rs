use crate::model::NodeId;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("node {0} is not configured")]
    UnknownNode(NodeId),
    #[error("failed to open store at {path}, {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to {op}, {source}")]
    Query {
        op: &'static str,
        #[source]
        source: rusqlite::Error,
    },
    /// Unique index on (classification key, lot, start_at) rejected a write.
    #[error("slot already exists in {table}, {source}")]
    Duplicate {
        table: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to affect row on {op}: {rows} rows affected")]
    Affected { op: &'static str, rows: usize },
    #[error("no rows in result set")]
    NotFound,
    #[error("failed to begin transaction, {0}")]
    Begin(#[source] rusqlite::Error),
    #[error("failed to commit transaction, {0}")]
    Commit(#[source] rusqlite::Error),
    #[error("failed to rollback transaction after `{latched}`, {source}")]
    RollbackFailed {
        latched: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("deadline exceeded before {op}")]
    DeadlineExceeded { op: &'static str },
    #[error("connection pool poisoned")]
    Pool,
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }

    /// Wrap a driver error for `op`, classifying constraint violations.
    pub(super) fn from_sqlite(op: &'static str, table: &str, source: rusqlite::Error) -> Self {
        match &source {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Duplicate {
                    table: table.to_string(),
                    source,
                }
            }
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            _ => StoreError::Query { op, source },
        }
    }
}

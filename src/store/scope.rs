use std::fmt::Display;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use tracing::warn;

use super::StoreError;

/// Single-owner transaction handle with a first-error latch.
///
/// Idle: statements go to the plain connection. Active: statements go to
/// the open transaction. [`TxScope::end`] commits when nothing was latched,
/// otherwise rolls back and returns the latched error. An active scope that
/// is dropped without `end` rolls back.
///
/// Not for concurrent reuse: one in-flight transaction per scope.
pub struct TxScope<'c, E = StoreError> {
    conn: &'c Connection,
    tx: Option<Transaction<'c>>,
    err: Option<E>,
}

impl<'c, E> TxScope<'c, E>
where
    E: From<StoreError> + Display,
{
    pub fn new(conn: &'c Connection) -> Self {
        Self {
            conn,
            tx: None,
            err: None,
        }
    }

    /// Open a transaction. No-op while one is already active.
    ///
    /// `IMMEDIATE` takes the write lock up front, so a read inside the
    /// scope cannot be invalidated by another writer before our update.
    pub fn start_tx(&mut self) -> Result<(), StoreError> {
        if self.tx.is_some() {
            return Ok(());
        }
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)
            .map_err(StoreError::Begin)?;
        self.tx = Some(tx);
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.tx.is_some()
    }

    /// Connection to run statements against.
    pub fn conn(&self) -> &Connection {
        match &self.tx {
            Some(tx) => &**tx,
            None => self.conn,
        }
    }

    /// Latch `err` unless an earlier error is already latched.
    pub fn error(&mut self, err: E) {
        if self.err.is_none() {
            self.err = Some(err);
        }
    }

    pub fn err(&self) -> Option<&E> {
        self.err.as_ref()
    }

    /// Commit, or roll back and return the latched error.
    /// The scope is idle afterwards either way.
    pub fn end(&mut self) -> Result<(), E> {
        if let Some(err) = self.err.take() {
            return Err(self.rollback_with(err));
        }
        let Some(tx) = self.tx.take() else {
            return Ok(());
        };
        tx.commit().map_err(StoreError::Commit)?;
        metrics::counter!(crate::observability::TX_COMMITS_TOTAL).increment(1);
        Ok(())
    }

    /// Latch the step result (if failed) and end the scope.
    pub fn finish<T>(&mut self, result: Result<T, E>) -> Result<T, E> {
        match result {
            Ok(value) => self.end().map(|()| value),
            Err(err) => {
                let first = self.err.take().unwrap_or(err);
                Err(self.rollback_with(first))
            }
        }
    }

    fn rollback_with(&mut self, err: E) -> E {
        let Some(tx) = self.tx.take() else {
            return err;
        };
        metrics::counter!(crate::observability::TX_ROLLBACKS_TOTAL).increment(1);
        match tx.rollback() {
            Ok(()) => {
                warn!("transaction rolled back: {err}");
                err
            }
            Err(source) => StoreError::RollbackFailed {
                latched: err.to_string(),
                source,
            }
            .into(),
        }
    }
}

/// Run `work` inside a fresh transaction, committing on success and rolling
/// back on the first error.
pub fn unit_of_work<T, E, F>(conn: &Connection, work: F) -> Result<T, E>
where
    E: From<StoreError> + Display,
    F: FnOnce(&mut TxScope<'_, E>) -> Result<T, E>,
{
    let mut scope = TxScope::new(conn);
    scope.start_tx()?;
    let result = work(&mut scope);
    scope.finish(result)
}

//! Base data-access object.
//!
//! # Responsibility
//! - Own one pooled connection for the lifetime of a DAO instance.
//! - Hand out scoped statements and result sets derived from it.
//! - Wrap each logical query with start/ok/error logging.
//!
//! # Invariants
//! - A `Dao` only exists with a live connection; acquisition failures are
//!   returned from [`Dao::connect`] instead of producing a degraded object.
//! - Statements borrow the `Dao`, so the connection cannot be released while
//!   any of them is alive.
//! - After [`Dao::release`] every open call fails with `ConnectionReleased`.

use crate::db::guard::{
    close_resource, PlainStatement, QueryError, QueryResource, ResourceTracker, Scoped,
};
use crate::db::provider::{ConnectionError, ConnectionHandle, ConnectionProvider};
use crate::logging::sanitize_message;
use log::{debug, error, warn};
use rusqlite::{Connection, Rows, Statement};
use std::time::Instant;

const MAX_LOGGED_SQL_CHARS: usize = 200;

pub struct Dao {
    pool_name: String,
    handle: ConnectionHandle,
    tracker: ResourceTracker,
}

impl Dao {
    /// Acquires a connection for `pool_name` through `provider`.
    pub fn connect(provider: &ConnectionProvider, pool_name: &str) -> Result<Self, ConnectionError> {
        let handle = provider.acquire(pool_name)?;
        Ok(Self::from_handle(pool_name, handle))
    }

    pub fn from_handle(pool_name: &str, handle: ConnectionHandle) -> Self {
        Self {
            pool_name: pool_name.to_string(),
            handle,
            tracker: ResourceTracker::new(),
        }
    }

    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    pub fn connection(&self) -> Result<&Connection, QueryError> {
        self.handle.connection()
    }

    /// Resources opened through this DAO and not yet closed.
    pub fn open_resources(&self) -> usize {
        self.tracker.open_count()
    }

    pub fn open_statement(&self) -> Result<Scoped<PlainStatement<'_>>, QueryError> {
        let conn = self.connection()?;
        Ok(Scoped::tracked(PlainStatement::new(conn), &self.tracker))
    }

    /// Prepares `sql`. Placeholders are positional and bound by 1-based index.
    pub fn open_prepared_statement(&self, sql: &str) -> Result<Scoped<Statement<'_>>, QueryError> {
        let conn = self.connection()?;
        debug!(
            "event=resource_open module=dao status=start kind=prepared_statement pool={} sql={}",
            self.pool_name,
            sanitize_message(sql, MAX_LOGGED_SQL_CHARS)
        );
        let stmt = conn.prepare(sql)?;
        Ok(Scoped::tracked(stmt, &self.tracker))
    }

    /// Scopes a cursor obtained from one of this DAO's statements.
    pub fn open_result_set<'stmt>(&self, rows: Rows<'stmt>) -> Scoped<Rows<'stmt>> {
        Scoped::tracked(rows, &self.tracker)
    }

    pub fn close_statement(&self, statement: Option<&mut Scoped<PlainStatement<'_>>>) {
        close_resource(statement);
    }

    pub fn close_prepared_statement(&self, statement: Option<&mut Scoped<Statement<'_>>>) {
        close_resource(statement);
    }

    pub fn close_result_set(&self, rows: Option<&mut Scoped<Rows<'_>>>) {
        close_resource(rows);
    }

    /// Closes any scoped resource kind.
    pub fn close<R: QueryResource>(&self, resource: Option<&mut Scoped<R>>) {
        close_resource(resource);
    }

    /// Runs one logical query, logging its outcome. Failures are returned to
    /// the caller; an empty result is an `Ok` value.
    pub fn run<T>(
        &self,
        operation: &str,
        query: impl FnOnce(&Self) -> Result<T, QueryError>,
    ) -> Result<T, QueryError> {
        let started_at = Instant::now();
        debug!(
            "event=query module=dao status=start pool={} operation={}",
            self.pool_name, operation
        );
        match query(self) {
            Ok(value) => {
                debug!(
                    "event=query module=dao status=ok pool={} operation={} duration_ms={}",
                    self.pool_name,
                    operation,
                    started_at.elapsed().as_millis()
                );
                Ok(value)
            }
            Err(err) => {
                error!(
                    "event=query module=dao status=error pool={} operation={} duration_ms={} error={}",
                    self.pool_name,
                    operation,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_released()
    }

    /// Returns the connection to its pool. Idempotent.
    pub fn release(&mut self) {
        let open = self.tracker.open_count();
        if open > 0 && !self.handle.is_released() {
            warn!(
                "event=conn_release module=dao status=leak pool={} open_resources={}",
                self.pool_name, open
            );
        }
        self.handle.release();
    }
}

impl Drop for Dao {
    fn drop(&mut self) {
        self.release();
    }
}

//! Pooled SQLite data sources.
//!
//! # Responsibility
//! - Define the `DataSource` contract the connection provider checks out from.
//! - Provide a bounded SQLite pool whose connections return to the pool on
//!   release instead of being closed.
//!
//! # Invariants
//! - A physical connection is owned by exactly one `PooledConnection` while
//!   checked out.
//! - `PooledConnection::release` is idempotent and never fails loudly.
//! - Every new physical connection has `foreign_keys=ON`, a busy timeout and
//!   the `GROUP_KEY` collation.

use crate::config::PoolOptions;
use crate::grouping::{compare_keys, GROUP_KEY_COLLATION};
use log::{debug, info, warn};
use rusqlite::{Connection, OpenFlags};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Errors raised while checking a connection out of a data source.
#[derive(Debug)]
pub enum DataSourceError {
    Sqlite(rusqlite::Error),
    /// Every connection of the pool is checked out.
    Exhausted { name: String, max: usize },
    /// The pool has been closed.
    Closed(String),
    /// Backend-specific failure for data sources not backed by this pool.
    Unavailable(String),
}

impl Display for DataSourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Exhausted { name, max } => {
                write!(f, "data source `{name}` exhausted ({max} connections in use)")
            }
            Self::Closed(name) => write!(f, "data source `{name}` is closed"),
            Self::Unavailable(message) => write!(f, "data source unavailable: {message}"),
        }
    }
}

impl Error for DataSourceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Exhausted { .. } => None,
            Self::Closed(_) => None,
            Self::Unavailable(_) => None,
        }
    }
}

impl From<rusqlite::Error> for DataSourceError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// A managed set of reusable database connections.
///
/// Implementations need not tolerate concurrent `get_connection` calls; the
/// naming directory serializes checkout per bound data source.
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;
    fn get_connection(&self) -> Result<PooledConnection, DataSourceError>;
}

#[derive(Debug)]
enum PoolTarget {
    File(PathBuf),
    SharedMemory(String),
}

#[derive(Default)]
struct PoolState {
    idle: Vec<Connection>,
    checked_out: usize,
    closed: bool,
}

struct PoolShared {
    name: String,
    target: PoolTarget,
    options: PoolOptions,
    state: Mutex<PoolState>,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_physical(&self) -> rusqlite::Result<Connection> {
        let conn = match &self.target {
            PoolTarget::File(path) => Connection::open(path)?,
            PoolTarget::SharedMemory(uri) => Connection::open_with_flags(
                uri,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_SHARED_CACHE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?,
        };
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(self.options.busy_timeout)?;
        conn.create_collation(GROUP_KEY_COLLATION, compare_keys)?;
        Ok(conn)
    }

    fn return_connection(&self, conn: Connection) {
        if !conn.is_autocommit() {
            debug!(
                "event=pool_return module=pool status=rollback data_source={}",
                self.name
            );
            if let Err(err) = conn.execute_batch("ROLLBACK;") {
                debug!(
                    "event=pool_return module=pool status=error data_source={} error={}",
                    self.name, err
                );
            }
        }

        let mut state = self.lock();
        state.checked_out = state.checked_out.saturating_sub(1);
        if state.closed {
            drop(state);
            close_physical(&self.name, conn);
            return;
        }
        state.idle.push(conn);
    }
}

fn close_physical(name: &str, conn: Connection) {
    if let Err((_, err)) = conn.close() {
        warn!(
            "event=pool_close module=pool status=error data_source={} error={}",
            name, err
        );
    }
}

/// Bounded pool of SQLite connections.
///
/// Checkout never waits: once `max_connections` are in use, further checkouts
/// fail with [`DataSourceError::Exhausted`] until a connection is released.
#[derive(Clone)]
pub struct SqliteDataSource {
    shared: Arc<PoolShared>,
}

impl SqliteDataSource {
    /// Creates a pool over a database file. No connection is opened until the
    /// first checkout.
    pub fn open(
        name: impl Into<String>,
        path: impl AsRef<Path>,
        options: PoolOptions,
    ) -> Self {
        Self::with_target(
            name.into(),
            PoolTarget::File(path.as_ref().to_path_buf()),
            options,
        )
    }

    /// Creates a pool over a private shared-cache in-memory database.
    ///
    /// The database lives as long as at least one of its connections is open,
    /// which the idle list guarantees until [`SqliteDataSource::close`].
    pub fn open_in_memory(name: impl Into<String>, options: PoolOptions) -> Self {
        let uri = format!("file:registry-{}?mode=memory&cache=shared", Uuid::new_v4());
        Self::with_target(name.into(), PoolTarget::SharedMemory(uri), options)
    }

    fn with_target(name: String, target: PoolTarget, options: PoolOptions) -> Self {
        info!(
            "event=pool_open module=pool status=ok data_source={} target={:?} max_connections={}",
            name, target, options.max_connections
        );
        Self {
            shared: Arc::new(PoolShared {
                name,
                target,
                options,
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    pub fn options(&self) -> PoolOptions {
        self.shared.options
    }

    /// Connections waiting in the pool.
    pub fn idle_count(&self) -> usize {
        self.shared.lock().idle.len()
    }

    /// Connections currently owned by callers.
    pub fn checked_out(&self) -> usize {
        self.shared.lock().checked_out
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    /// Closes idle connections and refuses later checkouts. Connections still
    /// checked out are closed when they are released.
    pub fn close(&self) {
        let idle = {
            let mut state = self.shared.lock();
            state.closed = true;
            std::mem::take(&mut state.idle)
        };
        for conn in idle {
            close_physical(&self.shared.name, conn);
        }
        info!(
            "event=pool_close module=pool status=ok data_source={}",
            self.shared.name
        );
    }
}

impl DataSource for SqliteDataSource {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn get_connection(&self) -> Result<PooledConnection, DataSourceError> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(DataSourceError::Closed(self.shared.name.clone()));
        }
        if let Some(conn) = state.idle.pop() {
            state.checked_out += 1;
            return Ok(PooledConnection::new(conn, Arc::clone(&self.shared)));
        }
        if state.checked_out >= self.shared.options.max_connections {
            return Err(DataSourceError::Exhausted {
                name: self.shared.name.clone(),
                max: self.shared.options.max_connections,
            });
        }
        // Reserve the slot before the lock is dropped for the open call.
        state.checked_out += 1;
        drop(state);

        match self.shared.open_physical() {
            Ok(conn) => Ok(PooledConnection::new(conn, Arc::clone(&self.shared))),
            Err(err) => {
                let mut state = self.shared.lock();
                state.checked_out = state.checked_out.saturating_sub(1);
                Err(DataSourceError::Sqlite(err))
            }
        }
    }
}

/// One physical connection checked out of a [`SqliteDataSource`].
pub struct PooledConnection {
    conn: Option<Connection>,
    home: Arc<PoolShared>,
}

impl PooledConnection {
    fn new(conn: Connection, home: Arc<PoolShared>) -> Self {
        Self {
            conn: Some(conn),
            home,
        }
    }

    /// Borrows the physical connection; `None` once released.
    pub fn connection(&self) -> Option<&Connection> {
        self.conn.as_ref()
    }

    /// Name of the data source this connection belongs to.
    pub fn data_source_name(&self) -> &str {
        &self.home.name
    }

    pub fn is_released(&self) -> bool {
        self.conn.is_none()
    }

    /// Returns the physical connection to its pool. Later calls do nothing.
    pub fn release(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.home.return_connection(conn);
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.release();
    }
}

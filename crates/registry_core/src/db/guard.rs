//! Scoped acquisition of statements and result sets.
//!
//! # Responsibility
//! - Tie every opened query resource to a scope that closes it on all exit
//!   paths, including early returns through `?`.
//! - Keep close failures out of the caller's result: they are logged at
//!   `debug` and dropped.
//!
//! # Invariants
//! - A resource is closed exactly once; later `close` calls do nothing.
//! - A closed resource cannot be used again (`QueryError::ResourceClosed`).
//! - A `ResourceTracker` is decremented exactly once per tracked resource.

use crate::logging::sanitize_message;
use log::{debug, trace};
use rusqlite::{Connection, Rows, Statement};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const MAX_LOGGED_SQL_CHARS: usize = 200;

/// Errors raised by query execution. Empty results are `Ok`, never errors.
#[derive(Debug)]
pub enum QueryError {
    Sqlite(rusqlite::Error),
    /// The resource was already closed.
    ResourceClosed(ResourceKind),
    /// The owning connection has been returned to its pool.
    ConnectionReleased,
    /// A row could not be mapped to the expected shape, or input was rejected.
    InvalidData(String),
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::ResourceClosed(kind) => write!(f, "{} is already closed", kind.as_str()),
            Self::ConnectionReleased => write!(f, "connection has already been released"),
            Self::InvalidData(message) => write!(f, "invalid data: {message}"),
        }
    }
}

impl Error for QueryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::ResourceClosed(_) => None,
            Self::ConnectionReleased => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<rusqlite::Error> for QueryError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Kinds of transient query resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Statement,
    PreparedStatement,
    ResultSet,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Statement => "statement",
            Self::PreparedStatement => "prepared_statement",
            Self::ResultSet => "result_set",
        }
    }
}

/// A resource scoped to one logical query.
pub trait QueryResource {
    fn kind(&self) -> ResourceKind;
    /// Releases the resource. Failures are reported, never retried.
    fn close(self) -> Result<(), QueryError>;
}

impl QueryResource for Statement<'_> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::PreparedStatement
    }

    fn close(self) -> Result<(), QueryError> {
        self.finalize()?;
        Ok(())
    }
}

impl QueryResource for Rows<'_> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::ResultSet
    }

    fn close(self) -> Result<(), QueryError> {
        // Dropping the cursor resets the owning statement.
        drop(self);
        Ok(())
    }
}

/// Counts resources opened but not yet closed.
#[derive(Debug, Clone, Default)]
pub struct ResourceTracker {
    open: Arc<AtomicUsize>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    fn opened(&self) {
        self.open.fetch_add(1, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owns one query resource and closes it when the scope ends.
pub struct Scoped<R: QueryResource> {
    resource: Option<R>,
    kind: ResourceKind,
    tracker: Option<ResourceTracker>,
}

impl<R: QueryResource> Scoped<R> {
    pub fn new(resource: R) -> Self {
        let kind = resource.kind();
        trace!(
            "event=resource_open module=guard status=ok kind={}",
            kind.as_str()
        );
        Self {
            resource: Some(resource),
            kind,
            tracker: None,
        }
    }

    /// Like [`Scoped::new`], counting the resource in `tracker` until closed.
    pub fn tracked(resource: R, tracker: &ResourceTracker) -> Self {
        tracker.opened();
        let mut scoped = Self::new(resource);
        scoped.tracker = Some(tracker.clone());
        scoped
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn is_closed(&self) -> bool {
        self.resource.is_none()
    }

    pub fn resource(&self) -> Result<&R, QueryError> {
        self.resource
            .as_ref()
            .ok_or(QueryError::ResourceClosed(self.kind))
    }

    pub fn resource_mut(&mut self) -> Result<&mut R, QueryError> {
        self.resource
            .as_mut()
            .ok_or(QueryError::ResourceClosed(self.kind))
    }

    /// Closes the resource. Idempotent; close failures are logged and ignored.
    pub fn close(&mut self) {
        let Some(resource) = self.resource.take() else {
            return;
        };
        match resource.close() {
            Ok(()) => trace!(
                "event=resource_close module=guard status=ok kind={}",
                self.kind.as_str()
            ),
            Err(err) => debug!(
                "event=resource_close module=guard status=error kind={} error={}",
                self.kind.as_str(),
                err
            ),
        }
        if let Some(tracker) = self.tracker.take() {
            tracker.closed();
        }
    }
}

impl<R: QueryResource> Drop for Scoped<R> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Closes `resource` if present. Passing `None` is a no-op.
pub fn close_resource<R: QueryResource>(resource: Option<&mut Scoped<R>>) {
    if let Some(resource) = resource {
        resource.close();
    }
}

/// Unparameterized statement that can run several SQL texts in sequence.
///
/// Each execution closes the statement prepared by the previous one, so at
/// most one underlying statement is open at a time.
pub struct PlainStatement<'conn> {
    conn: &'conn Connection,
    current: Option<Statement<'conn>>,
}

impl<'conn> PlainStatement<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self {
            conn,
            current: None,
        }
    }

    /// Runs a row-returning query. The returned cursor borrows the statement.
    pub fn execute_query(&mut self, sql: &str) -> Result<Rows<'_>, QueryError> {
        let stmt = self.prepare(sql)?;
        Ok(stmt.query([])?)
    }

    /// Runs a data-modifying statement and returns the number of changed rows.
    pub fn execute_update(&mut self, sql: &str) -> Result<usize, QueryError> {
        let stmt = self.prepare(sql)?;
        Ok(stmt.execute([])?)
    }

    fn prepare(&mut self, sql: &str) -> Result<&mut Statement<'conn>, QueryError> {
        self.finalize_current();
        debug!(
            "event=query module=guard status=prepare sql={}",
            sanitize_message(sql, MAX_LOGGED_SQL_CHARS)
        );
        let stmt = self.conn.prepare(sql)?;
        Ok(self.current.insert(stmt))
    }

    fn finalize_current(&mut self) {
        if let Some(stmt) = self.current.take() {
            if let Err(err) = stmt.finalize() {
                debug!(
                    "event=resource_close module=guard status=error kind=statement error={}",
                    err
                );
            }
        }
    }
}

impl QueryResource for PlainStatement<'_> {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Statement
    }

    fn close(mut self) -> Result<(), QueryError> {
        match self.current.take() {
            Some(stmt) => Ok(stmt.finalize()?),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        close_resource, PlainStatement, QueryError, QueryResource, ResourceKind, ResourceTracker,
        Scoped,
    };
    use rusqlite::Connection;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct RecordingResource {
        events: Rc<RefCell<Vec<&'static str>>>,
        fail_close: bool,
    }

    impl QueryResource for RecordingResource {
        fn kind(&self) -> ResourceKind {
            ResourceKind::Statement
        }

        fn close(self) -> Result<(), QueryError> {
            self.events.borrow_mut().push("close");
            if self.fail_close {
                return Err(QueryError::InvalidData("close refused".to_string()));
            }
            Ok(())
        }
    }

    fn recording(fail_close: bool) -> (RecordingResource, Rc<RefCell<Vec<&'static str>>>) {
        let events = Rc::new(RefCell::new(vec!["open"]));
        (
            RecordingResource {
                events: Rc::clone(&events),
                fail_close,
            },
            events,
        )
    }

    #[test]
    fn close_twice_closes_once() {
        let (resource, events) = recording(false);
        let mut scoped = Scoped::new(resource);
        scoped.close();
        scoped.close();
        drop(scoped);
        assert_eq!(*events.borrow(), vec!["open", "close"]);
    }

    #[test]
    fn failing_close_is_swallowed() {
        let (resource, events) = recording(true);
        let mut scoped = Scoped::new(resource);
        scoped.close();
        assert!(scoped.is_closed());
        assert_eq!(*events.borrow(), vec!["open", "close"]);
    }

    #[test]
    fn closed_resource_cannot_be_used() {
        let (resource, _events) = recording(false);
        let mut scoped = Scoped::new(resource);
        scoped.close();
        assert!(matches!(
            scoped.resource_mut(),
            Err(QueryError::ResourceClosed(ResourceKind::Statement))
        ));
    }

    #[test]
    fn none_is_a_no_op() {
        close_resource::<RecordingResource>(None);
    }

    #[test]
    fn tracker_counts_until_close() {
        let tracker = ResourceTracker::new();
        let (first, _) = recording(false);
        let (second, _) = recording(true);
        let mut first = Scoped::tracked(first, &tracker);
        let second = Scoped::tracked(second, &tracker);
        assert_eq!(tracker.open_count(), 2);

        first.close();
        first.close();
        assert_eq!(tracker.open_count(), 1);

        drop(second);
        assert_eq!(tracker.open_count(), 0);
    }

    #[test]
    fn plain_statement_runs_successive_queries() {
        let conn = Connection::open_in_memory().expect("open sqlite");
        let mut stmt = Scoped::new(PlainStatement::new(&conn));
        let plain = stmt.resource_mut().expect("statement open");
        plain
            .execute_update("CREATE TABLE t (name TEXT)")
            .expect("create table");
        let inserted = plain
            .execute_update("INSERT INTO t VALUES ('a'), ('b')")
            .expect("insert rows");
        assert_eq!(inserted, 2);

        let mut names = Vec::new();
        let mut rows = plain
            .execute_query("SELECT name FROM t ORDER BY name")
            .expect("select rows");
        while let Some(row) = rows.next().expect("next row") {
            names.push(row.get::<_, String>(0).expect("name column"));
        }
        drop(rows);
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);

        stmt.close();
        assert!(stmt.is_closed());
    }
}

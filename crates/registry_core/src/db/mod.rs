//! Pooled database access: data sources, connection acquisition and the
//! scoped resource guard every DAO is built on.
//!
//! # Responsibility
//! - Resolve named pools to connections (`provider`).
//! - Manage bounded SQLite pools (`pool`).
//! - Guarantee statements and result sets are closed on every exit path
//!   (`guard`, `dao`).
//!
//! # Invariants
//! - A connection handle is owned by exactly one DAO and released once.
//! - Query resources never outlive the call that opened them.

pub mod dao;
pub mod guard;
pub mod pool;
pub mod provider;

pub use dao::Dao;
pub use guard::{
    close_resource, PlainStatement, QueryError, QueryResource, ResourceKind, ResourceTracker,
    Scoped,
};
pub use pool::{DataSource, DataSourceError, PooledConnection, SqliteDataSource};
pub use provider::{
    AcquireStage, AcquireState, Acquisition, ConnectionError, ConnectionHandle,
    ConnectionProvider,
};

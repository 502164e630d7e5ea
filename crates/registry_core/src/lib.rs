//! Persistence core for the biological data registry.
//!
//! Resolves named connection pools through a layered naming directory,
//! scopes every statement and result set opened on a pooled connection, and
//! folds sorted one-to-many query rows into grouped records.

pub mod config;
pub mod db;
pub mod grouping;
pub mod logging;
pub mod model;
pub mod naming;
pub mod repo;

pub use config::{PoolDescriptor, PoolOptions, ProviderConfig};
pub use db::{
    ConnectionError, ConnectionHandle, ConnectionProvider, Dao, DataSource, DataSourceError,
    QueryError, SqliteDataSource,
};
pub use grouping::{aggregate, group_rows, try_aggregate, FlatRow, GroupRecord};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::annotation::{AnnotationGroup, AnnotationTag};
pub use model::qualifier::{Qualifier, QualifierGroup, QualifierType};
pub use naming::{
    install_global_directory, GlobalInitialContext, InitialContextFactory, MemoryContext,
    NamingContext, NamingError, StaticInitialContext,
};
pub use repo::annotation_dao::{AnnotationDao, AnnotationRepository};
pub use repo::qualifiers_dao::{QualifierRepository, QualifiersDao};

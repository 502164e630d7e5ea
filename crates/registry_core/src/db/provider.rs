//! Connection acquisition through the layered naming lookup.
//!
//! # Responsibility
//! - Resolve `root → env → jdbc/<pool><suffix> → connection` as an explicit,
//!   forward-only state progression.
//! - Log every failed step with its cause before the chain stops.
//!
//! # Invariants
//! - Each `acquire` ends in exactly one terminal state: `ConnectionAcquired`
//!   or `Failed` carrying the cause.
//! - There is no retry; callers re-invoke `acquire` themselves.
//! - Checkout runs under the bound data source's mutex.

use crate::config::{PoolDescriptor, ProviderConfig};
use crate::db::guard::QueryError;
use crate::db::pool::{DataSourceError, PooledConnection};
use crate::naming::{BoundDataSource, InitialContextFactory, NamingContext, NamingError};
use log::{debug, error, info, trace};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Instant;

/// Stage reached by one acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStage {
    Unresolved,
    ContextResolved,
    EnvResolved,
    DataSourceResolved,
    ConnectionAcquired,
    Failed,
}

impl AcquireStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unresolved => "unresolved",
            Self::ContextResolved => "context_resolved",
            Self::EnvResolved => "env_resolved",
            Self::DataSourceResolved => "data_source_resolved",
            Self::ConnectionAcquired => "connection_acquired",
            Self::Failed => "failed",
        }
    }
}

/// Terminal failures of the acquisition chain.
#[derive(Debug)]
pub enum ConnectionError {
    /// The root naming context could not be resolved.
    NamingFailure(NamingError),
    /// The environment sub-context could not be resolved.
    EnvironmentFailure(NamingError),
    /// Nothing usable is bound at the computed data-source key.
    DataSourceNotFound { key: String, source: NamingError },
    /// The data source refused to hand out a connection.
    ConnectionAcquisitionFailure { key: String, source: DataSourceError },
}

impl ConnectionError {
    /// Last stage successfully reached before the failure.
    pub fn reached_stage(&self) -> AcquireStage {
        match self {
            Self::NamingFailure(_) => AcquireStage::Unresolved,
            Self::EnvironmentFailure(_) => AcquireStage::ContextResolved,
            Self::DataSourceNotFound { .. } => AcquireStage::EnvResolved,
            Self::ConnectionAcquisitionFailure { .. } => AcquireStage::DataSourceResolved,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::NamingFailure(_) => "naming_failure",
            Self::EnvironmentFailure(_) => "environment_failure",
            Self::DataSourceNotFound { .. } => "data_source_not_found",
            Self::ConnectionAcquisitionFailure { .. } => "connection_acquisition_failure",
        }
    }
}

impl Display for ConnectionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NamingFailure(err) => write!(f, "no initial naming context: {err}"),
            Self::EnvironmentFailure(err) => write!(f, "no environment context: {err}"),
            Self::DataSourceNotFound { key, source } => {
                write!(f, "no data source `{key}` available: {source}")
            }
            Self::ConnectionAcquisitionFailure { key, source } => {
                write!(f, "unable to get a connection from `{key}`: {source}")
            }
        }
    }
}

impl Error for ConnectionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::NamingFailure(err) => Some(err),
            Self::EnvironmentFailure(err) => Some(err),
            Self::DataSourceNotFound { source, .. } => Some(source),
            Self::ConnectionAcquisitionFailure { source, .. } => Some(source),
        }
    }
}

/// State of one acquisition, carrying whatever the last step resolved.
pub enum AcquireState {
    Unresolved,
    ContextResolved(Arc<dyn NamingContext>),
    EnvResolved(Arc<dyn NamingContext>),
    DataSourceResolved(Arc<BoundDataSource>),
    ConnectionAcquired(ConnectionHandle),
    Failed(ConnectionError),
}

impl AcquireState {
    pub fn stage(&self) -> AcquireStage {
        match self {
            Self::Unresolved => AcquireStage::Unresolved,
            Self::ContextResolved(_) => AcquireStage::ContextResolved,
            Self::EnvResolved(_) => AcquireStage::EnvResolved,
            Self::DataSourceResolved(_) => AcquireStage::DataSourceResolved,
            Self::ConnectionAcquired(_) => AcquireStage::ConnectionAcquired,
            Self::Failed(_) => AcquireStage::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ConnectionAcquired(_) | Self::Failed(_))
    }

    /// Advances exactly one step. Terminal states are returned unchanged.
    pub fn step(
        self,
        factory: &dyn InitialContextFactory,
        config: &ProviderConfig,
        descriptor: &PoolDescriptor,
    ) -> AcquireState {
        match self {
            Self::Unresolved => match factory.initial_context() {
                Ok(root) => Self::ContextResolved(root),
                Err(err) => fail("ctx_lookup", ConnectionError::NamingFailure(err)),
            },
            Self::ContextResolved(root) => {
                let name = config.env_context.as_str();
                match root.lookup(name).and_then(|b| b.into_context(name)) {
                    Ok(env) => Self::EnvResolved(env),
                    Err(err) => fail("env_lookup", ConnectionError::EnvironmentFailure(err)),
                }
            }
            Self::EnvResolved(env) => {
                let key = descriptor.lookup_key();
                match env.lookup(&key).and_then(|b| b.into_data_source(&key)) {
                    Ok(source) => Self::DataSourceResolved(source),
                    Err(source) => fail(
                        "ds_lookup",
                        ConnectionError::DataSourceNotFound { key, source },
                    ),
                }
            }
            Self::DataSourceResolved(source) => match source.checkout() {
                Ok(conn) => Self::ConnectionAcquired(ConnectionHandle::new(
                    conn,
                    descriptor.clone(),
                )),
                Err(err) => fail(
                    "ds_checkout",
                    ConnectionError::ConnectionAcquisitionFailure {
                        key: descriptor.lookup_key(),
                        source: err,
                    },
                ),
            },
            terminal => terminal,
        }
    }
}

fn fail(event: &str, err: ConnectionError) -> AcquireState {
    error!(
        "event={event} module=provider status=error error_code={} error={err}",
        err.code()
    );
    AcquireState::Failed(err)
}

/// Outcome of one traced acquisition.
pub struct Acquisition {
    /// Stages visited in order, ending with the terminal one.
    pub stages: Vec<AcquireStage>,
    pub result: Result<ConnectionHandle, ConnectionError>,
}

/// Resolves named pools to live connection handles.
pub struct ConnectionProvider {
    factory: Arc<dyn InitialContextFactory>,
    config: ProviderConfig,
}

impl ConnectionProvider {
    pub fn new(factory: Arc<dyn InitialContextFactory>, config: ProviderConfig) -> Self {
        Self { factory, config }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn descriptor(&self, pool_name: &str) -> PoolDescriptor {
        PoolDescriptor::new(pool_name, &self.config)
    }

    /// Data-source key for `pool_name`, e.g. `jdbc/qualhx`.
    pub fn resolve_key(&self, pool_name: &str) -> String {
        self.descriptor(pool_name).lookup_key()
    }

    /// Resolves `pool_name` to a live connection.
    pub fn acquire(&self, pool_name: &str) -> Result<ConnectionHandle, ConnectionError> {
        self.acquire_traced(pool_name).result
    }

    /// Like [`ConnectionProvider::acquire`], also reporting visited stages.
    pub fn acquire_traced(&self, pool_name: &str) -> Acquisition {
        let started_at = Instant::now();
        let descriptor = self.descriptor(pool_name);
        let key = descriptor.lookup_key();
        let mut state = AcquireState::Unresolved;
        let mut stages = vec![state.stage()];

        let result = loop {
            state = match state {
                AcquireState::ConnectionAcquired(handle) => break Ok(handle),
                AcquireState::Failed(err) => break Err(err),
                pending => {
                    let from = pending.stage();
                    let next = pending.step(self.factory.as_ref(), &self.config, &descriptor);
                    trace!(
                        "event=conn_acquire module=provider status=step key={} from={} to={}",
                        key,
                        from.as_str(),
                        next.stage().as_str()
                    );
                    stages.push(next.stage());
                    next
                }
            };
        };

        match &result {
            Ok(_) => info!(
                "event=conn_acquire module=provider status=ok key={} duration_ms={}",
                key,
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=conn_acquire module=provider status=error key={} reached={} error_code={} duration_ms={} error={}",
                key,
                err.reached_stage().as_str(),
                err.code(),
                started_at.elapsed().as_millis(),
                err
            ),
        }

        Acquisition { stages, result }
    }
}

/// A checked-out connection owned by exactly one data-access object.
pub struct ConnectionHandle {
    conn: PooledConnection,
    descriptor: PoolDescriptor,
}

impl ConnectionHandle {
    fn new(conn: PooledConnection, descriptor: PoolDescriptor) -> Self {
        debug!(
            "event=conn_handle module=provider status=ok key={} data_source={}",
            descriptor.lookup_key(),
            conn.data_source_name()
        );
        Self { conn, descriptor }
    }

    /// Borrows the live connection; fails once released.
    pub fn connection(&self) -> Result<&Connection, QueryError> {
        self.conn.connection().ok_or(QueryError::ConnectionReleased)
    }

    pub fn descriptor(&self) -> &PoolDescriptor {
        &self.descriptor
    }

    pub fn pool_key(&self) -> String {
        self.descriptor.lookup_key()
    }

    pub fn is_released(&self) -> bool {
        self.conn.is_released()
    }

    /// Returns the connection to its pool. Later calls do nothing.
    pub fn release(&mut self) {
        if self.conn.is_released() {
            trace!(
                "event=conn_release module=provider status=skipped key={}",
                self.descriptor.lookup_key()
            );
            return;
        }
        self.conn.release();
        debug!(
            "event=conn_release module=provider status=ok key={}",
            self.descriptor.lookup_key()
        );
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if !self.conn.is_released() {
            debug!(
                "event=conn_release module=provider status=implicit key={}",
                self.descriptor.lookup_key()
            );
            self.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AcquireStage, AcquireState, ConnectionError, ConnectionProvider};
    use crate::config::{PoolOptions, ProviderConfig};
    use crate::db::pool::SqliteDataSource;
    use crate::naming::{
        InitialContextFactory, MemoryContext, NamingContext, NamingError, NamingResult,
        StaticInitialContext,
    };
    use std::sync::Arc;

    struct NoRoot;

    impl InitialContextFactory for NoRoot {
        fn initial_context(&self) -> NamingResult<Arc<dyn NamingContext>> {
            Err(NamingError::NoInitialContext)
        }
    }

    fn provider_with_qual_pool() -> ConnectionProvider {
        let env = Arc::new(MemoryContext::new());
        env.bind_data_source(
            "jdbc/qualhx",
            Arc::new(SqliteDataSource::open_in_memory("qual", PoolOptions::default())),
        )
        .expect("bind data source");
        let root = Arc::new(MemoryContext::new());
        root.bind_context("env", env).expect("bind env");
        ConnectionProvider::new(
            Arc::new(StaticInitialContext::new(root)),
            ProviderConfig::default(),
        )
    }

    #[test]
    fn successful_acquire_visits_every_stage_in_order() {
        let provider = provider_with_qual_pool();
        let acquisition = provider.acquire_traced("qual");
        assert_eq!(
            acquisition.stages,
            vec![
                AcquireStage::Unresolved,
                AcquireStage::ContextResolved,
                AcquireStage::EnvResolved,
                AcquireStage::DataSourceResolved,
                AcquireStage::ConnectionAcquired,
            ]
        );
        let handle = acquisition.result.expect("connection acquired");
        assert_eq!(handle.pool_key(), "jdbc/qualhx");
    }

    #[test]
    fn missing_root_context_fails_at_first_step() {
        let provider = ConnectionProvider::new(Arc::new(NoRoot), ProviderConfig::default());
        let acquisition = provider.acquire_traced("qual");
        assert_eq!(
            acquisition.stages,
            vec![AcquireStage::Unresolved, AcquireStage::Failed]
        );
        let err = acquisition.result.err().expect("acquire should fail");
        assert!(matches!(err, ConnectionError::NamingFailure(_)));
        assert_eq!(err.reached_stage(), AcquireStage::Unresolved);
    }

    #[test]
    fn unknown_pool_name_reports_the_computed_key() {
        let provider = provider_with_qual_pool();
        match provider.acquire("missing") {
            Err(ConnectionError::DataSourceNotFound { key, source }) => {
                assert_eq!(key, "jdbc/missinghx");
                assert_eq!(source, NamingError::NameNotBound("jdbc/missinghx".to_string()));
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("missing pool should not resolve"),
        }
    }

    #[test]
    fn terminal_states_do_not_advance() {
        let provider = provider_with_qual_pool();
        let descriptor = provider.descriptor("qual");
        let failed = AcquireState::Failed(ConnectionError::NamingFailure(
            NamingError::NoInitialContext,
        ));
        let next = failed.step(&NoRoot, provider.config(), &descriptor);
        assert_eq!(next.stage(), AcquireStage::Failed);
        assert!(next.is_terminal());
    }

    #[test]
    fn release_is_idempotent() {
        let provider = provider_with_qual_pool();
        let mut handle = provider.acquire("qual").expect("connection acquired");
        handle.release();
        handle.release();
        assert!(handle.is_released());
        assert!(handle.connection().is_err());
    }
}

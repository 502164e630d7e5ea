//! Hierarchical naming directory used to locate data sources.
//!
//! # Responsibility
//! - Model the root context → environment context → data-source lookup path.
//! - Own the per-data-source checkout mutex (`BoundDataSource`).
//!
//! # Invariants
//! - A name is bound at most once per context.
//! - Checkout from one data source is serialized however many times, and in
//!   however many contexts, it is bound. Distinct data sources never contend.
//!   The lock is keyed by the address of the shared `Arc<dyn DataSource>`.

use crate::db::pool::{DataSource, DataSourceError, PooledConnection};
use log::debug;
use once_cell::sync::{Lazy, OnceCell};
use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

pub type NamingResult<T> = Result<T, NamingError>;

/// Naming directory lookup/bind errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamingError {
    /// No root context is available to start a lookup from.
    NoInitialContext,
    EmptyName,
    NameNotBound(String),
    AlreadyBound(String),
    NotAContext(String),
    NotADataSource(String),
}

impl Display for NamingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoInitialContext => write!(f, "no initial naming context available"),
            Self::EmptyName => write!(f, "naming lookup requires a non-empty name"),
            Self::NameNotBound(name) => write!(f, "name `{name}` is not bound"),
            Self::AlreadyBound(name) => write!(f, "name `{name}` is already bound"),
            Self::NotAContext(name) => write!(f, "`{name}` is not a naming context"),
            Self::NotADataSource(name) => write!(f, "`{name}` is not a data source"),
        }
    }
}

impl Error for NamingError {}

/// Live checkout locks by data-source address. An entry can only be upgraded
/// while some `BoundDataSource` still holds both the lock and the source, so a
/// reused address never inherits a stale lock.
static CHECKOUT_LOCKS: Lazy<Mutex<HashMap<usize, Weak<Mutex<()>>>>> =
    Lazy::new(Default::default);

fn checkout_lock_for(source: &Arc<dyn DataSource>) -> Arc<Mutex<()>> {
    let key = Arc::as_ptr(source) as *const () as usize;
    let mut locks = CHECKOUT_LOCKS
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(lock) = locks.get(&key).and_then(Weak::upgrade) {
        return lock;
    }
    locks.retain(|_, lock| lock.strong_count() > 0);
    let lock = Arc::new(Mutex::new(()));
    locks.insert(key, Arc::downgrade(&lock));
    lock
}

/// A data source together with the mutex that serializes its checkout path.
///
/// Every `BoundDataSource` wrapping the same `Arc<dyn DataSource>` shares one
/// mutex.
pub struct BoundDataSource {
    source: Arc<dyn DataSource>,
    checkout_lock: Arc<Mutex<()>>,
}

impl BoundDataSource {
    pub fn new(source: Arc<dyn DataSource>) -> Self {
        let checkout_lock = checkout_lock_for(&source);
        Self {
            source,
            checkout_lock,
        }
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    /// Checks a connection out while holding this data source's mutex.
    pub fn checkout(&self) -> Result<PooledConnection, DataSourceError> {
        let _serialized = self
            .checkout_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.source.get_connection()
    }
}

/// Value bound under a name.
#[derive(Clone)]
pub enum Binding {
    Context(Arc<dyn NamingContext>),
    DataSource(Arc<BoundDataSource>),
}

impl Binding {
    pub fn into_context(self, name: &str) -> NamingResult<Arc<dyn NamingContext>> {
        match self {
            Self::Context(context) => Ok(context),
            Self::DataSource(_) => Err(NamingError::NotAContext(name.to_string())),
        }
    }

    pub fn into_data_source(self, name: &str) -> NamingResult<Arc<BoundDataSource>> {
        match self {
            Self::DataSource(source) => Ok(source),
            Self::Context(_) => Err(NamingError::NotADataSource(name.to_string())),
        }
    }
}

/// One level of the naming directory.
pub trait NamingContext: Send + Sync {
    fn lookup(&self, name: &str) -> NamingResult<Binding>;
}

/// In-process naming context.
#[derive(Default)]
pub struct MemoryContext {
    bindings: RwLock<BTreeMap<String, Binding>>,
}

impl MemoryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, name: &str, binding: Binding) -> NamingResult<()> {
        let name = normalize_name(name)?;
        let mut bindings = self
            .bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if bindings.contains_key(name) {
            return Err(NamingError::AlreadyBound(name.to_string()));
        }
        debug!("event=naming_bind module=naming status=ok name={name}");
        bindings.insert(name.to_string(), binding);
        Ok(())
    }

    /// Binds a child context and returns it.
    pub fn bind_context(
        &self,
        name: &str,
        context: Arc<dyn NamingContext>,
    ) -> NamingResult<Arc<dyn NamingContext>> {
        self.bind(name, Binding::Context(Arc::clone(&context)))?;
        Ok(context)
    }

    /// Binds a data source behind its own checkout mutex and returns the
    /// bound handle, which may be bound again under further names.
    pub fn bind_data_source(
        &self,
        name: &str,
        source: Arc<dyn DataSource>,
    ) -> NamingResult<Arc<BoundDataSource>> {
        let bound = Arc::new(BoundDataSource::new(source));
        self.bind(name, Binding::DataSource(Arc::clone(&bound)))?;
        Ok(bound)
    }

    pub fn unbind(&self, name: &str) -> NamingResult<Binding> {
        let name = normalize_name(name)?;
        self.bindings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .ok_or_else(|| NamingError::NameNotBound(name.to_string()))
    }

    /// Bound names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }
}

impl NamingContext for MemoryContext {
    fn lookup(&self, name: &str) -> NamingResult<Binding> {
        let name = normalize_name(name)?;
        self.bindings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .ok_or_else(|| NamingError::NameNotBound(name.to_string()))
    }
}

fn normalize_name(name: &str) -> NamingResult<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(NamingError::EmptyName);
    }
    Ok(trimmed)
}

/// Produces the root context a lookup starts from.
pub trait InitialContextFactory: Send + Sync {
    fn initial_context(&self) -> NamingResult<Arc<dyn NamingContext>>;
}

/// Factory returning an explicitly injected root context.
#[derive(Clone)]
pub struct StaticInitialContext {
    root: Arc<dyn NamingContext>,
}

impl StaticInitialContext {
    pub fn new(root: Arc<dyn NamingContext>) -> Self {
        Self { root }
    }
}

impl InitialContextFactory for StaticInitialContext {
    fn initial_context(&self) -> NamingResult<Arc<dyn NamingContext>> {
        Ok(Arc::clone(&self.root))
    }
}

static GLOBAL_DIRECTORY: OnceCell<Arc<dyn NamingContext>> = OnceCell::new();

/// Installs the process-wide root context. Only the first call wins.
pub fn install_global_directory(root: Arc<dyn NamingContext>) -> NamingResult<()> {
    GLOBAL_DIRECTORY
        .set(root)
        .map_err(|_| NamingError::AlreadyBound("<global>".to_string()))
}

/// Factory resolving the process-wide root context installed with
/// [`install_global_directory`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GlobalInitialContext;

impl InitialContextFactory for GlobalInitialContext {
    fn initial_context(&self) -> NamingResult<Arc<dyn NamingContext>> {
        GLOBAL_DIRECTORY
            .get()
            .cloned()
            .ok_or(NamingError::NoInitialContext)
    }
}

#![allow(dead_code)]

use registry_core::naming::{BoundDataSource, NamingContext};
use registry_core::{
    ConnectionProvider, DataSource, MemoryContext, PoolOptions, ProviderConfig, SqliteDataSource,
    StaticInitialContext,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const REGISTRY_SCHEMA_SQL: &str = "
CREATE TABLE biom_qualifiers_types (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    def TEXT,
    namespace TEXT
);
CREATE TABLE biom_qualifiers (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    def TEXT,
    ptr_type INTEGER NOT NULL
);
CREATE TABLE mir_annotation (
    id INTEGER PRIMARY KEY,
    format TEXT NOT NULL,
    name TEXT NOT NULL,
    information TEXT
);
CREATE TABLE mir_anno_link (
    ptr_datatype TEXT NOT NULL,
    ptr_annotation INTEGER NOT NULL
);
";

pub fn pool_options(max_connections: usize) -> PoolOptions {
    PoolOptions {
        max_connections,
        busy_timeout: Duration::from_millis(500),
    }
}

/// Root → `env` directory with direct access to the env context for binding.
pub struct Directory {
    pub root: Arc<MemoryContext>,
    pub env: Arc<MemoryContext>,
}

impl Directory {
    pub fn new() -> Self {
        let root = Arc::new(MemoryContext::new());
        let env = Arc::new(MemoryContext::new());
        let env_context: Arc<dyn NamingContext> = env.clone();
        root.bind_context("env", env_context).unwrap();
        Self { root, env }
    }

    pub fn bind(&self, key: &str, source: Arc<dyn DataSource>) -> Arc<BoundDataSource> {
        self.env.bind_data_source(key, source).unwrap()
    }

    pub fn provider(&self, config: ProviderConfig) -> ConnectionProvider {
        let root: Arc<dyn NamingContext> = self.root.clone();
        ConnectionProvider::new(Arc::new(StaticInitialContext::new(root)), config)
    }
}

/// File-backed pool bound as `jdbc/<pool>hx` with the registry tables created.
pub struct Fixture {
    pub dir: TempDir,
    pub source: SqliteDataSource,
    pub directory: Directory,
    pub provider: ConnectionProvider,
}

pub fn fixture(pool_name: &str) -> Fixture {
    fixture_with(pool_name, pool_options(4))
}

pub fn fixture_with(pool_name: &str, options: PoolOptions) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let source = SqliteDataSource::open(pool_name, dir.path().join("registry.sqlite3"), options);
    {
        let conn = source.get_connection().unwrap();
        conn.connection()
            .unwrap()
            .execute_batch(REGISTRY_SCHEMA_SQL)
            .unwrap();
    }

    let directory = Directory::new();
    directory.bind(&format!("jdbc/{pool_name}hx"), Arc::new(source.clone()));
    let provider = directory.provider(ProviderConfig::default());

    Fixture {
        dir,
        source,
        directory,
        provider,
    }
}

impl Fixture {
    pub fn execute(&self, sql: &str) {
        let conn = self.source.get_connection().unwrap();
        conn.connection().unwrap().execute_batch(sql).unwrap();
    }

    pub fn seed_qualifiers(&self) {
        self.execute(
            "INSERT INTO biom_qualifiers_types (id, name, def, namespace) VALUES
                (1, 'model', 'Model qualifiers', 'bqmodel'),
                (2, 'biology', 'Biology qualifiers', 'bqbiol');
             INSERT INTO biom_qualifiers (name, def, ptr_type) VALUES
                ('isDescribedBy', 'described by', 1),
                ('is', 'identity', 1),
                ('isVersionOf', NULL, 2),
                ('hasPart', 'part', 2),
                ('encodes', 'encodes', 2);",
        );
    }
}

//! Qualifier registry persistence.
//!
//! # Responsibility
//! - List qualifier types and qualifiers grouped by type.
//! - Register new qualifiers under an existing type.
//!
//! # Invariants
//! - Listings are ordered by type name (descending, `GROUP_KEY` collation)
//!   and then by qualifier name, which is the order the grouping pass expects.
//! - Empty listings are `Ok(vec![])`; query failures are `Err`.
//! - A qualifier is never inserted under an unknown type.

use crate::config::{PoolDescriptor, ProviderConfig};
use crate::db::guard::QueryError;
use crate::db::provider::{ConnectionError, ConnectionProvider};
use crate::db::Dao;
use crate::grouping::{try_aggregate, FlatRow};
use crate::model::qualifier::{Qualifier, QualifierGroup, QualifierType};
use log::info;
use rusqlite::{OptionalExtension, Row};

/// Pool the qualifier tables live in.
pub const QUALIFIERS_POOL: &str = "qual";

const EXISTING_TYPES_SQL: &str =
    "SELECT DISTINCT name FROM biom_qualifiers_types ORDER BY name DESC";

const ALL_QUALIFIERS_SQL: &str = "SELECT
    t.name AS type_name,
    t.def AS type_def,
    t.namespace AS type_namespace,
    q.name AS name,
    q.def AS def
FROM biom_qualifiers q
INNER JOIN biom_qualifiers_types t ON q.ptr_type = t.id
ORDER BY t.name COLLATE GROUP_KEY DESC, q.name ASC";

const QUALIFIER_EXISTS_SQL: &str = "SELECT EXISTS(
    SELECT 1
    FROM biom_qualifiers q
    INNER JOIN biom_qualifiers_types t ON q.ptr_type = t.id
    WHERE q.name LIKE ?1 AND t.name LIKE ?2
)";

const TYPE_ID_SQL: &str = "SELECT id FROM biom_qualifiers_types WHERE name LIKE ?1 LIMIT 1";

const INSERT_QUALIFIER_SQL: &str =
    "INSERT INTO biom_qualifiers (name, def, ptr_type) VALUES (?1, ?2, ?3)";

/// Data access contract for the qualifier registry.
pub trait QualifierRepository {
    fn existing_types(&self) -> Result<Vec<String>, QueryError>;
    fn all_qualifiers(&self) -> Result<Vec<QualifierGroup>, QueryError>;
    fn is_existing_qualifier(&self, type_name: &str, name: &str) -> Result<bool, QueryError>;
    fn qualifier_type_id(&self, type_name: &str) -> Result<Option<i64>, QueryError>;
    fn add_qualifier(&self, type_name: &str, qualifier: &Qualifier) -> Result<bool, QueryError>;
}

struct QualifierRow {
    type_name: String,
    type_definition: Option<String>,
    type_namespace: Option<String>,
    name: String,
    definition: Option<String>,
}

impl QualifierRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            type_name: row.get("type_name")?,
            type_definition: row.get("type_def")?,
            type_namespace: row.get("type_namespace")?,
            name: row.get("name")?,
            definition: row.get("def")?,
        })
    }
}

impl FlatRow for QualifierRow {
    type Group = QualifierType;
    type Member = Qualifier;

    fn group_key(&self) -> &str {
        &self.type_name
    }

    fn split(self) -> (Self::Group, Self::Member) {
        (
            QualifierType {
                definition: self.type_definition,
                namespace: self.type_namespace,
            },
            Qualifier::new(self.name, self.definition),
        )
    }
}

/// Qualifier DAO over the `qual` pool.
pub struct QualifiersDao {
    dao: Dao,
}

impl QualifiersDao {
    pub fn connect(provider: &ConnectionProvider) -> Result<Self, ConnectionError> {
        Self::connect_to(provider, QUALIFIERS_POOL)
    }

    /// Like [`QualifiersDao::connect`] for a differently named pool.
    pub fn connect_to(
        provider: &ConnectionProvider,
        pool_name: &str,
    ) -> Result<Self, ConnectionError> {
        Ok(Self::from_dao(Dao::connect(provider, pool_name)?))
    }

    pub fn from_dao(dao: Dao) -> Self {
        Self { dao }
    }

    pub fn dao(&self) -> &Dao {
        &self.dao
    }

    /// Pool key this DAO resolves under `config`, e.g. `jdbc/qualhx`.
    pub fn pool_key(config: &ProviderConfig) -> String {
        PoolDescriptor::new(QUALIFIERS_POOL, config).lookup_key()
    }

    pub fn release(&mut self) {
        self.dao.release();
    }
}

impl QualifierRepository for QualifiersDao {
    fn existing_types(&self) -> Result<Vec<String>, QueryError> {
        self.dao.run("existing_types", |dao| {
            let mut stmt = dao.open_statement()?;
            let mut rows = stmt.resource_mut()?.execute_query(EXISTING_TYPES_SQL)?;
            let mut types: Vec<String> = Vec::new();
            while let Some(row) = rows.next()? {
                types.push(row.get::<_, String>("name")?);
            }
            Ok(types)
        })
    }

    fn all_qualifiers(&self) -> Result<Vec<QualifierGroup>, QueryError> {
        self.dao.run("all_qualifiers", |dao| {
            let mut stmt = dao.open_prepared_statement(ALL_QUALIFIERS_SQL)?;
            let rows = stmt.resource_mut()?.query_map([], QualifierRow::from_row)?;
            Ok(try_aggregate(rows)?)
        })
    }

    fn is_existing_qualifier(&self, type_name: &str, name: &str) -> Result<bool, QueryError> {
        self.dao.run("is_existing_qualifier", |dao| {
            let mut stmt = dao.open_prepared_statement(QUALIFIER_EXISTS_SQL)?;
            let prepared = stmt.resource_mut()?;
            prepared.raw_bind_parameter(1, name)?;
            prepared.raw_bind_parameter(2, type_name)?;
            let mut rows = prepared.raw_query();
            let exists = match rows.next()? {
                Some(row) => row.get::<_, i64>(0)? != 0,
                None => false,
            };
            Ok(exists)
        })
    }

    fn qualifier_type_id(&self, type_name: &str) -> Result<Option<i64>, QueryError> {
        self.dao.run("qualifier_type_id", |dao| {
            let mut stmt = dao.open_prepared_statement(TYPE_ID_SQL)?;
            let id = stmt
                .resource_mut()?
                .query_row([type_name], |row| row.get::<_, i64>(0))
                .optional()?;
            Ok(id)
        })
    }

    fn add_qualifier(&self, type_name: &str, qualifier: &Qualifier) -> Result<bool, QueryError> {
        qualifier
            .validate()
            .map_err(|err| QueryError::InvalidData(err.to_string()))?;

        if self.is_existing_qualifier(type_name, &qualifier.name)? {
            info!(
                "event=qualifier_add module=repo status=skipped reason=exists type={} name={}",
                type_name, qualifier.name
            );
            return Ok(false);
        }

        let type_id = self
            .qualifier_type_id(type_name)?
            .ok_or_else(|| QueryError::InvalidData(format!("unknown qualifier type `{type_name}`")))?;

        self.dao.run("add_qualifier", |dao| {
            let mut stmt = dao.open_prepared_statement(INSERT_QUALIFIER_SQL)?;
            let prepared = stmt.resource_mut()?;
            prepared.raw_bind_parameter(1, qualifier.name.as_str())?;
            prepared.raw_bind_parameter(2, &qualifier.definition)?;
            prepared.raw_bind_parameter(3, &type_id)?;
            prepared.raw_execute()?;
            Ok(())
        })?;

        info!(
            "event=qualifier_add module=repo status=ok type={} name={}",
            type_name, qualifier.name
        );
        Ok(true)
    }
}

//! Annotation examples per data type.
//!
//! # Invariants
//! - Annotations are read ordered by format (`GROUP_KEY` collation) and then
//!   name, so each format yields exactly one group.
//! - Formats are grouped case-insensitively: `SBML` and `sbml` form one
//!   group keyed by whichever spelling comes first.

use crate::db::guard::QueryError;
use crate::db::provider::{ConnectionError, ConnectionProvider};
use crate::db::Dao;
use crate::grouping::{aggregate, FlatRow};
use crate::model::annotation::{AnnotationGroup, AnnotationTag};
use rusqlite::Row;

/// Pool the registry's data-type tables live in.
pub const REGISTRY_POOL: &str = "miriam";

const FORMATS_SQL: &str = "SELECT DISTINCT format FROM mir_annotation ORDER BY format DESC";

const ANNOTATIONS_FOR_DATA_TYPE_SQL: &str = "SELECT
    anno.id AS id,
    anno.format AS format,
    anno.name AS name,
    anno.information AS information
FROM mir_annotation anno
INNER JOIN mir_anno_link link ON link.ptr_annotation = anno.id
WHERE link.ptr_datatype = ?1
ORDER BY anno.format COLLATE GROUP_KEY, anno.name";

pub trait AnnotationRepository {
    fn formats(&self) -> Result<Vec<String>, QueryError>;
    fn annotations_for_data_type(
        &self,
        data_type_id: &str,
    ) -> Result<Vec<AnnotationGroup>, QueryError>;
}

struct AnnotationRow {
    format: String,
    tag: AnnotationTag,
}

impl AnnotationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            format: row.get("format")?,
            tag: AnnotationTag {
                id: row.get("id")?,
                name: row.get("name")?,
                information: row.get("information")?,
            },
        })
    }
}

impl FlatRow for AnnotationRow {
    type Group = ();
    type Member = AnnotationTag;

    fn group_key(&self) -> &str {
        &self.format
    }

    fn split(self) -> (Self::Group, Self::Member) {
        ((), self.tag)
    }
}

pub struct AnnotationDao {
    dao: Dao,
}

impl AnnotationDao {
    pub fn connect(provider: &ConnectionProvider) -> Result<Self, ConnectionError> {
        Self::connect_to(provider, REGISTRY_POOL)
    }

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

    pub fn release(&mut self) {
        self.dao.release();
    }
}

impl AnnotationRepository for AnnotationDao {
    fn formats(&self) -> Result<Vec<String>, QueryError> {
        self.dao.run("formats", |dao| {
            let mut stmt = dao.open_statement()?;
            let mut rows = stmt.resource_mut()?.execute_query(FORMATS_SQL)?;
            let mut formats: Vec<String> = Vec::new();
            while let Some(row) = rows.next()? {
                formats.push(row.get::<_, String>("format")?);
            }
            Ok(formats)
        })
    }

    fn annotations_for_data_type(
        &self,
        data_type_id: &str,
    ) -> Result<Vec<AnnotationGroup>, QueryError> {
        self.dao.run("annotations_for_data_type", |dao| {
            let mut stmt = dao.open_prepared_statement(ANNOTATIONS_FOR_DATA_TYPE_SQL)?;
            let prepared = stmt.resource_mut()?;
            prepared.raw_bind_parameter(1, data_type_id)?;

            let mut result_set = dao.open_result_set(prepared.raw_query());
            let mut parsed = Vec::new();
            let cursor = result_set.resource_mut()?;
            while let Some(row) = cursor.next()? {
                parsed.push(AnnotationRow::from_row(row)?);
            }
            dao.close_result_set(Some(&mut result_set));

            Ok(aggregate(parsed))
        })
    }
}

//! Annotation examples attached to data types, grouped by format.

use crate::grouping::GroupRecord;
use serde::{Deserialize, Serialize};

/// One annotation example (an element or attribute of a format that can
/// carry identifiers of a data type).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationTag {
    pub id: i64,
    pub name: String,
    pub information: Option<String>,
}

/// Tags of one annotation format, e.g. `SBML`. The key is the format name;
/// formats carry no extra metadata.
pub type AnnotationGroup = GroupRecord<(), AnnotationTag>;

//! Biological qualifier model.
//!
//! # Responsibility
//! - Describe qualifiers (relationship terms such as `isVersionOf`) and the
//!   qualifier types that group them.
//!
//! # Invariants
//! - A qualifier name is never empty or surrounded by whitespace once
//!   validated.
//! - `QualifierGroup::key` is the qualifier type name.

use crate::grouping::GroupRecord;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// A single qualifier term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Qualifier {
    pub name: String,
    /// Free-text definition, absent for terms registered without one.
    pub definition: Option<String>,
}

/// Validation errors for qualifier input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QualifierValidationError {
    EmptyName,
    UntrimmedName(String),
}

impl Display for QualifierValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyName => write!(f, "qualifier name must not be empty"),
            Self::UntrimmedName(name) => {
                write!(f, "qualifier name `{name}` has leading or trailing whitespace")
            }
        }
    }
}

impl Error for QualifierValidationError {}

impl Qualifier {
    pub fn new(name: impl Into<String>, definition: Option<String>) -> Self {
        Self {
            name: name.into(),
            definition,
        }
    }

    pub fn validate(&self) -> Result<(), QualifierValidationError> {
        if self.name.trim().is_empty() {
            return Err(QualifierValidationError::EmptyName);
        }
        if self.name.trim() != self.name {
            return Err(QualifierValidationError::UntrimmedName(self.name.clone()));
        }
        Ok(())
    }
}

impl Display for Qualifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.definition {
            Some(definition) => write!(f, "{} ({definition})", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Type-level fields shared by every qualifier of one type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualifierType {
    pub definition: Option<String>,
    pub namespace: Option<String>,
}

/// All qualifiers registered under one type, in name order.
pub type QualifierGroup = GroupRecord<QualifierType, Qualifier>;

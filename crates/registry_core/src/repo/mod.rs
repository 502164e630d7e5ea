//! Registry DAOs built on [`crate::db::Dao`].
//!
//! # Responsibility
//! - Hold the SQL for each registry area and map rows into `model` types.
//! - Group one-to-many listings with [`crate::grouping`].
//!
//! # Invariants
//! - Every listing query orders rows by its group key.
//! - Parameters are bound positionally; SQL text is never built from input.

pub mod annotation_dao;
pub mod qualifiers_dao;

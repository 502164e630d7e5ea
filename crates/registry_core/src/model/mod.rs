//! Registry domain models.
//!
//! # Responsibility
//! - Define the records produced by the registry DAOs.
//! - Keep row-to-model mapping out of these types; DAOs own that.

pub mod annotation;
pub mod qualifier;

//! Field extraction from the reconciled layout.
//!
//! Infallible by construction: a field nothing matches is reported as
//! missing, never as an error.

pub mod amounts;
pub mod dates;
pub mod extractor;
pub mod patterns;
pub mod table;

pub use extractor::FieldExtractor;
pub use patterns::{FieldKey, Specificity, ALL_FIELDS, SUPPLEMENTARY_FIELDS};

//! # Schema Module
//!
//! JSON Schema Draft 2020-12 validation with custom formats (`uuid`,
//! `date-time`, `email`), full error collection, an optional
//! unknown-field post-pass, and a thread-safe cache of compiled validators.

mod cache;
mod validate;

pub use cache::ValidatorCache;
pub use validate::{SchemaError, SchemaValidator};

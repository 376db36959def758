//! # OpenAPI Module
//!
//! OpenAPI 3.x specification parsing for contract conformance checks.
//!
//! The loader accepts YAML or JSON, rejects non-3.x versions, compiles each
//! path template into an anchored regex matcher (one named capture per
//! `{param}`, each matching a single path segment), and resolves local
//! `$ref`s inline. Lookup walks routes in declaration order and returns the
//! first full-string match together with the captured parameter map.

mod load;
mod types;

pub use load::{load_openapi, openapi_from_value, openapi_from_value_with};
pub use types::{ApiSpec, OperationSchema, RouteSchema, SpecInfo};

//! Policy expression evaluation.
//!
//! Policies reference the request through a small CEL-style predicate
//! language. Two backends implement the same [`Evaluator`] contract:
//!
//! - [`SafeEvaluator`] - the built-in backend. It recognizes a fixed safe
//!   grammar via a hand-written recursive-descent parser and never executes
//!   anything beyond comparisons over the context tree.
//! - `CelBackend` (feature `full-cel`) - full CEL grammar on top of the
//!   `cel` crate, with a concurrency-safe compiled-program cache.
//!
//! Both backends are pure: the same expression and context always produce
//! the same result, and the context value is never mutated.

use serde_json::Value;
use thiserror::Error;

mod eval;
mod parser;

#[cfg(feature = "full-cel")]
mod full;

pub use eval::SafeEvaluator;

#[cfg(feature = "full-cel")]
pub use full::CelBackend;

/// Expression evaluation failure, always carrying the source expression.
///
/// The driver records these as low-severity `policy.cel_error.*` hits; they
/// never abort the pipeline.
#[derive(Debug, Error)]
pub enum CelError {
    #[error("unsupported expression pattern: {expression}")]
    Unsupported { expression: String },
    #[error("evaluation failed for `{expression}`: {message}")]
    Evaluation { expression: String, message: String },
}

/// Contract shared by the safe and full-grammar backends.
pub trait Evaluator: Send + Sync {
    /// Evaluate `expression` against the rendered context tree
    /// ([`crate::context::RequestContext::to_value`]).
    fn evaluate(&self, expression: &str, context: &Value) -> Result<bool, CelError>;
}

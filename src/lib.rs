//! # apisentry
//!
//! **apisentry** is an in-process API security gateway that sits on the HTTP
//! request path of a web service and decides, per request, whether to ALLOW,
//! BLOCK, or MONITOR it.
//!
//! ## Overview
//!
//! Three evaluation surfaces feed one decision:
//!
//! - **Contract conformance** - the request is matched against an
//!   [OpenAPI 3.x](https://spec.openapis.org/oas/v3.1.0) specification and
//!   its JSON body validated against the operation's request schema
//!   (JSON Schema Draft 2020-12, all errors collected).
//! - **Vulnerability scanning** - the body JSON is walked depth-first by
//!   per-family detectors (SQL injection, XSS, SSRF, path traversal,
//!   prototype pollution, NoSQL injection, command injection).
//! - **Policy rules** - a declarative policy file binds CEL-style
//!   predicates, webhook verification, contract refs, and request limits to
//!   routes, each with an action and severity.
//!
//! Findings are severity-weighted into a risk score; any HIGH or CRITICAL
//! hit blocks in enforce mode, while monitor mode records the same evidence
//! and forwards. The host framework stays in charge of the socket: apisentry
//! only ever returns "forward" or a synthesized JSON block response.
//!
//! ## Architecture
//!
//! - **[`context`]** - normalization of the raw request into a frozen
//!   evaluation context (headers, query, hashed body, identity)
//! - **[`openapi`]** - OpenAPI 3.x parsing, compiled path-template matchers,
//!   local `$ref` resolution
//! - **[`schema`]** - JSON Schema validation with custom formats and a
//!   compiled-validator cache
//! - **[`policy`]** - policy file model and loading, route lookup,
//!   effective-setting queries
//! - **[`cel`]** - safe built-in expression evaluator, plus an optional
//!   full-grammar backend behind the same trait (feature `full-cel`)
//! - **[`scanner`]** - composite vulnerability scanner over the body JSON
//! - **[`webhook`]** - provider webhook signature and replay-window checks
//! - **[`risk`]** - rule hits, risk scoring, and the decision reducer
//! - **[`middleware`]** - the pipeline driver invoked per request
//!
//! Control flow per request:
//!
//! ```text
//! Driver -> Normalizer -> (Scanner | Schema Validator | Policy Rules)
//!        -> Risk Reducer -> ALLOW (forward) | BLOCK (synthesized response)
//! ```
//!
//! The context is produced once and shared read-only with every evaluator;
//! evaluators are pure and hits are ordered `[vuln…, schema…, policy…]`, so
//! the decision reason is deterministic.
//!
//! ## Quick Start
//!
//! ```no_run
//! use apisentry::middleware::{Gateway, GatewayConfig, Outcome};
//! use apisentry::context::RawRequest;
//! use http::Method;
//!
//! # fn main() -> Result<(), apisentry::ConfigError> {
//! let mut config = GatewayConfig::new();
//! config.policy_path = Some("policy.yaml".to_string());
//! config.openapi_path = Some("openapi.yaml".to_string());
//! config.exclude_paths = vec![r"^/health$".to_string()];
//! let gateway = Gateway::new(config)?;
//!
//! // In your framework's middleware hook:
//! let request = RawRequest::new(Method::POST, "/users")
//!     .header("Content-Type", "application/json")
//!     .body(br#"{"name":"A","email":"a@example.com"}"#.to_vec());
//!
//! match gateway.handle(&request) {
//!     Outcome::Forward { context, decision } => {
//!         // hand off downstream; context carries identity, body hash, ...
//!     }
//!     Outcome::Block { response, decision } => {
//!         // answer with response.status / response.body
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! One [`middleware::Gateway`] is built at startup and shared. Loaded policy
//! and spec data are read-only after construction; the schema-validator and
//! expression-program caches are insert-if-absent behind locks, and readers
//! only observe fully constructed entries. The pipeline itself runs on the
//! caller's thread with no cross-request mutable state.

pub mod cel;
pub mod context;
mod errors;
pub mod ids;
pub mod middleware;
pub mod openapi;
pub mod policy;
pub mod risk;
pub mod scanner;
pub mod schema;
pub mod webhook;

pub use cel::{CelError, Evaluator, SafeEvaluator};
pub use context::{Identity, RawRequest, RequestContext};
pub use errors::{ConfigError, ContextError};
pub use ids::RequestId;
pub use middleware::{DecisionEvent, Gateway, GatewayConfig, Mode, Outcome};
pub use openapi::{load_openapi, ApiSpec};
pub use policy::{load_policy, PolicySet};
pub use risk::{Action, Decision, RiskLevel, RiskScore, RuleHit, Severity};
pub use scanner::{Finding, VulnerabilityScanner};

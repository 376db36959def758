//! # Middleware Module
//!
//! The pipeline driver. The host HTTP framework hands each request to
//! [`Gateway::handle`], which runs the fixed evaluation order - exclusion
//! check, context normalization, vulnerability scan, OpenAPI contract
//! validation, policy rules - reduces the findings to a decision, emits one
//! decision event, and either forwards the request or synthesizes a block
//! response.
//!
//! ## Example
//!
//! ```rust
//! use apisentry::middleware::{Gateway, GatewayConfig, Outcome};
//! use apisentry::context::RawRequest;
//! use http::Method;
//!
//! # fn main() -> Result<(), apisentry::ConfigError> {
//! let gateway = Gateway::new(GatewayConfig::new())?;
//!
//! let request = RawRequest::new(Method::GET, "/health");
//! match gateway.handle(&request) {
//!     Outcome::Forward { .. } => { /* call the downstream handler */ }
//!     Outcome::Block { response, .. } => {
//!         assert_eq!(response.content_type, "application/json");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod core;
mod event;

pub use config::{DecisionCallback, GatewayConfig, IdentityProvider, Mode};
pub use core::{BlockResponse, Gateway, Outcome};
pub use event::DecisionEvent;

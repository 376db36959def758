//! # Policy Module
//!
//! In-memory representation and loading of policy sets.
//!
//! A policy file (`policyVersion: "0.1"`, YAML or JSON) declares defaults,
//! an ordered list of routes, and shared schema components. Routes match on
//! exact `(method, path)` pairs; path templating is the OpenAPI spec's job.
//! Each route carries typed rules (`cel`, `webhook-signature`,
//! `webhook-replay`, `contract`, `limits`) with an action/severity envelope.
//!
//! [`PolicySet`] answers the route-lookup and effective-setting queries the
//! pipeline driver needs: per-route overrides win over defaults for mode,
//! limits, and vulnerability checks.

mod load;
mod types;

pub use load::{load_policy, policy_from_value};
pub use types::{
    ContractConfig, DetectorToggle, Limits, PolicyDefaults, PolicyMode, PolicyRoute, PolicyRule,
    PolicySet, ResponseDefaults, RouteMatchSpec, RuleAction, RuleKind, UnmatchedAction,
    VulnerabilityChecks, VulnerabilityOverrides, WebhookConfig,
};

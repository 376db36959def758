use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::event::DecisionEvent;
use crate::cel::Evaluator;
use crate::context::{Identity, RawRequest};
use crate::openapi::ApiSpec;
use crate::policy::{PolicySet, VulnerabilityChecks};

/// Gateway operating mode.
///
/// `learning` evaluates and records like `monitor`; it never blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Enforce,
    Monitor,
    Learning,
}

impl Mode {
    pub fn is_enforcing(self) -> bool {
        matches!(self, Mode::Enforce)
    }
}

/// Hook invoked with the raw request before evaluators run; the returned
/// identity is installed into the context. Absent, requests evaluate as
/// unauthenticated.
pub type IdentityProvider = Arc<dyn Fn(&RawRequest) -> Option<Identity> + Send + Sync>;

/// Synchronous decision sink, invoked once per evaluated request.
pub type DecisionCallback = Arc<dyn Fn(&DecisionEvent) + Send + Sync>;

/// Gateway configuration.
///
/// Policy and OpenAPI inputs may be given preloaded or as file paths; a
/// preloaded value wins over its path counterpart.
#[derive(Clone)]
pub struct GatewayConfig {
    pub policy: Option<PolicySet>,
    pub policy_path: Option<String>,
    pub openapi: Option<ApiSpec>,
    pub openapi_path: Option<String>,

    pub validate_request: bool,
    /// Accepted for compatibility; response-body validation is not
    /// performed.
    pub validate_response: bool,

    pub enable_vulnerability_scan: bool,
    /// Baseline detector toggles, used when no policy provides effective
    /// settings.
    pub vulnerability_checks: VulnerabilityChecks,

    pub mode: Mode,

    pub block_response_code: u16,
    /// Replaces the default `{"error": "Forbidden", "message": <reason>}`
    /// block body when set.
    pub block_response_body: Option<Value>,

    pub log_decisions: bool,
    pub log_callback: Option<DecisionCallback>,

    /// Body read cap in bytes.
    pub max_body_size: usize,

    /// Regex patterns matched against the request path with a start anchor;
    /// matching requests bypass the pipeline entirely.
    pub exclude_paths: Vec<String>,

    /// Full-grammar expression backend; the built-in safe evaluator is used
    /// when absent.
    pub cel_evaluator: Option<Arc<dyn Evaluator>>,
    pub identity_provider: Option<IdentityProvider>,

    /// Service and environment names stamped into the context runtime info.
    pub service: Option<String>,
    pub env: Option<String>,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Enforce
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayConfig {
    pub fn new() -> Self {
        GatewayConfig {
            policy: None,
            policy_path: None,
            openapi: None,
            openapi_path: None,
            validate_request: true,
            validate_response: false,
            enable_vulnerability_scan: true,
            vulnerability_checks: VulnerabilityChecks::default(),
            mode: Mode::Enforce,
            block_response_code: 403,
            block_response_body: None,
            log_decisions: true,
            log_callback: None,
            max_body_size: 1024 * 1024,
            exclude_paths: Vec::new(),
            cel_evaluator: None,
            identity_provider: None,
            service: None,
            env: None,
        }
    }
}

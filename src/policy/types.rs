use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::risk::Severity;

/// Policy enforcement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    Enforce,
    Monitor,
}

/// Action taken when no policy route matches the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnmatchedAction {
    Allow,
    Block,
    Monitor,
}

/// Action a rule takes when it triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    /// Suppress the hit entirely (carve-outs).
    Allow,
    Block,
    /// Record the hit but exempt it from the block gate.
    Monitor,
}

/// A detector toggle: a plain flag, or a map of detector-specific options.
/// An options map enables the detector unless it carries `enabled: false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DetectorToggle {
    Flag(bool),
    Options(serde_json::Map<String, Value>),
}

impl DetectorToggle {
    pub fn is_enabled(&self) -> bool {
        match self {
            DetectorToggle::Flag(enabled) => *enabled,
            DetectorToggle::Options(options) => options
                .get("enabled")
                .and_then(Value::as_bool)
                .unwrap_or(true),
        }
    }
}

impl From<bool> for DetectorToggle {
    fn from(enabled: bool) -> Self {
        DetectorToggle::Flag(enabled)
    }
}

fn toggle_on() -> DetectorToggle {
    DetectorToggle::Flag(true)
}

fn toggle_off() -> DetectorToggle {
    DetectorToggle::Flag(false)
}

/// Vulnerability scanning configuration. NoSQL and command injection are
/// opt-in; the rest default on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilityChecks {
    #[serde(default = "toggle_on")]
    pub sqli: DetectorToggle,
    #[serde(default = "toggle_on")]
    pub xss: DetectorToggle,
    #[serde(default = "toggle_on")]
    pub prototype_pollution: DetectorToggle,
    #[serde(default = "toggle_on")]
    pub path_traversal: DetectorToggle,
    #[serde(default = "toggle_on")]
    pub ssrf_internal: DetectorToggle,
    #[serde(default = "toggle_off")]
    pub nosql_injection: DetectorToggle,
    #[serde(default = "toggle_off")]
    pub command_injection: DetectorToggle,
}

impl Default for VulnerabilityChecks {
    fn default() -> Self {
        VulnerabilityChecks {
            sqli: toggle_on(),
            xss: toggle_on(),
            prototype_pollution: toggle_on(),
            path_traversal: toggle_on(),
            ssrf_internal: toggle_on(),
            nosql_injection: toggle_off(),
            command_injection: toggle_off(),
        }
    }
}

impl VulnerabilityChecks {
    pub fn all_enabled() -> Self {
        VulnerabilityChecks {
            sqli: toggle_on(),
            xss: toggle_on(),
            prototype_pollution: toggle_on(),
            path_traversal: toggle_on(),
            ssrf_internal: toggle_on(),
            nosql_injection: toggle_on(),
            command_injection: toggle_on(),
        }
    }

    /// Apply per-route overrides on top of these defaults.
    pub fn merged(&self, overrides: &VulnerabilityOverrides) -> VulnerabilityChecks {
        VulnerabilityChecks {
            sqli: overrides.sqli.clone().unwrap_or_else(|| self.sqli.clone()),
            xss: overrides.xss.clone().unwrap_or_else(|| self.xss.clone()),
            prototype_pollution: overrides
                .prototype_pollution
                .clone()
                .unwrap_or_else(|| self.prototype_pollution.clone()),
            path_traversal: overrides
                .path_traversal
                .clone()
                .unwrap_or_else(|| self.path_traversal.clone()),
            ssrf_internal: overrides
                .ssrf_internal
                .clone()
                .unwrap_or_else(|| self.ssrf_internal.clone()),
            nosql_injection: overrides
                .nosql_injection
                .clone()
                .unwrap_or_else(|| self.nosql_injection.clone()),
            command_injection: overrides
                .command_injection
                .clone()
                .unwrap_or_else(|| self.command_injection.clone()),
        }
    }
}

/// Per-route vulnerability toggle overrides; unset fields inherit defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VulnerabilityOverrides {
    pub sqli: Option<DetectorToggle>,
    pub xss: Option<DetectorToggle>,
    pub prototype_pollution: Option<DetectorToggle>,
    pub path_traversal: Option<DetectorToggle>,
    pub ssrf_internal: Option<DetectorToggle>,
    pub nosql_injection: Option<DetectorToggle>,
    pub command_injection: Option<DetectorToggle>,
}

/// Request limits. All limits are non-negative by construction.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Limits {
    pub max_body_bytes: Option<u64>,
    pub max_json_depth: Option<u64>,
    pub max_array_length: Option<u64>,
}

impl Limits {
    /// Per-route value if set, otherwise the default.
    pub fn merged(&self, route: &Limits) -> Limits {
        Limits {
            max_body_bytes: route.max_body_bytes.or(self.max_body_bytes),
            max_json_depth: route.max_json_depth.or(self.max_json_depth),
            max_array_length: route.max_array_length.or(self.max_array_length),
        }
    }
}

/// Contract validation configuration for a route.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractConfig {
    pub request_schema_ref: Option<String>,
    pub response_schema_ref: Option<String>,
    #[serde(default)]
    pub reject_unknown_fields: bool,
}

fn default_timestamp_tolerance() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

/// Webhook verification configuration for a route.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    /// Provider name: `github`, `stripe`, or `slack`.
    pub provider: String,
    /// Environment variable holding the shared secret.
    pub secret_ref: Option<String>,
    /// Inline secret. Prefer `secretRef`.
    pub secret: Option<String>,
    /// Maximum accepted signature timestamp skew, in seconds.
    #[serde(default = "default_timestamp_tolerance")]
    pub timestamp_tolerance: u64,
    #[serde(default = "default_true")]
    pub replay_protection: bool,
}

/// Typed rule payload. Policy files carry a free-form `config` map per rule;
/// the loader resolves it into one of these variants.
#[derive(Debug, Clone)]
pub enum RuleKind {
    Cel {
        expr: String,
        message: Option<String>,
    },
    WebhookSignature,
    WebhookReplay,
    Contract {
        /// Overrides the route's contract ref when set.
        schema_ref: Option<String>,
        reject_unknown_fields: Option<bool>,
    },
    Limits,
}

impl RuleKind {
    /// Wire name of the rule type, as written in policy files.
    pub fn type_name(&self) -> &'static str {
        match self {
            RuleKind::Cel { .. } => "cel",
            RuleKind::WebhookSignature => "webhook-signature",
            RuleKind::WebhookReplay => "webhook-replay",
            RuleKind::Contract { .. } => "contract",
            RuleKind::Limits => "limits",
        }
    }
}

/// One policy rule: the typed payload plus its action/severity envelope.
#[derive(Debug, Clone)]
pub struct PolicyRule {
    pub id: String,
    pub action: RuleAction,
    pub severity: Severity,
    pub kind: RuleKind,
}

/// Route matching criteria. Policy routes match on exact method and path;
/// templating lives in the OpenAPI spec, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteMatchSpec {
    pub method: String,
    pub path: String,
}

/// Policy route definition.
#[derive(Debug, Clone)]
pub struct PolicyRoute {
    pub id: String,
    pub match_spec: RouteMatchSpec,
    pub mode: Option<PolicyMode>,
    pub contract: Option<ContractConfig>,
    pub webhook: Option<WebhookConfig>,
    pub vulnerability: Option<VulnerabilityOverrides>,
    pub rules: Vec<PolicyRule>,
    pub limits: Option<Limits>,
}

/// Block-response defaults.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDefaults {
    pub block_status_code: u16,
}

impl Default for ResponseDefaults {
    fn default() -> Self {
        ResponseDefaults {
            block_status_code: 403,
        }
    }
}

/// Default policy settings, overridable per route where noted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyDefaults {
    pub mode: PolicyMode,
    pub unmatched_route_action: UnmatchedAction,
    pub response: ResponseDefaults,
    pub limits: Limits,
    pub vulnerability_checks: VulnerabilityChecks,
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        PolicyDefaults {
            mode: PolicyMode::Enforce,
            unmatched_route_action: UnmatchedAction::Allow,
            response: ResponseDefaults::default(),
            limits: Limits::default(),
            vulnerability_checks: VulnerabilityChecks::default(),
        }
    }
}

/// Complete policy configuration: defaults, ordered routes, and shared
/// schema components.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    pub policy_version: String,
    pub defaults: PolicyDefaults,
    pub routes: Vec<PolicyRoute>,
    pub components: serde_json::Map<String, Value>,
}

impl PolicySet {
    /// Find the matching route for a method and exact path. The first route
    /// whose `(method, path)` matches wins.
    pub fn find_route(&self, method: &str, path: &str) -> Option<&PolicyRoute> {
        self.routes.iter().find(|route| {
            route.match_spec.method.eq_ignore_ascii_case(method) && route.match_spec.path == path
        })
    }

    /// Effective mode for a route: route override, else the default.
    pub fn effective_mode(&self, route: Option<&PolicyRoute>) -> PolicyMode {
        route.and_then(|r| r.mode).unwrap_or(self.defaults.mode)
    }

    /// Effective limits for a route, merged field by field.
    pub fn effective_limits(&self, route: Option<&PolicyRoute>) -> Limits {
        match route.and_then(|r| r.limits.as_ref()) {
            Some(limits) => self.defaults.limits.merged(limits),
            None => self.defaults.limits,
        }
    }

    /// Effective vulnerability checks for a route, merged field by field.
    pub fn effective_vulnerability_checks(
        &self,
        route: Option<&PolicyRoute>,
    ) -> VulnerabilityChecks {
        match route.and_then(|r| r.vulnerability.as_ref()) {
            Some(overrides) => self.defaults.vulnerability_checks.merged(overrides),
            None => self.defaults.vulnerability_checks.clone(),
        }
    }
}

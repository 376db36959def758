use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::info;

use super::types::{
    ContractConfig, Limits, PolicyDefaults, PolicyRoute, PolicyRule, PolicySet, PolicyMode,
    RouteMatchSpec, RuleAction, RuleKind, VulnerabilityOverrides, WebhookConfig,
};
use crate::errors::ConfigError;
use crate::risk::Severity;

const SUPPORTED_VERSION: &str = "0.1";

fn default_version() -> String {
    SUPPORTED_VERSION.to_string()
}

fn unnamed() -> String {
    "unnamed".to_string()
}

fn default_action() -> RuleAction {
    RuleAction::Block
}

fn default_severity() -> Severity {
    Severity::High
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum RawRuleType {
    Cel,
    WebhookSignature,
    WebhookReplay,
    Contract,
    Limits,
}

fn default_rule_type() -> RawRuleType {
    RawRuleType::Cel
}

#[derive(Debug, Deserialize)]
struct RawRule {
    #[serde(default = "unnamed")]
    id: String,
    #[serde(rename = "type", default = "default_rule_type")]
    rule_type: RawRuleType,
    #[serde(default = "default_action")]
    action: RuleAction,
    #[serde(default = "default_severity")]
    severity: Severity,
    #[serde(default)]
    config: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRoute {
    #[serde(default = "unnamed")]
    id: String,
    #[serde(rename = "match")]
    match_spec: RouteMatchSpec,
    #[serde(default)]
    mode: Option<PolicyMode>,
    #[serde(default)]
    contract: Option<ContractConfig>,
    #[serde(default)]
    webhook: Option<WebhookConfig>,
    #[serde(default)]
    vulnerability: Option<VulnerabilityOverrides>,
    #[serde(default)]
    rules: Vec<RawRule>,
    #[serde(default)]
    limits: Option<Limits>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPolicy {
    #[serde(default = "default_version")]
    policy_version: String,
    #[serde(default)]
    defaults: PolicyDefaults,
    #[serde(default)]
    routes: Vec<RawRoute>,
    #[serde(default)]
    components: serde_json::Map<String, Value>,
}

fn string_option(config: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| config.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

fn build_rule(raw: RawRule, route_id: &str) -> Result<PolicyRule, ConfigError> {
    let kind = match raw.rule_type {
        RawRuleType::Cel => {
            let expr = string_option(&raw.config, &["expr", "expression", "condition"])
                .ok_or_else(|| ConfigError::Parse {
                    path: format!("routes/{route_id}/rules/{}", raw.id),
                    message: "cel rule has no expression in config".to_string(),
                })?;
            RuleKind::Cel {
                expr,
                message: string_option(&raw.config, &["message"]),
            }
        }
        RawRuleType::WebhookSignature => RuleKind::WebhookSignature,
        RawRuleType::WebhookReplay => RuleKind::WebhookReplay,
        RawRuleType::Contract => RuleKind::Contract {
            schema_ref: string_option(&raw.config, &["requestSchemaRef", "schemaRef"]),
            reject_unknown_fields: raw
                .config
                .get("rejectUnknownFields")
                .and_then(Value::as_bool),
        },
        RawRuleType::Limits => RuleKind::Limits,
    };
    Ok(PolicyRule {
        id: raw.id,
        action: raw.action,
        severity: raw.severity,
        kind,
    })
}

/// Build a [`PolicySet`] from a parsed document.
///
/// Unknown keys are ignored; unknown enum values and unsupported policy
/// versions fail loading. Route ids must be unique.
pub fn policy_from_value(value: Value) -> Result<PolicySet, ConfigError> {
    let raw: RawPolicy = serde_json::from_value(value).map_err(|e| ConfigError::Parse {
        path: "<policy>".to_string(),
        message: e.to_string(),
    })?;

    if raw.policy_version != SUPPORTED_VERSION {
        return Err(ConfigError::UnsupportedPolicyVersion(raw.policy_version));
    }

    let mut seen_ids = HashSet::new();
    let mut routes = Vec::with_capacity(raw.routes.len());
    for raw_route in raw.routes {
        if !seen_ids.insert(raw_route.id.clone()) {
            return Err(ConfigError::DuplicateRouteId(raw_route.id));
        }
        let rules = raw_route
            .rules
            .into_iter()
            .map(|r| build_rule(r, &raw_route.id))
            .collect::<Result<Vec<_>, _>>()?;
        routes.push(PolicyRoute {
            id: raw_route.id,
            match_spec: raw_route.match_spec,
            mode: raw_route.mode,
            contract: raw_route.contract,
            webhook: raw_route.webhook,
            vulnerability: raw_route.vulnerability,
            rules,
            limits: raw_route.limits,
        });
    }

    info!(
        route_count = routes.len(),
        component_count = raw.components.len(),
        "Policy loaded"
    );

    Ok(PolicySet {
        policy_version: raw.policy_version,
        defaults: raw.defaults,
        routes,
        components: raw.components,
    })
}

/// Load a policy set from a YAML or JSON file.
pub fn load_policy(file_path: &str) -> Result<PolicySet, ConfigError> {
    let content = std::fs::read_to_string(file_path).map_err(|source| ConfigError::Io {
        path: file_path.to_string(),
        source,
    })?;
    let value: Value = if file_path.ends_with(".yaml") || file_path.ends_with(".yml") {
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: file_path.to_string(),
            message: e.to_string(),
        })?
    } else {
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: file_path.to_string(),
            message: e.to_string(),
        })?
    };
    policy_from_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_a_minimal_policy() {
        let policy = policy_from_value(json!({
            "policyVersion": "0.1",
            "defaults": {"mode": "enforce", "unmatchedRouteAction": "allow"},
            "routes": [{
                "id": "users-create",
                "match": {"method": "POST", "path": "/users"},
                "rules": [{
                    "id": "auth",
                    "type": "cel",
                    "action": "block",
                    "severity": "high",
                    "config": {"expr": "identity.authenticated == true"},
                }],
            }],
        }))
        .unwrap();

        assert_eq!(policy.policy_version, "0.1");
        assert_eq!(policy.routes.len(), 1);
        let rule = &policy.routes[0].rules[0];
        assert_eq!(rule.id, "auth");
        assert_eq!(rule.action, RuleAction::Block);
        assert!(matches!(&rule.kind, RuleKind::Cel { expr, .. }
            if expr == "identity.authenticated == true"));
    }

    #[test]
    fn rejects_unsupported_version() {
        let err = policy_from_value(json!({"policyVersion": "0.2"})).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedPolicyVersion(v) if v == "0.2"));
    }

    #[test]
    fn rejects_duplicate_route_ids() {
        let err = policy_from_value(json!({
            "routes": [
                {"id": "r", "match": {"method": "GET", "path": "/a"}},
                {"id": "r", "match": {"method": "GET", "path": "/b"}},
            ],
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateRouteId(id) if id == "r"));
    }

    #[test]
    fn unknown_enum_value_fails_loading() {
        let err = policy_from_value(json!({
            "defaults": {"mode": "audit"},
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let policy = policy_from_value(json!({
            "policyVersion": "0.1",
            "futureFeature": {"x": 1},
            "routes": [],
        }))
        .unwrap();
        assert!(policy.routes.is_empty());
    }

    #[test]
    fn cel_rule_without_expression_fails() {
        let err = policy_from_value(json!({
            "routes": [{
                "id": "r",
                "match": {"method": "GET", "path": "/a"},
                "rules": [{"id": "bad", "type": "cel"}],
            }],
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn negative_limits_fail_loading() {
        let err = policy_from_value(json!({
            "defaults": {"limits": {"maxBodyBytes": -1}},
        }))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn webhook_config_defaults() {
        let policy = policy_from_value(json!({
            "routes": [{
                "id": "hook",
                "match": {"method": "POST", "path": "/webhooks/github"},
                "webhook": {"provider": "github", "secretRef": "GITHUB_WEBHOOK_SECRET"},
                "rules": [
                    {"id": "sig", "type": "webhook-signature", "severity": "critical"},
                    {"id": "replay", "type": "webhook-replay", "severity": "high"},
                ],
            }],
        }))
        .unwrap();
        let webhook = policy.routes[0].webhook.as_ref().unwrap();
        assert_eq!(webhook.timestamp_tolerance, 300);
        assert!(webhook.replay_protection);
        assert!(matches!(
            policy.routes[0].rules[0].kind,
            RuleKind::WebhookSignature
        ));
    }
}

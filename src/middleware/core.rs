use regex::Regex;
use serde_json::{json, Value};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Instant, SystemTime};
use tracing::{debug, info, warn};

use super::config::{DecisionCallback, GatewayConfig, IdentityProvider, Mode};
use super::event::DecisionEvent;
use crate::cel::{Evaluator, SafeEvaluator};
use crate::context::{normalize, RawRequest, RequestContext, RuntimeInfo, WebhookInfo};
use crate::errors::ConfigError;
use crate::openapi::{load_openapi, ApiSpec};
use crate::policy::{
    load_policy, PolicyMode, PolicyRoute, PolicySet, RuleAction, RuleKind, UnmatchedAction,
};
use crate::risk::{reduce, Action, Decision, RuleHit, Severity};
use crate::scanner::VulnerabilityScanner;
use crate::schema::ValidatorCache;
use crate::webhook;

/// Synthesized deny response.
#[derive(Debug, Clone)]
pub struct BlockResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Value,
}

/// What the caller should do with the request.
#[derive(Debug)]
pub enum Outcome {
    /// Hand control to the downstream handler. Context and decision are
    /// absent when the pipeline short-circuited (excluded path, or a
    /// monitor-mode normalization failure).
    Forward {
        context: Option<Box<RequestContext>>,
        decision: Option<Decision>,
    },
    /// Answer with the synthesized block response instead of forwarding.
    Block {
        response: BlockResponse,
        decision: Option<Decision>,
    },
}

/// The policy decision pipeline.
///
/// One gateway is built per service at startup and shared across requests;
/// all loaded configuration is read-only after construction, and the
/// validator/program caches are safe for concurrent use. [`Gateway::handle`]
/// runs the full pipeline for one request on the caller's thread:
/// exclusions, context normalization, vulnerability scan, contract
/// validation, policy rules, risk reduction, and the decision event.
pub struct Gateway {
    mode: Mode,
    policy: Option<PolicySet>,
    spec: Option<ApiSpec>,
    validate_request: bool,
    scan_enabled: bool,
    scanner: VulnerabilityScanner,
    evaluator: Arc<dyn Evaluator>,
    validators: ValidatorCache,
    exclude: Vec<Regex>,
    block_status: u16,
    block_body: Option<Value>,
    log_decisions: bool,
    callback: Option<DecisionCallback>,
    identity_provider: Option<IdentityProvider>,
    max_body_size: usize,
    service: Option<String>,
    env: Option<String>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        let policy = match (config.policy, config.policy_path.as_deref()) {
            (Some(policy), _) => Some(policy),
            (None, Some(path)) => Some(load_policy(path)?),
            (None, None) => None,
        };

        let spec = match (config.openapi, config.openapi_path.as_deref()) {
            (Some(spec), _) => Some(spec),
            (None, Some(path)) => Some(load_openapi(path)?),
            (None, None) => None,
        };

        let exclude = config
            .exclude_paths
            .iter()
            .map(|pattern| {
                Regex::new(&format!("^(?:{pattern})")).map_err(|e| {
                    ConfigError::InvalidExcludePattern {
                        pattern: pattern.clone(),
                        message: e.to_string(),
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        // A non-default configured status wins; otherwise the policy's
        // block status applies.
        let block_status = if config.block_response_code != 403 {
            config.block_response_code
        } else {
            policy
                .as_ref()
                .map(|p| p.defaults.response.block_status_code)
                .unwrap_or(403)
        };

        info!(
            mode = ?config.mode,
            policy_routes = policy.as_ref().map(|p| p.routes.len()).unwrap_or(0),
            openapi_routes = spec.as_ref().map(|s| s.routes.len()).unwrap_or(0),
            vulnerability_scan = config.enable_vulnerability_scan,
            validate_request = config.validate_request,
            exclusions = exclude.len(),
            "Gateway initialized"
        );

        Ok(Gateway {
            mode: config.mode,
            policy,
            spec,
            validate_request: config.validate_request,
            scan_enabled: config.enable_vulnerability_scan,
            scanner: VulnerabilityScanner::new(config.vulnerability_checks),
            evaluator: config
                .cel_evaluator
                .unwrap_or_else(|| Arc::new(SafeEvaluator::new())),
            validators: ValidatorCache::new(),
            exclude,
            block_status,
            block_body: config.block_response_body,
            log_decisions: config.log_decisions,
            callback: config.log_callback,
            identity_provider: config.identity_provider,
            max_body_size: config.max_body_size,
            service: config.service,
            env: config.env,
        })
    }

    /// Run the pipeline for one request.
    pub fn handle(&self, raw: &RawRequest) -> Outcome {
        let started = Instant::now();
        let path = raw.path();

        if self.exclude.iter().any(|pattern| pattern.is_match(path)) {
            debug!(path = path, "Path excluded from evaluation");
            return Outcome::Forward {
                context: None,
                decision: None,
            };
        }

        let runtime = RuntimeInfo {
            language: "rust",
            service: self.service.clone(),
            env: self.env.clone(),
        };
        let mut ctx = match normalize(raw, self.max_body_size, runtime) {
            Ok(ctx) => ctx,
            Err(error) => {
                warn!(
                    method = %raw.method,
                    path = path,
                    error = %error,
                    enforcing = self.mode.is_enforcing(),
                    "Request normalization failed"
                );
                if self.mode.is_enforcing() {
                    return Outcome::Block {
                        response: self
                            .block_response(400, &format!("Request parsing failed: {error}")),
                        decision: None,
                    };
                }
                return Outcome::Forward {
                    context: None,
                    decision: None,
                };
            }
        };

        if let Some(provider) = &self.identity_provider {
            if let Some(identity) = provider.as_ref()(raw) {
                ctx.identity = identity;
            }
        }

        let policy_route = self
            .policy
            .as_ref()
            .and_then(|p| p.find_route(ctx.method.as_str(), &ctx.path));

        let mut hits: Vec<RuleHit> = Vec::new();

        // 1. Vulnerability scan over the body JSON.
        if self.scan_enabled {
            if let Some(body) = &ctx.body.json {
                let findings = match &self.policy {
                    Some(policy) => self
                        .scanner
                        .scan_with(body, &policy.effective_vulnerability_checks(policy_route)),
                    None => self.scanner.scan(body),
                };
                hits.extend(findings.iter().map(|f| f.to_rule_hit()));
            }
        }

        // 2. Contract validation against the matched OpenAPI operation.
        let openapi_matched = self.validate_schema(&ctx, policy_route, &mut hits);

        // 3. Policy rules and unmatched-route handling.
        let mut webhook_info = WebhookInfo::default();
        if let Some(policy) = &self.policy {
            match policy_route {
                Some(route) => {
                    let cel_value = ctx.to_value();
                    self.evaluate_rules(
                        policy,
                        route,
                        &ctx,
                        &cel_value,
                        &mut hits,
                        &mut webhook_info,
                    );
                }
                None => {
                    if !openapi_matched {
                        self.push_unmatched_hit(policy, &ctx, &mut hits);
                    }
                }
            }
        }
        ctx.webhook = webhook_info;

        // 4. Reduce to a decision, then apply the effective mode.
        let mut decision = reduce(hits, self.block_status);
        let policy_monitoring = self
            .policy
            .as_ref()
            .map(|p| p.effective_mode(policy_route) == PolicyMode::Monitor)
            .unwrap_or(false);
        if !self.mode.is_enforcing() || policy_monitoring {
            decision.downgrade_to_monitor();
        }

        // 5. Emit the decision event (log sink + callback, synchronously).
        let event = DecisionEvent {
            action: decision.action,
            status_code: decision.status_code,
            reason: decision.reason.clone(),
            rule_hits: decision.rule_hits.clone(),
            risk: decision.risk.clone(),
            request_id: ctx.id.to_string(),
            duration_ms: started.elapsed().as_millis() as u64,
            method: ctx.method.to_string(),
            path: ctx.path.clone(),
        };
        self.emit(&event);

        if decision.action == Action::Block {
            let reason = decision.reason.clone().unwrap_or_else(|| "Blocked by policy".to_string());
            return Outcome::Block {
                response: self.block_response(decision.status_code, &reason),
                decision: Some(decision),
            };
        }
        Outcome::Forward {
            context: Some(Box::new(ctx)),
            decision: Some(decision),
        }
    }

    /// Validate the body against the matched operation's request schema.
    /// Returns whether an OpenAPI operation matched at all.
    fn validate_schema(
        &self,
        ctx: &RequestContext,
        policy_route: Option<&PolicyRoute>,
        hits: &mut Vec<RuleHit>,
    ) -> bool {
        let Some(spec) = &self.spec else {
            return false;
        };
        let Some((route, _params)) = spec.find_route(&ctx.path) else {
            return false;
        };
        let Some(operation) = route.operation(ctx.method.as_str()) else {
            return false;
        };

        if !self.validate_request {
            return true;
        }
        let (Some(body), Some(schema)) = (&ctx.body.json, operation.request_schema()) else {
            return true;
        };

        let reject_unknown = policy_route
            .and_then(|r| r.contract.as_ref())
            .map(|c| c.reject_unknown_fields)
            .unwrap_or(false);
        let key = format!(
            "{}:{}:request",
            route.path,
            ctx.method.as_str().to_ascii_lowercase()
        );

        match self.validators.get_or_build(&key, schema, reject_unknown) {
            Ok(validator) => {
                for error in validator.validate(body) {
                    let mut hit =
                        RuleHit::new("schema.request.invalid", Severity::Medium, &error.message)
                            .with_path(&error.path);
                    hit.value = error.value;
                    hits.push(hit);
                }
            }
            Err(error) => {
                hits.push(RuleHit::new(
                    "schema.config.invalid",
                    Severity::Critical,
                    format!("request schema failed to compile: {error}"),
                ));
            }
        }
        true
    }

    fn push_unmatched_hit(&self, policy: &PolicySet, ctx: &RequestContext, hits: &mut Vec<RuleHit>) {
        let severity = match policy.defaults.unmatched_route_action {
            UnmatchedAction::Allow => return,
            UnmatchedAction::Block => Severity::High,
            UnmatchedAction::Monitor => Severity::Medium,
        };
        hits.push(RuleHit::new(
            "policy.unmatched",
            severity,
            format!("No policy route matches: {} {}", ctx.method, ctx.path),
        ));
    }

    /// Apply the rule's action envelope to a triggered hit: `allow`
    /// suppresses it, `monitor` exempts it from the block gate.
    fn apply_action(action: RuleAction, mut hit: RuleHit) -> Option<RuleHit> {
        match action {
            RuleAction::Allow => {
                debug!(hit_id = %hit.id, "Rule hit suppressed by allow action");
                None
            }
            RuleAction::Monitor => {
                hit.monitor_only = true;
                Some(hit)
            }
            RuleAction::Block => Some(hit),
        }
    }

    fn evaluate_rules(
        &self,
        policy: &PolicySet,
        route: &PolicyRoute,
        ctx: &RequestContext,
        cel_value: &Value,
        hits: &mut Vec<RuleHit>,
        webhook_info: &mut WebhookInfo,
    ) {
        for rule in &route.rules {
            match &rule.kind {
                // CEL rules are assertions over the context: a rule hits
                // when its expression does not hold.
                RuleKind::Cel { expr, message } => {
                    match self.evaluator.evaluate(expr, cel_value) {
                        Err(error) => {
                            hits.push(RuleHit::new(
                                format!("policy.cel_error.{}", rule.id),
                                Severity::Low,
                                format!("expression evaluation error: {error}"),
                            ));
                        }
                        Ok(true) => {}
                        Ok(false) => {
                            let reason = message
                                .clone()
                                .unwrap_or_else(|| format!("Policy rule violated: {expr}"));
                            let hit =
                                RuleHit::new(format!("policy.{}", rule.id), rule.severity, reason);
                            hits.extend(Self::apply_action(rule.action, hit));
                        }
                    }
                }
                RuleKind::WebhookSignature => {
                    let Some(config) = &route.webhook else {
                        hits.push(self.misconfigured_rule_hit(rule.id.as_str()));
                        continue;
                    };
                    webhook_info.provider = Some(config.provider.clone());
                    let raw_body = ctx.body.raw.as_deref().unwrap_or(&[]);
                    match webhook::verify_signature(config, &ctx.headers, raw_body) {
                        Ok(()) => webhook_info.signature_valid = Some(true),
                        Err(reason) => {
                            webhook_info.signature_valid = Some(false);
                            let hit = RuleHit::new(
                                format!("policy.{}", rule.id),
                                rule.severity,
                                format!("webhook signature verification failed: {reason}"),
                            );
                            hits.extend(Self::apply_action(rule.action, hit));
                        }
                    }
                }
                RuleKind::WebhookReplay => {
                    let Some(config) = &route.webhook else {
                        hits.push(self.misconfigured_rule_hit(rule.id.as_str()));
                        continue;
                    };
                    if !config.replay_protection {
                        continue;
                    }
                    match webhook::check_replay(config, &ctx.headers, SystemTime::now()) {
                        Ok(replayed) => {
                            webhook_info.replayed = Some(replayed);
                            if replayed {
                                let hit = RuleHit::new(
                                    format!("policy.{}", rule.id),
                                    rule.severity,
                                    "webhook timestamp outside the tolerance window",
                                );
                                hits.extend(Self::apply_action(rule.action, hit));
                            }
                        }
                        Err(reason) => {
                            let hit = RuleHit::new(
                                format!("policy.{}", rule.id),
                                rule.severity,
                                format!("webhook replay check failed: {reason}"),
                            );
                            hits.extend(Self::apply_action(rule.action, hit));
                        }
                    }
                }
                RuleKind::Contract {
                    schema_ref,
                    reject_unknown_fields,
                } => {
                    self.evaluate_contract_rule(
                        policy,
                        route,
                        rule.id.as_str(),
                        rule.action,
                        rule.severity,
                        schema_ref.as_deref(),
                        *reject_unknown_fields,
                        ctx,
                        hits,
                    );
                }
                RuleKind::Limits => {
                    let limits = policy.effective_limits(Some(route));
                    let mut push = |kind: &str, message: String| {
                        let hit = RuleHit::new(
                            format!("policy.limits.{kind}"),
                            rule.severity,
                            message,
                        );
                        hits.extend(Self::apply_action(rule.action, hit));
                    };
                    if let Some(max) = limits.max_body_bytes {
                        if ctx.body.size_bytes as u64 > max {
                            push(
                                "body_size",
                                format!("body is {} bytes, limit {max}", ctx.body.size_bytes),
                            );
                        }
                    }
                    if let Some(body) = &ctx.body.json {
                        if let Some(max) = limits.max_json_depth {
                            let depth = json_depth(body);
                            if depth > max {
                                push("json_depth", format!("JSON depth {depth}, limit {max}"));
                            }
                        }
                        if let Some(max) = limits.max_array_length {
                            let longest = max_array_length(body);
                            if longest > max {
                                push(
                                    "array_length",
                                    format!("array length {longest}, limit {max}"),
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    fn misconfigured_rule_hit(&self, rule_id: &str) -> RuleHit {
        RuleHit::new(
            format!("policy.{rule_id}"),
            Severity::Low,
            "webhook rule on a route without webhook configuration",
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_contract_rule(
        &self,
        policy: &PolicySet,
        route: &PolicyRoute,
        rule_id: &str,
        action: RuleAction,
        severity: Severity,
        schema_ref: Option<&str>,
        reject_unknown_fields: Option<bool>,
        ctx: &RequestContext,
        hits: &mut Vec<RuleHit>,
    ) {
        let contract = route.contract.as_ref();
        let Some(reference) = schema_ref
            .map(str::to_string)
            .or_else(|| contract.and_then(|c| c.request_schema_ref.clone()))
        else {
            hits.push(RuleHit::new(
                format!("policy.{rule_id}"),
                Severity::Low,
                "contract rule has no schema reference",
            ));
            return;
        };
        let reject_unknown = reject_unknown_fields
            .or_else(|| contract.map(|c| c.reject_unknown_fields))
            .unwrap_or(false);

        let root = json!({ "components": &policy.components });
        let schema = reference
            .strip_prefix('#')
            .and_then(|pointer| root.pointer(pointer));
        let Some(schema) = schema else {
            hits.push(RuleHit::new(
                format!("policy.{rule_id}"),
                Severity::Critical,
                format!("unresolved schema reference: {reference}"),
            ));
            return;
        };

        let Some(body) = &ctx.body.json else {
            return;
        };

        let key = format!("policy:{}:{rule_id}", route.id);
        match self.validators.get_or_build(&key, schema, reject_unknown) {
            Ok(validator) => {
                for error in validator.validate(body) {
                    let mut hit = RuleHit::new(
                        format!("policy.{rule_id}"),
                        severity,
                        &error.message,
                    )
                    .with_path(&error.path);
                    hit.value = error.value;
                    hits.extend(Self::apply_action(action, hit));
                }
            }
            Err(error) => {
                hits.push(RuleHit::new(
                    format!("policy.{rule_id}"),
                    Severity::Critical,
                    format!("contract schema failed to compile: {error}"),
                ));
            }
        }
    }

    fn emit(&self, event: &DecisionEvent) {
        if self.log_decisions {
            match event.action {
                Action::Block => warn!(
                    action = "BLOCK",
                    method = %event.method,
                    path = %event.path,
                    status_code = event.status_code,
                    reason = event.reason.as_deref().unwrap_or(""),
                    risk_score = event.risk.score,
                    hit_count = event.rule_hits.len(),
                    request_id = %event.request_id,
                    duration_ms = event.duration_ms,
                    "Request blocked"
                ),
                _ if !event.rule_hits.is_empty() => info!(
                    action = ?event.action,
                    method = %event.method,
                    path = %event.path,
                    risk_score = event.risk.score,
                    hit_count = event.rule_hits.len(),
                    request_id = %event.request_id,
                    duration_ms = event.duration_ms,
                    "Request passed with findings"
                ),
                _ => debug!(
                    method = %event.method,
                    path = %event.path,
                    request_id = %event.request_id,
                    duration_ms = event.duration_ms,
                    "Request passed"
                ),
            }
        }

        if let Some(callback) = &self.callback {
            let result = catch_unwind(AssertUnwindSafe(|| callback.as_ref()(event)));
            if result.is_err() {
                warn!(
                    request_id = %event.request_id,
                    "Decision callback panicked; continuing"
                );
            }
        }
    }

    fn block_response(&self, status: u16, reason: &str) -> BlockResponse {
        let body = self
            .block_body
            .clone()
            .unwrap_or_else(|| json!({ "error": "Forbidden", "message": reason }));
        BlockResponse {
            status,
            content_type: "application/json",
            body,
        }
    }
}

/// Nesting depth of a JSON value: scalars are 0, containers are one more
/// than their deepest child.
fn json_depth(value: &Value) -> u64 {
    match value {
        Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// Longest array anywhere in the value.
fn max_array_length(value: &Value) -> u64 {
    match value {
        Value::Object(map) => map.values().map(max_array_length).max().unwrap_or(0),
        Value::Array(items) => {
            let nested = items.iter().map(max_array_length).max().unwrap_or(0);
            (items.len() as u64).max(nested)
        }
        _ => 0,
    }
}

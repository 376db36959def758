//! Rule hits, risk scoring, and the decision reducer.
//!
//! Every evaluation surface (vulnerability scanner, schema validator, policy
//! rules) reports findings as [`RuleHit`]s. The reducer maps the combined hit
//! list to a severity-weighted [`RiskScore`] and a final [`Decision`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Decision action types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Allow,
    Block,
    Monitor,
    Challenge,
}

/// Severity levels for rule hits. Ordering follows escalation, so
/// `severity >= Severity::High` selects the blocking band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[serde(rename = "med")]
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Contribution of one hit at this severity to the risk score.
    pub fn weight(self) -> u32 {
        match self {
            Severity::Low => 10,
            Severity::Medium => 30,
            Severity::High => 60,
            Severity::Critical => 100,
        }
    }
}

/// Risk level classification derived from the maximum hit severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    None,
    Low,
    #[serde(rename = "med")]
    Medium,
    High,
    Critical,
}

impl From<Severity> for RiskLevel {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Low => RiskLevel::Low,
            Severity::Medium => RiskLevel::Medium,
            Severity::High => RiskLevel::High,
            Severity::Critical => RiskLevel::Critical,
        }
    }
}

/// Truncate an instance snippet for reporting. Hits never carry more than
/// 100 characters of attacker-controlled input.
pub(crate) fn truncate_snippet(value: &str) -> String {
    if value.chars().count() > 100 {
        let cut: String = value.chars().take(100).collect();
        format!("{cut}...")
    } else {
        value.to_string()
    }
}

/// One finding attributable to a rule or detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleHit {
    pub id: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Set when the producing policy rule carries an explicit `monitor`
    /// action: the hit is recorded but exempt from the block gate.
    #[serde(skip, default)]
    pub monitor_only: bool,
}

impl RuleHit {
    pub fn new(id: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        RuleHit {
            id: id.into(),
            severity,
            message: Some(message.into()),
            path: None,
            value: None,
            monitor_only: false,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attach the offending instance value, truncated for reporting.
    pub fn with_value(mut self, value: &str) -> Self {
        self.value = Some(truncate_snippet(value));
        self
    }
}

/// Risk assessment for a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScore {
    /// 0..=100, the capped sum of severity weights.
    pub score: u32,
    /// Classification from the *maximum* severity among hits, not the sum.
    pub level: RiskLevel,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub factors: Vec<String>,
}

impl RiskScore {
    pub fn none() -> Self {
        RiskScore {
            score: 0,
            level: RiskLevel::None,
            factors: Vec::new(),
        }
    }

    pub fn from_rule_hits(hits: &[RuleHit]) -> Self {
        let Some(max_severity) = hits.iter().map(|h| h.severity).max() else {
            return Self::none();
        };

        let total: u32 = hits.iter().map(|h| h.severity.weight()).sum();
        let factors = hits
            .iter()
            .filter_map(|h| h.message.as_ref().map(|m| format!("{}: {}", h.id, m)))
            .collect();

        RiskScore {
            score: total.min(100),
            level: max_severity.into(),
            factors,
        }
    }
}

/// Directive for redacting sensitive data in responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionDirective {
    pub path: String,
    /// One of `mask`, `hash`, `drop`.
    pub action: String,
    #[serde(default)]
    pub priority: i32,
}

/// The final verdict on a request, produced exactly once per context.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub version: String,
    pub action: Action,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rule_hits: Vec<RuleHit>,
    pub risk: RiskScore,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub redactions: Vec<RedactionDirective>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, Value>,
}

impl Decision {
    fn base(action: Action, status_code: u16) -> Self {
        Decision {
            version: "0.1".to_string(),
            action,
            status_code,
            reason: None,
            rule_hits: Vec::new(),
            risk: RiskScore::none(),
            redactions: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn allow(hits: Vec<RuleHit>) -> Self {
        let mut decision = Self::base(Action::Allow, 200);
        decision.risk = RiskScore::from_rule_hits(&hits);
        decision.rule_hits = hits;
        decision
    }

    pub fn block(reason: impl Into<String>, hits: Vec<RuleHit>, status_code: u16) -> Self {
        let mut decision = Self::base(Action::Block, status_code);
        decision.reason = Some(reason.into());
        decision.risk = RiskScore::from_rule_hits(&hits);
        decision.rule_hits = hits;
        decision
    }

    pub fn monitor(reason: impl Into<String>, hits: Vec<RuleHit>) -> Self {
        let mut decision = Self::base(Action::Monitor, 200);
        decision.reason = Some(reason.into());
        decision.risk = RiskScore::from_rule_hits(&hits);
        decision.rule_hits = hits;
        decision
    }

    /// Rewrite a BLOCK into a MONITOR when the effective mode is monitor.
    /// Hits, reason, and risk are preserved; the status collapses to 200.
    pub fn downgrade_to_monitor(&mut self) {
        if self.action == Action::Block {
            self.action = Action::Monitor;
            self.status_code = 200;
        }
    }
}

/// Reduce a combined hit list to a decision.
///
/// Any hit at HIGH or CRITICAL blocks with that hit's message as the reason,
/// unless the producing rule downgraded it to monitor-only, in which case the
/// decision is MONITOR. MED/LOW hits are recorded but not acted on.
pub fn reduce(hits: Vec<RuleHit>, block_status: u16) -> Decision {
    let blocking = hits
        .iter()
        .find(|h| h.severity >= Severity::High && !h.monitor_only);
    if let Some(hit) = blocking {
        let reason = hit
            .message
            .clone()
            .unwrap_or_else(|| "Policy violation".to_string());
        return Decision::block(reason, hits, block_status);
    }

    let monitored = hits
        .iter()
        .find(|h| h.severity >= Severity::High && h.monitor_only);
    if let Some(hit) = monitored {
        let reason = hit
            .message
            .clone()
            .unwrap_or_else(|| "Policy violation".to_string());
        return Decision::monitor(reason, hits);
    }

    Decision::allow(hits)
}

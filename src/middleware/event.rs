use serde::Serialize;

use crate::risk::{Action, RiskScore, RuleHit};

/// One record per evaluated request, handed to the log sink and the
/// configured callback. Serializes to the decision-event JSON shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionEvent {
    pub action: Action,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub rule_hits: Vec<RuleHit>,
    pub risk: RiskScore,
    pub request_id: String,
    pub duration_ms: u64,
    pub method: String,
    pub path: String,
}

use hmac::{Hmac, Mac};
use http::Method;
use serde_json::json;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

use apisentry::context::RawRequest;
use apisentry::middleware::{Gateway, GatewayConfig, Outcome};
use apisentry::policy::policy_from_value;
use apisentry::risk::{Action, Severity};

type HmacSha256 = Hmac<Sha256>;

const SECRET: &str = "whsec_test";

fn webhook_policy() -> apisentry::PolicySet {
    policy_from_value(json!({
        "policyVersion": "0.1",
        "routes": [{
            "id": "github-hook",
            "match": {"method": "POST", "path": "/webhooks/github"},
            "webhook": {"provider": "github", "secret": SECRET},
            "rules": [
                {"id": "signature", "type": "webhook-signature", "severity": "critical"},
                {"id": "replay", "type": "webhook-replay", "severity": "high"},
            ],
        }, {
            "id": "slack-hook",
            "match": {"method": "POST", "path": "/webhooks/slack"},
            "webhook": {"provider": "slack", "secret": SECRET, "timestampTolerance": 300},
            "rules": [
                {"id": "signature", "type": "webhook-signature", "severity": "critical"},
                {"id": "replay", "type": "webhook-replay", "severity": "high"},
            ],
        }],
    }))
    .unwrap()
}

fn sign(chunks: &[&[u8]]) -> String {
    let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
    for chunk in chunks {
        mac.update(chunk);
    }
    hex::encode(mac.finalize().into_bytes())
}

fn gateway() -> Gateway {
    let mut config = GatewayConfig::new();
    config.policy = Some(webhook_policy());
    Gateway::new(config).unwrap()
}

#[test]
fn valid_github_signature_forwards_with_webhook_info() {
    let body = br#"{"action":"opened"}"#;
    let request = RawRequest::new(Method::POST, "/webhooks/github")
        .header("Content-Type", "application/json")
        .header(
            "X-Hub-Signature-256",
            format!("sha256={}", sign(&[body.as_slice()])),
        )
        .body(body.to_vec());

    match gateway().handle(&request) {
        Outcome::Forward { context, decision } => {
            assert_eq!(decision.unwrap().action, Action::Allow);
            let context = context.unwrap();
            assert_eq!(context.webhook.provider.as_deref(), Some("github"));
            assert_eq!(context.webhook.signature_valid, Some(true));
            assert_eq!(context.webhook.replayed, Some(false));
        }
        other => panic!("expected forward, got {other:?}"),
    }
}

#[test]
fn tampered_github_body_is_blocked() {
    let signed = br#"{"action":"opened"}"#;
    let tampered = br#"{"action":"deleted"}"#;
    let request = RawRequest::new(Method::POST, "/webhooks/github")
        .header("Content-Type", "application/json")
        .header(
            "X-Hub-Signature-256",
            format!("sha256={}", sign(&[signed.as_slice()])),
        )
        .body(tampered.to_vec());

    match gateway().handle(&request) {
        Outcome::Block { decision, .. } => {
            let decision = decision.unwrap();
            let hit = &decision.rule_hits[0];
            assert_eq!(hit.id, "policy.signature");
            assert_eq!(hit.severity, Severity::Critical);
        }
        other => panic!("expected block, got {other:?}"),
    }
}

#[test]
fn missing_signature_header_is_blocked() {
    let request = RawRequest::new(Method::POST, "/webhooks/github")
        .header("Content-Type", "application/json")
        .body(br#"{"action":"opened"}"#.to_vec());

    match gateway().handle(&request) {
        Outcome::Block { decision, .. } => {
            let decision = decision.unwrap();
            assert_eq!(decision.rule_hits[0].id, "policy.signature");
        }
        other => panic!("expected block, got {other:?}"),
    }
}

#[test]
fn fresh_slack_request_passes_replay_check() {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
        .to_string();
    let body = b"payload=%7B%7D";
    let signature = sign(&[b"v0:", now.as_bytes(), b":", body]);
    let request = RawRequest::new(Method::POST, "/webhooks/slack")
        .header("X-Slack-Signature", format!("v0={signature}"))
        .header("X-Slack-Request-Timestamp", now)
        .body(body.to_vec());

    match gateway().handle(&request) {
        Outcome::Forward { context, .. } => {
            let context = context.unwrap();
            assert_eq!(context.webhook.signature_valid, Some(true));
            assert_eq!(context.webhook.replayed, Some(false));
        }
        other => panic!("expected forward, got {other:?}"),
    }
}

#[test]
fn stale_slack_timestamp_is_blocked_as_replay() {
    let stale = (SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_secs()
        - 3600)
        .to_string();
    let body = b"payload=%7B%7D";
    let signature = sign(&[b"v0:", stale.as_bytes(), b":", body]);
    let request = RawRequest::new(Method::POST, "/webhooks/slack")
        .header("X-Slack-Signature", format!("v0={signature}"))
        .header("X-Slack-Request-Timestamp", stale)
        .body(body.to_vec());

    match gateway().handle(&request) {
        Outcome::Block { decision, .. } => {
            let decision = decision.unwrap();
            assert!(decision.rule_hits.iter().any(|h| h.id == "policy.replay"));
        }
        other => panic!("expected block, got {other:?}"),
    }
}

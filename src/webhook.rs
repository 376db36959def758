//! Webhook signature and replay-window verification.
//!
//! Signatures are HMAC-SHA256 over the exact raw body bytes (which is why
//! the context keeps `body.raw`), checked per provider convention:
//!
//! - `github` - `X-Hub-Signature-256: sha256=<hex>` over the body.
//! - `stripe` - `Stripe-Signature: t=<ts>,v1=<hex>` over `"{t}.{body}"`.
//! - `slack`  - `X-Slack-Signature: v0=<hex>` over `"v0:{ts}:{body}"`.
//!
//! Replay protection is a stateless timestamp-window check; cross-request
//! replay ledgers are out of scope by design.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::policy::WebhookConfig;

type HmacSha256 = Hmac<Sha256>;

fn resolve_secret(config: &WebhookConfig) -> Result<Vec<u8>, String> {
    if let Some(secret) = &config.secret {
        return Ok(secret.clone().into_bytes());
    }
    if let Some(var) = &config.secret_ref {
        return std::env::var(var)
            .map(String::into_bytes)
            .map_err(|_| format!("webhook secret env var {var} is not set"));
    }
    Err("webhook has neither secret nor secretRef configured".to_string())
}

fn verify_hmac(secret: &[u8], chunks: &[&[u8]], expected_hex: &str) -> Result<(), String> {
    let expected = hex::decode(expected_hex.trim())
        .map_err(|_| "signature is not valid hex".to_string())?;
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|_| "invalid webhook secret length".to_string())?;
    for chunk in chunks {
        mac.update(chunk);
    }
    // verify_slice is constant-time
    mac.verify_slice(&expected)
        .map_err(|_| "signature mismatch".to_string())
}

fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Result<&'a str, String> {
    headers
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| format!("missing {name} header"))
}

/// Parse a `k=v,k=v` signature header into pairs, collecting repeats.
fn parse_kv(header_value: &str) -> Vec<(&str, &str)> {
    header_value
        .split(',')
        .filter_map(|pair| {
            let mut parts = pair.trim().splitn(2, '=');
            Some((parts.next()?.trim(), parts.next()?.trim()))
        })
        .collect()
}

/// Verify the provider signature over the raw body. `Ok(())` means the
/// signature matched; `Err` carries the reason for the rule hit.
pub fn verify_signature(
    config: &WebhookConfig,
    headers: &HashMap<String, String>,
    raw_body: &[u8],
) -> Result<(), String> {
    let secret = resolve_secret(config)?;

    match config.provider.as_str() {
        "github" => {
            let value = header(headers, "x-hub-signature-256")?;
            let hex_sig = value
                .strip_prefix("sha256=")
                .ok_or_else(|| "malformed X-Hub-Signature-256 header".to_string())?;
            verify_hmac(&secret, &[raw_body], hex_sig)
        }
        "stripe" => {
            let value = header(headers, "stripe-signature")?;
            let pairs = parse_kv(value);
            let timestamp = pairs
                .iter()
                .find(|(k, _)| *k == "t")
                .map(|(_, v)| *v)
                .ok_or_else(|| "Stripe-Signature header has no timestamp".to_string())?;
            let mut last_err = "Stripe-Signature header has no v1 signature".to_string();
            for (key, sig) in &pairs {
                if *key != "v1" {
                    continue;
                }
                match verify_hmac(&secret, &[timestamp.as_bytes(), b".", raw_body], sig) {
                    Ok(()) => return Ok(()),
                    Err(e) => last_err = e,
                }
            }
            Err(last_err)
        }
        "slack" => {
            let signature = header(headers, "x-slack-signature")?;
            let timestamp = header(headers, "x-slack-request-timestamp")?;
            let hex_sig = signature
                .strip_prefix("v0=")
                .ok_or_else(|| "malformed X-Slack-Signature header".to_string())?;
            verify_hmac(
                &secret,
                &[b"v0:", timestamp.as_bytes(), b":", raw_body],
                hex_sig,
            )
        }
        other => Err(format!("unsupported webhook provider: {other}")),
    }
}

fn provider_timestamp(
    config: &WebhookConfig,
    headers: &HashMap<String, String>,
) -> Result<Option<i64>, String> {
    let raw = match config.provider.as_str() {
        "stripe" => {
            let value = header(headers, "stripe-signature")?;
            parse_kv(value)
                .iter()
                .find(|(k, _)| *k == "t")
                .map(|(_, v)| v.to_string())
        }
        "slack" => Some(header(headers, "x-slack-request-timestamp")?.to_string()),
        // GitHub deliveries carry no signed timestamp; there is nothing to
        // check a replay window against.
        _ => None,
    };
    match raw {
        Some(value) => value
            .parse::<i64>()
            .map(Some)
            .map_err(|_| "webhook timestamp is not an integer".to_string()),
        None => Ok(None),
    }
}

/// Check the signature timestamp against the configured tolerance window.
/// `Ok(false)` means fresh, `Ok(true)` means outside the window (replayed or
/// clock-skewed); providers without timestamps report fresh.
pub fn check_replay(
    config: &WebhookConfig,
    headers: &HashMap<String, String>,
    now: SystemTime,
) -> Result<bool, String> {
    let Some(timestamp) = provider_timestamp(config, headers)? else {
        return Ok(false);
    };
    let now_unix = now
        .duration_since(UNIX_EPOCH)
        .map_err(|_| "system clock before unix epoch".to_string())?
        .as_secs() as i64;
    let skew = (now_unix - timestamp).unsigned_abs();
    Ok(skew > config.timestamp_tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(provider: &str) -> WebhookConfig {
        WebhookConfig {
            provider: provider.to_string(),
            secret_ref: None,
            secret: Some("shhh".to_string()),
            timestamp_tolerance: 300,
            replay_protection: true,
        }
    }

    fn sign(secret: &[u8], chunks: &[&[u8]]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        for chunk in chunks {
            mac.update(chunk);
        }
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn github_signature_round_trip() {
        let body = br#"{"action":"opened"}"#;
        let sig = sign(b"shhh", &[body]);
        let mut headers = HashMap::new();
        headers.insert("x-hub-signature-256".to_string(), format!("sha256={sig}"));
        assert!(verify_signature(&config("github"), &headers, body).is_ok());

        headers.insert(
            "x-hub-signature-256".to_string(),
            format!("sha256={}", sign(b"wrong", &[body])),
        );
        assert!(verify_signature(&config("github"), &headers, body).is_err());
    }

    #[test]
    fn stripe_signature_round_trip() {
        let body = br#"{"type":"charge.succeeded"}"#;
        let sig = sign(b"shhh", &[b"1700000000", b".", body]);
        let mut headers = HashMap::new();
        headers.insert(
            "stripe-signature".to_string(),
            format!("t=1700000000,v1={sig}"),
        );
        assert!(verify_signature(&config("stripe"), &headers, body).is_ok());
    }

    #[test]
    fn slack_signature_round_trip() {
        let body = b"payload=%7B%7D";
        let sig = sign(b"shhh", &[b"v0:", b"1700000000", b":", body]);
        let mut headers = HashMap::new();
        headers.insert("x-slack-signature".to_string(), format!("v0={sig}"));
        headers.insert(
            "x-slack-request-timestamp".to_string(),
            "1700000000".to_string(),
        );
        assert!(verify_signature(&config("slack"), &headers, body).is_ok());
    }

    #[test]
    fn missing_header_is_an_error() {
        let headers = HashMap::new();
        let err = verify_signature(&config("github"), &headers, b"{}").unwrap_err();
        assert!(err.contains("x-hub-signature-256"));
    }

    #[test]
    fn unknown_provider_is_an_error() {
        let headers = HashMap::new();
        assert!(verify_signature(&config("pagerduty"), &headers, b"{}").is_err());
    }

    #[test]
    fn replay_window_flags_stale_timestamps() {
        let cfg = config("slack");
        let mut headers = HashMap::new();
        headers.insert(
            "x-slack-request-timestamp".to_string(),
            "1700000000".to_string(),
        );
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_100);
        assert!(!check_replay(&cfg, &headers, now).unwrap());

        let later = UNIX_EPOCH + Duration::from_secs(1_700_000_000 + 301);
        assert!(check_replay(&cfg, &headers, later).unwrap());
    }

    #[test]
    fn github_has_no_replay_window() {
        let cfg = config("github");
        let headers = HashMap::new();
        assert!(!check_replay(&cfg, &headers, SystemTime::now()).unwrap());
    }
}

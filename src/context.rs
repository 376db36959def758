//! Request normalization.
//!
//! The gateway never evaluates a raw HTTP request directly. The host
//! framework hands over a [`RawRequest`]; [`normalize`] turns it into a
//! [`RequestContext`] that is frozen for the rest of the request: every
//! evaluator reads the same headers, query map, body digest, and identity.

use http::Method;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::SystemTime;
use tracing::debug;

use crate::errors::ContextError;
use crate::ids::RequestId;

/// Raw request material as handed over by the host HTTP framework.
///
/// `target` is the request target as it appeared on the request line, with an
/// optional query string (`/users?limit=10`).
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: Method,
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    pub client_ip: Option<String>,
}

impl RawRequest {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        RawRequest {
            method,
            target: target.into(),
            headers: Vec::new(),
            body: Vec::new(),
            client_ip: None,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    /// Request path with any query string stripped.
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or("/")
    }

    /// Get a header by name (case-insensitive).
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Normalized request body information.
#[derive(Debug, Clone, Default)]
pub struct RequestBody {
    pub present: bool,
    pub size_bytes: usize,
    /// Hex digest over the exact bytes read, when a body is present.
    pub sha256: Option<String>,
    /// Raw bytes, kept for webhook signature verification.
    pub raw: Option<Vec<u8>>,
    /// Populated only for `application/json` content that parses.
    pub json: Option<Value>,
}

/// Identity attached to the request by the identity provider. Defaults to
/// unauthenticated; an authenticated identity carries a non-empty subject.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub authenticated: bool,
    pub subject: Option<String>,
    pub tenant: Option<String>,
    pub scopes: Vec<String>,
    pub roles: Vec<String>,
    pub claims: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RuntimeInfo {
    pub language: &'static str,
    pub service: Option<String>,
    pub env: Option<String>,
}

impl Default for RuntimeInfo {
    fn default() -> Self {
        RuntimeInfo {
            language: "rust",
            service: None,
            env: None,
        }
    }
}

/// Webhook verification outcome, populated by the driver after webhook rules
/// ran.
#[derive(Debug, Clone, Default)]
pub struct WebhookInfo {
    pub provider: Option<String>,
    pub signature_valid: Option<bool>,
    pub replayed: Option<bool>,
}

/// Normalized request context for evaluation.
///
/// Built once per request and treated as read-only by every evaluator.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub id: RequestId,
    pub timestamp: SystemTime,
    pub method: Method,
    pub path: String,
    pub content_type: Option<String>,
    /// Header names are lower-cased; duplicate headers keep the last value.
    pub headers: HashMap<String, String>,
    /// Repeated query keys keep the last value.
    pub query: HashMap<String, String>,
    pub body: RequestBody,
    pub identity: Identity,
    pub client: ClientInfo,
    pub runtime: RuntimeInfo,
    pub webhook: WebhookInfo,
}

impl RequestContext {
    /// Render the context as a JSON value tree for expression evaluation.
    ///
    /// Path resolution in policy expressions (`request.body.json.amount`,
    /// `identity.tenant`, ...) walks exactly this shape.
    pub fn to_value(&self) -> Value {
        json!({
            "version": "0.1",
            "id": self.id.to_string(),
            "request": {
                "method": self.method.as_str(),
                "path": self.path,
                "headers": self.headers,
                "query": self.query,
                "contentType": self.content_type,
                "body": {
                    "present": self.body.present,
                    "sizeBytes": self.body.size_bytes,
                    "json": self.body.json,
                },
            },
            "identity": {
                "authenticated": self.identity.authenticated,
                "subject": self.identity.subject,
                "tenant": self.identity.tenant,
                "scopes": self.identity.scopes,
                "roles": self.identity.roles,
                "claims": self.identity.claims,
            },
            "client": {
                "ip": self.client.ip,
                "userAgent": self.client.user_agent,
            },
            "runtime": {
                "language": self.runtime.language,
                "service": self.runtime.service,
                "env": self.runtime.env,
            },
            "webhook": {
                "provider": self.webhook.provider,
                "signatureValid": self.webhook.signature_valid,
                "replayed": self.webhook.replayed,
            },
        })
    }
}

/// True when the content type's media part is `application/json`
/// (prefix-match, case-insensitive, parameters ignored).
pub(crate) fn is_json_content_type(content_type: &str) -> bool {
    let media = content_type.split(';').next().unwrap_or("").trim();
    media
        .get(..16)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("application/json"))
}

/// Parse query string parameters from a request target, last value winning
/// for repeated keys.
fn parse_query_params(target: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    if let Some(pos) = target.find('?') {
        for (k, v) in url::form_urlencoded::parse(target[pos + 1..].as_bytes()) {
            params.insert(k.into_owned(), v.into_owned());
        }
    }
    params
}

/// Build a frozen [`RequestContext`] from raw request material.
///
/// Bodies larger than `max_body_size` and unparseable JSON bodies are hard
/// errors; the driver decides their disposition by mode.
pub fn normalize(
    raw: &RawRequest,
    max_body_size: usize,
    runtime: RuntimeInfo,
) -> Result<RequestContext, ContextError> {
    let mut headers: HashMap<String, String> = HashMap::with_capacity(raw.headers.len());
    for (name, value) in &raw.headers {
        headers.insert(name.to_ascii_lowercase(), value.clone());
    }

    let query = parse_query_params(&raw.target);

    if raw.body.len() > max_body_size {
        return Err(ContextError::PayloadTooLarge {
            limit: max_body_size,
        });
    }

    let content_type = headers.get("content-type").cloned();
    let present = !raw.body.is_empty();

    let body = if present {
        let sha256 = hex::encode(Sha256::digest(&raw.body));
        let json = match content_type.as_deref() {
            Some(ct) if is_json_content_type(ct) => {
                let parsed: Value = serde_json::from_slice(&raw.body)
                    .map_err(|e| ContextError::BodyParse(e.to_string()))?;
                Some(parsed)
            }
            _ => None,
        };
        RequestBody {
            present: true,
            size_bytes: raw.body.len(),
            sha256: Some(sha256),
            raw: Some(raw.body.clone()),
            json,
        }
    } else {
        RequestBody::default()
    };

    let user_agent = headers.get("user-agent").cloned();
    let id = RequestId::new();

    debug!(
        request_id = %id,
        method = %raw.method,
        path = raw.path(),
        header_count = headers.len(),
        body_bytes = body.size_bytes,
        body_json = body.json.is_some(),
        "Request context built"
    );

    Ok(RequestContext {
        id,
        timestamp: SystemTime::now(),
        method: raw.method.clone(),
        path: raw.path().to_string(),
        content_type,
        headers,
        query,
        body,
        identity: Identity::default(),
        client: ClientInfo {
            ip: raw.client_ip.clone(),
            user_agent,
        },
        runtime,
        webhook: WebhookInfo::default(),
    })
}

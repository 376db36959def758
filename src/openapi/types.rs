use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

/// `info` block of the spec.
#[derive(Debug, Clone, Default)]
pub struct SpecInfo {
    pub title: String,
    pub version: Option<String>,
    pub description: Option<String>,
}

/// Schema for a single HTTP operation (one method on one path template).
#[derive(Debug, Clone, Default)]
pub struct OperationSchema {
    pub operation_id: Option<String>,
    /// Path-level parameters first, then operation-level, refs resolved.
    pub parameters: Vec<Value>,
    pub request_body: Option<Value>,
    /// Responses keyed by status code string, declaration order preserved.
    pub responses: serde_json::Map<String, Value>,
    pub deprecated: bool,
}

impl OperationSchema {
    /// The `application/json` request body schema, when declared.
    pub fn request_schema(&self) -> Option<&Value> {
        self.request_body
            .as_ref()?
            .get("content")?
            .get("application/json")?
            .get("schema")
    }

    /// The `application/json` response schema for a status code.
    pub fn response_schema(&self, status_code: &str) -> Option<&Value> {
        self.responses
            .get(status_code)?
            .get("content")?
            .get("application/json")?
            .get("schema")
    }
}

/// One path template with its compiled matcher and operations.
#[derive(Debug, Clone)]
pub struct RouteSchema {
    /// Literal path template (e.g. `/users/{userId}`).
    pub path: String,
    /// Anchored matcher; each templated segment matches one path segment.
    pub matcher: Regex,
    /// Templated parameter names in declaration order.
    pub params: Vec<String>,
    /// Operations keyed by lowercase method.
    pub operations: HashMap<String, OperationSchema>,
}

impl RouteSchema {
    /// Match a request path against this route, returning captured path
    /// parameters on a full-string match.
    pub fn matches(&self, request_path: &str) -> Option<HashMap<String, String>> {
        let captures = self.matcher.captures(request_path)?;
        let mut values = HashMap::with_capacity(self.params.len());
        for name in &self.params {
            if let Some(m) = captures.name(name) {
                values.insert(name.clone(), m.as_str().to_string());
            }
        }
        Some(values)
    }

    pub fn operation(&self, method: &str) -> Option<&OperationSchema> {
        self.operations.get(&method.to_ascii_lowercase())
    }
}

/// Parsed OpenAPI 3.x specification.
#[derive(Debug, Clone, Default)]
pub struct ApiSpec {
    pub version: String,
    pub info: SpecInfo,
    /// Routes in declaration order; lookup is first-full-match.
    pub routes: Vec<RouteSchema>,
    pub components: Value,
    pub security: Option<Value>,
}

impl ApiSpec {
    /// Find the first route whose matcher fully matches `path`, along with
    /// the captured parameter map.
    ///
    /// Static paths get no priority over templated ones: OpenAPI declares
    /// each path once, so ties can only come from malformed specs, which
    /// fail at load time.
    pub fn find_route(&self, path: &str) -> Option<(&RouteSchema, HashMap<String, String>)> {
        self.routes
            .iter()
            .find_map(|route| route.matches(path).map(|params| (route, params)))
    }

    /// Find the operation for a path and method (method lowercased).
    pub fn get_operation(
        &self,
        path: &str,
        method: &str,
    ) -> Option<(&OperationSchema, HashMap<String, String>)> {
        let (route, params) = self.find_route(path)?;
        route.operation(method).map(|op| (op, params))
    }
}

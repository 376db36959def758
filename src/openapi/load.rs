use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;

use super::types::{ApiSpec, OperationSchema, RouteSchema, SpecInfo};
use crate::errors::ConfigError;

const HTTP_METHODS: [&str; 8] = [
    "get", "post", "put", "patch", "delete", "head", "options", "trace",
];

/// Compile an OpenAPI path template into an anchored matcher.
///
/// Literal segments are regex-escaped; each `{name}` becomes a named capture
/// matching one path segment. Capture names are preserved in declaration
/// order.
fn compile_template(path: &str) -> Result<(Regex, Vec<String>, String), ConfigError> {
    let mut pattern = String::with_capacity(path.len() + 8);
    pattern.push('^');
    // Matcher shape with parameter names erased: two templates with the same
    // shape accept exactly the same paths, regardless of what the captures
    // are called.
    let mut shape = String::with_capacity(path.len());
    let mut params = Vec::new();

    let mut rest = path;
    while let Some(open) = rest.find('{') {
        let (literal, tail) = rest.split_at(open);
        pattern.push_str(&regex::escape(literal));
        shape.push_str(literal);
        let close = tail.find('}').ok_or_else(|| ConfigError::Parse {
            path: path.to_string(),
            message: "unclosed path parameter brace".to_string(),
        })?;
        let name = &tail[1..close];
        pattern.push_str("(?P<");
        pattern.push_str(name);
        pattern.push_str(">[^/]+)");
        shape.push_str("{}");
        params.push(name.to_string());
        rest = &tail[close + 1..];
    }
    pattern.push_str(&regex::escape(rest));
    shape.push_str(rest);
    pattern.push('$');

    let regex = Regex::new(&pattern).map_err(|e| ConfigError::Parse {
        path: path.to_string(),
        message: format!("invalid path template: {e}"),
    })?;
    Ok((regex, params, shape))
}

/// Inlining stops here; OpenAPI documents declare acyclic reference chains,
/// and anything deeper is a cycle from a malformed document.
const MAX_REF_DEPTH: usize = 64;

/// Resolve local `$ref`s inline, to a fixed point. Non-local references
/// pass through unchanged; JSON-pointer escapes (`~0`, `~1`) are honored by
/// the pointer lookup.
fn resolve_refs(value: &Value, root: &Value, depth: usize) -> Value {
    if depth > MAX_REF_DEPTH {
        return value.clone();
    }
    match value {
        Value::Object(map) => {
            if let Some(Value::String(ref_path)) = map.get("$ref") {
                if let Some(pointer) = ref_path.strip_prefix('#') {
                    if let Some(target) = root.pointer(pointer) {
                        return resolve_refs(target, root, depth + 1);
                    }
                }
                // Non-local or dangling reference: pass through; the schema
                // validator fails dangling refs at construction time.
                return value.clone();
            }
            Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), resolve_refs(v, root, depth + 1)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| resolve_refs(v, root, depth + 1))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn parse_operation(
    operation: &Value,
    path_parameters: &[Value],
    root: &Value,
    resolve: bool,
) -> OperationSchema {
    let maybe_resolve = |v: &Value| {
        if resolve {
            resolve_refs(v, root, 0)
        } else {
            v.clone()
        }
    };

    // Path-level parameters are prepended to the operation's own.
    let mut parameters: Vec<Value> = path_parameters.to_vec();
    if let Some(Value::Array(own)) = operation.get("parameters") {
        parameters.extend(own.iter().cloned());
    }
    let parameters = parameters.iter().map(&maybe_resolve).collect();

    let request_body = operation.get("requestBody").map(&maybe_resolve);

    let responses = match operation.get("responses") {
        Some(Value::Object(map)) => map
            .iter()
            .map(|(code, response)| (code.clone(), maybe_resolve(response)))
            .collect(),
        _ => serde_json::Map::new(),
    };

    OperationSchema {
        operation_id: operation
            .get("operationId")
            .and_then(Value::as_str)
            .map(str::to_string),
        parameters,
        request_body,
        responses,
        deprecated: operation
            .get("deprecated")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    }
}

/// Build an [`ApiSpec`] from a parsed OpenAPI document, resolving local
/// `$ref`s inline when `resolve` is set.
pub fn openapi_from_value_with(value: Value, resolve: bool) -> Result<ApiSpec, ConfigError> {
    let version = value
        .get("openapi")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    if !version.starts_with("3.") {
        return Err(ConfigError::UnsupportedOpenApiVersion(version));
    }

    let info = SpecInfo {
        title: value
            .pointer("/info/title")
            .and_then(Value::as_str)
            .unwrap_or("Untitled API")
            .to_string(),
        version: value
            .pointer("/info/version")
            .and_then(Value::as_str)
            .map(str::to_string),
        description: value
            .pointer("/info/description")
            .and_then(Value::as_str)
            .map(str::to_string),
    };

    let mut routes = Vec::new();
    // matcher shape -> first declaring template, for ambiguity detection
    let mut seen_matchers: HashMap<String, String> = HashMap::new();

    if let Some(Value::Object(paths)) = value.get("paths") {
        for (path, path_item) in paths {
            let Value::Object(item) = path_item else {
                continue;
            };

            let (matcher, params, shape) = compile_template(path)?;
            if let Some(first) = seen_matchers.insert(shape, path.clone()) {
                return Err(ConfigError::DuplicateMatcher {
                    first,
                    second: path.clone(),
                });
            }

            let path_parameters: Vec<Value> = match item.get("parameters") {
                Some(Value::Array(list)) => list.clone(),
                _ => Vec::new(),
            };

            let mut operations = HashMap::new();
            for method in HTTP_METHODS {
                let Some(operation) = item.get(method) else {
                    continue;
                };
                if !operation.is_object() {
                    continue;
                }
                operations.insert(
                    method.to_string(),
                    parse_operation(operation, &path_parameters, &value, resolve),
                );
            }

            routes.push(RouteSchema {
                path: path.clone(),
                matcher,
                params,
                operations,
            });
        }
    }

    info!(
        version = %version,
        title = %info.title,
        route_count = routes.len(),
        "OpenAPI spec loaded"
    );

    Ok(ApiSpec {
        version,
        info,
        routes,
        components: value.get("components").cloned().unwrap_or(Value::Null),
        security: value.get("security").cloned(),
    })
}

/// Build an [`ApiSpec`] with `$ref` resolution enabled.
pub fn openapi_from_value(value: Value) -> Result<ApiSpec, ConfigError> {
    openapi_from_value_with(value, true)
}

/// Load an OpenAPI 3.x specification from a YAML or JSON file.
pub fn load_openapi(file_path: &str) -> Result<ApiSpec, ConfigError> {
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
    openapi_from_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_spec() -> Value {
        json!({
            "openapi": "3.0.3",
            "info": {"title": "Sample API", "version": "1.0.0"},
            "paths": {
                "/users": {
                    "post": {
                        "operationId": "createUser",
                        "requestBody": {
                            "content": {
                                "application/json": {
                                    "schema": {"$ref": "#/components/schemas/User"}
                                }
                            }
                        },
                        "responses": {"201": {"description": "created"}},
                    },
                },
                "/users/{userId}": {
                    "parameters": [
                        {"name": "userId", "in": "path", "required": true,
                         "schema": {"type": "string"}}
                    ],
                    "get": {"operationId": "getUser", "responses": {"200": {"description": "ok"}}},
                },
            },
            "components": {
                "schemas": {
                    "User": {
                        "type": "object",
                        "required": ["name", "email"],
                        "properties": {
                            "name": {"type": "string"},
                            "email": {"type": "string", "format": "email"},
                        },
                    },
                },
            },
        })
    }

    #[test]
    fn rejects_non_3x_versions() {
        let err = openapi_from_value(json!({"openapi": "2.0", "paths": {}})).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedOpenApiVersion(v) if v == "2.0"));
    }

    #[test]
    fn template_compiles_to_anchored_matcher() {
        let (regex, params, _) = compile_template("/users/{userId}/posts/{postId}").unwrap();
        assert_eq!(params, vec!["userId", "postId"]);
        assert!(regex.is_match("/users/42/posts/7"));
        assert!(!regex.is_match("/users/42/posts/7/comments"));
        assert!(!regex.is_match("/prefix/users/42/posts/7"));
        assert!(!regex.is_match("/users/42/posts/"));
    }

    #[test]
    fn literal_segments_are_escaped() {
        let (regex, _, _) = compile_template("/v1.0/items").unwrap();
        assert!(regex.is_match("/v1.0/items"));
        assert!(!regex.is_match("/v1x0/items"));
    }

    #[test]
    fn find_route_returns_captured_params() {
        let spec = openapi_from_value(sample_spec()).unwrap();
        let (route, params) = spec.find_route("/users/abc").unwrap();
        assert_eq!(route.path, "/users/{userId}");
        assert_eq!(params.get("userId").map(String::as_str), Some("abc"));
        assert!(spec.find_route("/nothing/here").is_none());
    }

    #[test]
    fn get_operation_lowercases_method() {
        let spec = openapi_from_value(sample_spec()).unwrap();
        let (op, _) = spec.get_operation("/users", "POST").unwrap();
        assert_eq!(op.operation_id.as_deref(), Some("createUser"));
        assert!(spec.get_operation("/users", "DELETE").is_none());
    }

    #[test]
    fn refs_are_resolved_inline() {
        let spec = openapi_from_value(sample_spec()).unwrap();
        let (op, _) = spec.get_operation("/users", "post").unwrap();
        let schema = op.request_schema().unwrap();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["email"]["format"], "email");
    }

    #[test]
    fn json_pointer_escapes_are_honored() {
        let spec = openapi_from_value(json!({
            "openapi": "3.1.0",
            "info": {"title": "T"},
            "paths": {
                "/items": {
                    "post": {
                        "requestBody": {
                            "content": {
                                "application/json": {
                                    "schema": {"$ref": "#/components/schemas/a~1b"}
                                }
                            }
                        },
                        "responses": {},
                    },
                },
            },
            "components": {"schemas": {"a/b": {"type": "integer"}}},
        }))
        .unwrap();
        let (op, _) = spec.get_operation("/items", "post").unwrap();
        assert_eq!(op.request_schema().unwrap()["type"], "integer");
    }

    #[test]
    fn non_local_refs_pass_through() {
        let spec = openapi_from_value(json!({
            "openapi": "3.0.0",
            "info": {"title": "T"},
            "paths": {
                "/x": {
                    "post": {
                        "requestBody": {
                            "content": {
                                "application/json": {
                                    "schema": {"$ref": "https://example.com/ext.json#/S"}
                                }
                            }
                        },
                        "responses": {},
                    },
                },
            },
        }))
        .unwrap();
        let (op, _) = spec.get_operation("/x", "post").unwrap();
        assert_eq!(
            op.request_schema().unwrap()["$ref"],
            "https://example.com/ext.json#/S"
        );
    }

    #[test]
    fn path_level_parameters_are_prepended() {
        let spec = openapi_from_value(sample_spec()).unwrap();
        let (op, _) = spec.get_operation("/users/abc", "get").unwrap();
        assert_eq!(op.parameters.len(), 1);
        assert_eq!(op.parameters[0]["name"], "userId");
    }

    #[test]
    fn duplicate_matchers_fail_at_load() {
        // Parameter names differ but the two templates accept exactly the
        // same paths, which OpenAPI forbids.
        let err = openapi_from_value(json!({
            "openapi": "3.0.0",
            "info": {"title": "T"},
            "paths": {
                "/users/{id}": {"get": {"responses": {}}},
                "/users/{userId}": {"get": {"responses": {}}},
            },
        }))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::DuplicateMatcher { first, second }
                if first == "/users/{id}" && second == "/users/{userId}"
        ));
    }
}

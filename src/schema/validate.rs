use jsonschema::Validator;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::errors::ConfigError;
use crate::risk::truncate_snippet;

static UUID_FORMAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[1-5][0-9a-fA-F]{3}-[89abAB][0-9a-fA-F]{3}-[0-9a-fA-F]{12}$",
    )
    .expect("invalid uuid format pattern")
});

static DATE_TIME_FORMAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}[Tt]\d{2}:\d{2}:\d{2}(\.\d+)?([Zz]|[+-]\d{2}:\d{2})$")
        .expect("invalid date-time format pattern")
});

static EMAIL_FORMAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@]+@[^@]+\.[^@]+$").expect("invalid email format pattern"));

fn check_uuid(value: &str) -> bool {
    UUID_FORMAT.is_match(value)
}

fn check_date_time(value: &str) -> bool {
    DATE_TIME_FORMAT.is_match(value)
}

fn check_email(value: &str) -> bool {
    EMAIL_FORMAT.is_match(value)
}

/// One structured validation error.
#[derive(Debug, Clone)]
pub struct SchemaError {
    /// JSON pointer from the document root to the failing node.
    pub path: String,
    /// Pointer into the schema that rejected the node.
    pub schema_path: String,
    /// The failing keyword (`required`, `format`, `type`, ...).
    pub keyword: String,
    pub message: String,
    /// Truncated snippet of the failing instance.
    pub value: Option<String>,
}

/// JSON Schema Draft 2020-12 validator with custom formats and an optional
/// unknown-field post-pass.
///
/// Validation collects *all* errors rather than stopping at the first, so a
/// single request reports every contract violation at once.
#[derive(Debug)]
pub struct SchemaValidator {
    validator: Validator,
    schema: Value,
    reject_unknown_fields: bool,
}

impl SchemaValidator {
    /// Compile a schema. Dangling `$ref`s and malformed schemas fail here,
    /// at construction time, not per request.
    pub fn new(schema: &Value, reject_unknown_fields: bool) -> Result<Self, ConfigError> {
        let validator = jsonschema::options()
            .should_validate_formats(true)
            .with_format("uuid", check_uuid)
            .with_format("date-time", check_date_time)
            .with_format("email", check_email)
            .build(schema)
            .map_err(|e| ConfigError::InvalidSchema(e.to_string()))?;
        Ok(SchemaValidator {
            validator,
            schema: schema.clone(),
            reject_unknown_fields,
        })
    }

    pub fn validate(&self, instance: &Value) -> Vec<SchemaError> {
        let mut errors: Vec<SchemaError> = self
            .validator
            .iter_errors(instance)
            .map(|error| {
                let path = pointer_or_root(&error.instance_path().to_string());
                let schema_path = pointer_or_root(&error.schema_path().to_string());
                let keyword = schema_path
                    .rsplit('/')
                    .next()
                    .unwrap_or("")
                    .to_string();
                SchemaError {
                    path,
                    schema_path,
                    keyword,
                    message: error.to_string(),
                    value: Some(snippet(&*error.instance())),
                }
            })
            .collect();

        if self.reject_unknown_fields {
            unknown_fields(instance, &self.schema, "", &mut errors);
        }
        errors
    }

    pub fn is_valid(&self, instance: &Value) -> bool {
        self.validate(instance).is_empty()
    }
}

fn pointer_or_root(pointer: &str) -> String {
    if pointer.is_empty() {
        "/".to_string()
    } else {
        pointer.to_string()
    }
}

fn snippet(instance: &Value) -> String {
    match instance {
        Value::String(s) => truncate_snippet(s),
        other => truncate_snippet(&other.to_string()),
    }
}

fn is_object_schema(schema: &Value) -> bool {
    schema.get("properties").is_some()
        || schema.get("type").and_then(Value::as_str) == Some("object")
}

/// Post-pass for `reject_unknown_fields`: members not listed in
/// `properties`, not matching a `patternProperties` regex, and not admitted
/// by an explicit `additionalProperties` are errors. An absent
/// `additionalProperties` does not admit here - tightening permissive
/// schemas is the point of the flag.
fn unknown_fields(instance: &Value, schema: &Value, path: &str, errors: &mut Vec<SchemaError>) {
    match instance {
        Value::Object(members) if is_object_schema(schema) => {
            let properties = schema.get("properties").and_then(Value::as_object);
            let pattern_properties = schema.get("patternProperties").and_then(Value::as_object);
            let additional_admits = match schema.get("additionalProperties") {
                Some(Value::Bool(admit)) => *admit,
                Some(_) => true,
                None => false,
            };

            for (key, child) in members {
                let child_path = format!("{path}/{key}");
                let listed = properties.is_some_and(|props| props.contains_key(key));
                let pattern_matched = pattern_properties.is_some_and(|patterns| {
                    patterns
                        .keys()
                        .any(|p| Regex::new(p).map(|re| re.is_match(key)).unwrap_or(false))
                });

                if !listed && !pattern_matched && !additional_admits {
                    errors.push(SchemaError {
                        path: child_path.clone(),
                        schema_path: "/additionalProperties".to_string(),
                        keyword: "additional-property".to_string(),
                        message: format!("Unknown field: {key}"),
                        value: Some(snippet(child)),
                    });
                    continue;
                }

                if let Some(child_schema) = properties.and_then(|props| props.get(key)) {
                    unknown_fields(child, child_schema, &child_path, errors);
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (index, item) in items.iter().enumerate() {
                    unknown_fields(item, item_schema, &format!("{path}/{index}"), errors);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_schema() -> Value {
        json!({
            "type": "object",
            "required": ["name", "email"],
            "properties": {
                "name": {"type": "string"},
                "email": {"type": "string", "format": "email"},
                "id": {"type": "string", "format": "uuid"},
                "createdAt": {"type": "string", "format": "date-time"},
            },
        })
    }

    #[test]
    fn valid_instance_produces_no_errors() {
        let validator = SchemaValidator::new(&user_schema(), false).unwrap();
        let errors = validator.validate(&json!({
            "name": "A",
            "email": "a@example.com",
        }));
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn collects_all_errors_not_just_the_first() {
        let validator = SchemaValidator::new(&user_schema(), false).unwrap();
        let errors = validator.validate(&json!({
            "name": 42,
            "email": "not-an-email",
        }));
        assert!(errors.len() >= 2, "expected both errors, got {errors:?}");
    }

    #[test]
    fn email_format_requires_single_at_and_domain_dot() {
        let validator = SchemaValidator::new(&user_schema(), false).unwrap();
        let errors = validator.validate(&json!({
            "name": "A",
            "email": "not-an-email",
        }));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "/email");
        assert_eq!(errors[0].keyword, "format");

        assert!(check_email("a@b.co"));
        assert!(!check_email("a@b@c.co"));
        assert!(!check_email("a@nodot"));
        assert!(!check_email("@example.com"));
    }

    #[test]
    fn uuid_format_accepts_canonical_v4() {
        assert!(check_uuid("f47ac10b-58cc-4372-a567-0e02b2c3d479"));
        assert!(!check_uuid("f47ac10b-58cc-7372-a567-0e02b2c3d479")); // version 7
        assert!(!check_uuid("not-a-uuid"));
    }

    #[test]
    fn date_time_format_needs_zone() {
        assert!(check_date_time("2024-01-15T10:30:00Z"));
        assert!(check_date_time("2024-01-15T10:30:00.123+02:00"));
        assert!(!check_date_time("2024-01-15T10:30:00"));
        assert!(!check_date_time("2024-01-15"));
    }

    #[test]
    fn error_paths_are_json_pointers() {
        let schema = json!({
            "type": "object",
            "properties": {
                "items": {
                    "type": "array",
                    "items": {"type": "object", "properties": {"n": {"type": "integer"}}},
                },
            },
        });
        let validator = SchemaValidator::new(&schema, false).unwrap();
        let errors = validator.validate(&json!({"items": [{"n": "x"}]}));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "/items/0/n");
        assert_eq!(errors[0].keyword, "type");
    }

    #[test]
    fn dangling_ref_fails_at_construction() {
        let schema = json!({"$ref": "#/definitions/missing"});
        let err = SchemaValidator::new(&schema, false).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSchema(_)));
    }

    #[test]
    fn reject_unknown_fields_flags_extra_members() {
        let validator = SchemaValidator::new(&user_schema(), true).unwrap();
        let errors = validator.validate(&json!({
            "name": "A",
            "email": "a@example.com",
            "isAdmin": true,
        }));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].keyword, "additional-property");
        assert_eq!(errors[0].path, "/isAdmin");
    }

    #[test]
    fn pattern_properties_admit_members() {
        let schema = json!({
            "type": "object",
            "properties": {},
            "patternProperties": {"^x-": {"type": "string"}},
        });
        let validator = SchemaValidator::new(&schema, true).unwrap();
        assert!(validator.validate(&json!({"x-trace": "abc"})).is_empty());
        assert_eq!(validator.validate(&json!({"other": "abc"})).len(), 1);
    }

    #[test]
    fn explicit_additional_properties_admit_members() {
        let schema = json!({
            "type": "object",
            "properties": {"a": {"type": "string"}},
            "additionalProperties": true,
        });
        let validator = SchemaValidator::new(&schema, true).unwrap();
        assert!(validator.validate(&json!({"a": "x", "b": "y"})).is_empty());
    }

    #[test]
    fn unknown_field_check_recurses_into_nested_objects() {
        let schema = json!({
            "type": "object",
            "properties": {
                "profile": {
                    "type": "object",
                    "properties": {"bio": {"type": "string"}},
                },
            },
        });
        let validator = SchemaValidator::new(&schema, true).unwrap();
        let errors = validator.validate(&json!({"profile": {"bio": "hi", "secret": 1}}));
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "/profile/secret");
    }

    #[test]
    fn long_values_are_truncated_in_errors() {
        let schema = json!({"type": "object", "properties": {"s": {"type": "integer"}}});
        let validator = SchemaValidator::new(&schema, false).unwrap();
        let long = "y".repeat(500);
        let errors = validator.validate(&json!({"s": long}));
        assert_eq!(errors.len(), 1);
        assert!(errors[0].value.as_ref().unwrap().len() <= 103);
    }
}

use thiserror::Error;

/// Load-time failures. Construction of a [`crate::middleware::Gateway`], a
/// policy set, or an OpenAPI spec fails fast with one of these; nothing in
/// this enum is produced on the request path.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },
    #[error("unsupported OpenAPI version: {0} (only 3.x is supported)")]
    UnsupportedOpenApiVersion(String),
    #[error("unsupported policy version: {0}")]
    UnsupportedPolicyVersion(String),
    #[error("duplicate policy route id: {0}")]
    DuplicateRouteId(String),
    #[error("path templates {first} and {second} compile to the same matcher")]
    DuplicateMatcher { first: String, second: String },
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    #[error("invalid exclusion pattern {pattern}: {message}")]
    InvalidExcludePattern { pattern: String, message: String },
}

/// Failures while normalizing a raw request into a
/// [`crate::context::RequestContext`].
///
/// In enforce mode the driver answers these with a 400 block response; in
/// monitor mode the request is forwarded without evaluation.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },
    #[error("invalid JSON body: {0}")]
    BodyParse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_input() {
        let err = ConfigError::UnsupportedPolicyVersion("0.2".to_string());
        assert_eq!(err.to_string(), "unsupported policy version: 0.2");

        let err = ConfigError::DuplicateMatcher {
            first: "/users/{id}".to_string(),
            second: "/users/{userId}".to_string(),
        };
        assert!(err.to_string().contains("/users/{id}"));
        assert!(err.to_string().contains("/users/{userId}"));

        let err = ContextError::PayloadTooLarge { limit: 1024 };
        assert_eq!(err.to_string(), "request body exceeds 1024 bytes");
    }

    #[test]
    fn io_errors_keep_their_source() {
        use std::error::Error as _;
        let err = ConfigError::Io {
            path: "policy.yaml".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("policy.yaml"));
    }
}

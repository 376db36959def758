//! Thread-safe cache of compiled schema validators.
//!
//! Schema compilation is expensive relative to validation, so compiled
//! validators are shared across requests behind `Arc`. Keys follow
//! `{route}:{kind}` (for example `users-create:request` or
//! `policy:orders:contract`).

use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;

use super::validate::SchemaValidator;
use crate::errors::ConfigError;

#[derive(Clone, Default)]
pub struct ValidatorCache {
    cache: Arc<RwLock<HashMap<String, Arc<SchemaValidator>>>>,
}

impl ValidatorCache {
    pub fn new() -> Self {
        ValidatorCache {
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get a cached validator or compile and cache a new one.
    ///
    /// Readers only ever observe fully constructed entries; concurrent
    /// compilations of the same key resolve to the first inserted validator.
    pub fn get_or_build(
        &self,
        key: &str,
        schema: &Value,
        reject_unknown_fields: bool,
    ) -> Result<Arc<SchemaValidator>, ConfigError> {
        {
            let cache = self.cache.read().expect("validator cache lock poisoned");
            if let Some(validator) = cache.get(key) {
                return Ok(Arc::clone(validator));
            }
        }

        let compiled = Arc::new(SchemaValidator::new(schema, reject_unknown_fields)?);

        let mut cache = self.cache.write().expect("validator cache lock poisoned");
        // Another thread might have compiled while we waited.
        if let Some(existing) = cache.get(key) {
            return Ok(Arc::clone(existing));
        }
        cache.insert(key.to_string(), Arc::clone(&compiled));
        debug!(
            cache_key = key,
            cache_size = cache.len(),
            "Schema validator compiled and cached"
        );
        Ok(compiled)
    }

    pub fn size(&self) -> usize {
        self.cache
            .read()
            .expect("validator cache lock poisoned")
            .len()
    }

    pub fn clear(&self) {
        self.cache
            .write()
            .expect("validator cache lock poisoned")
            .clear();
    }
}

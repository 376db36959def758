//! Full-grammar CEL backend (feature `full-cel`).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use cel::{Context, Program};
use serde_json::Value;
use tracing::debug;

use super::{CelError, Evaluator};

/// Evaluator backed by the `cel` crate.
///
/// Compiled programs are cached per expression string. The cache is
/// insert-if-absent and unbounded by contract: callers whose expression
/// cardinality is unbounded should recycle the backend (for example, per
/// policy reload).
#[derive(Default)]
pub struct CelBackend {
    programs: RwLock<HashMap<String, Arc<Program>>>,
}

impl CelBackend {
    pub fn new() -> Self {
        CelBackend {
            programs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of compiled programs currently cached.
    pub fn cached_programs(&self) -> usize {
        self.programs
            .read()
            .expect("program cache lock poisoned")
            .len()
    }

    fn get_or_compile(&self, expression: &str) -> Result<Arc<Program>, CelError> {
        {
            let cache = self.programs.read().expect("program cache lock poisoned");
            if let Some(program) = cache.get(expression) {
                return Ok(Arc::clone(program));
            }
        }

        let compiled = Program::compile(expression).map_err(|e| CelError::Evaluation {
            expression: expression.to_string(),
            message: e.to_string(),
        })?;
        let program = Arc::new(compiled);

        let mut cache = self.programs.write().expect("program cache lock poisoned");
        // Another thread may have compiled while we waited for the lock.
        if let Some(existing) = cache.get(expression) {
            return Ok(Arc::clone(existing));
        }
        cache.insert(expression.to_string(), Arc::clone(&program));
        debug!(
            expression = expression,
            cache_size = cache.len(),
            "CEL program compiled and cached"
        );
        Ok(program)
    }
}

fn to_cel_value(value: &Value) -> cel::Value {
    match value {
        Value::Null => cel::Value::Null,
        Value::Bool(b) => cel::Value::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                cel::Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                cel::Value::UInt(u)
            } else {
                cel::Value::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => cel::Value::String(Arc::new(s.clone())),
        Value::Array(items) => {
            cel::Value::List(Arc::new(items.iter().map(to_cel_value).collect()))
        }
        Value::Object(map) => {
            let entries: HashMap<String, cel::Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), to_cel_value(v)))
                .collect();
            cel::Value::Map(entries.into())
        }
    }
}

impl Evaluator for CelBackend {
    fn evaluate(&self, expression: &str, context: &Value) -> Result<bool, CelError> {
        let program = self.get_or_compile(expression)?;

        let mut ctx = Context::default();
        if let Value::Object(map) = context {
            for (name, value) in map {
                ctx.add_variable_from_value(name.clone(), to_cel_value(value));
            }
        }

        match program.execute(&ctx) {
            Ok(cel::Value::Bool(b)) => Ok(b),
            Ok(other) => Err(CelError::Evaluation {
                expression: expression.to_string(),
                message: format!("expression produced a non-boolean result: {other:?}"),
            }),
            Err(e) => Err(CelError::Evaluation {
                expression: expression.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "identity": {"authenticated": true, "tenant": "acme"},
            "request": {"method": "POST", "body": {"json": {"amount": 150}}},
        })
    }

    #[test]
    fn evaluates_safe_subset_identically_to_builtin() {
        let backend = CelBackend::new();
        let builtin = super::super::SafeEvaluator::new();
        for expr in [
            "identity.authenticated == true",
            "request.method == 'POST'",
            "request.body.json.amount > 100",
        ] {
            assert_eq!(
                backend.evaluate(expr, &ctx()).unwrap(),
                builtin.evaluate(expr, &ctx()).unwrap(),
                "backends disagree on {expr}"
            );
        }
    }

    #[test]
    fn caches_compiled_programs() {
        let backend = CelBackend::new();
        assert_eq!(backend.cached_programs(), 0);
        backend
            .evaluate("identity.authenticated == true", &ctx())
            .unwrap();
        backend
            .evaluate("identity.authenticated == true", &ctx())
            .unwrap();
        assert_eq!(backend.cached_programs(), 1);
    }

    #[test]
    fn compile_failure_carries_expression() {
        let backend = CelBackend::new();
        let err = backend.evaluate("1 +", &ctx()).unwrap_err();
        assert!(matches!(err, CelError::Evaluation { .. }));
    }
}

//! Built-in safe expression backend.

use serde_json::Value;

use super::parser::{self, CmpOp, Expr, Literal, NumOp, Operand, SizeOp};
use super::{CelError, Evaluator};

static NULL: Value = Value::Null;

/// The built-in backend. Stateless; evaluation is a pure function of the
/// expression and the context tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafeEvaluator;

impl SafeEvaluator {
    pub fn new() -> Self {
        SafeEvaluator
    }
}

impl Evaluator for SafeEvaluator {
    fn evaluate(&self, expression: &str, context: &Value) -> Result<bool, CelError> {
        let ast = parser::parse(expression)?;
        eval_expr(&ast, context).map_err(|message| CelError::Evaluation {
            expression: expression.to_string(),
            message,
        })
    }
}

/// Walk `path` as nested mapping access. Any non-mapping intermediate
/// yields null without error.
fn resolve<'a>(context: &'a Value, path: &str) -> &'a Value {
    let mut current = context;
    for part in path.split('.') {
        match current {
            Value::Object(map) => current = map.get(part).unwrap_or(&NULL),
            _ => return &NULL,
        }
    }
    current
}

/// Equality with numeric coercion: `5 == 5.0` holds, as integers and floats
/// both denote JSON numbers.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(fx), Some(fy)) => fx == fy,
            _ => x == y,
        },
        _ => a == b,
    }
}

fn literal_to_value(literal: &Literal) -> Value {
    match literal {
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Str(s) => Value::String(s.clone()),
        Literal::Int(n) => Value::from(*n),
        Literal::Float(f) => Value::from(*f),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn eval_expr(expr: &Expr, context: &Value) -> Result<bool, String> {
    match expr {
        Expr::And(parts) => {
            for part in parts {
                if !eval_expr(part, context)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Expr::Or(parts) => {
            for part in parts {
                if eval_expr(part, context)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Expr::Compare { path, op, rhs } => {
            let actual = resolve(context, path);
            let expected = match rhs {
                Operand::Literal(literal) => literal_to_value(literal),
                Operand::Path(other) => resolve(context, other).clone(),
            };
            let equal = json_eq(actual, &expected);
            Ok(match op {
                CmpOp::Eq => equal,
                CmpOp::Ne => !equal,
            })
        }
        Expr::Membership { path, list } => {
            // Scalar-in-list semantics: an array left-hand side is compared
            // as an element and therefore never matches.
            let actual = resolve(context, path);
            Ok(list
                .iter()
                .any(|item| json_eq(actual, &literal_to_value(item))))
        }
        Expr::SizeCheck { path, op, limit } => {
            let size = match resolve(context, path) {
                Value::Null => 0,
                Value::String(s) => s.chars().count() as u64,
                Value::Array(items) => items.len() as u64,
                Value::Object(map) => map.len() as u64,
                other => return Err(format!("size() is undefined for {other}")),
            };
            Ok(match op {
                SizeOp::Lt => size < *limit,
                SizeOp::Le => size <= *limit,
                SizeOp::Gt => size > *limit,
                SizeOp::Ge => size >= *limit,
                SizeOp::Eq => size == *limit,
            })
        }
        Expr::NumericCompare { path, op, value } => {
            // Missing or non-numeric values fail the predicate, never raise.
            let Some(actual) = as_number(resolve(context, path)) else {
                return Ok(false);
            };
            Ok(match op {
                NumOp::Lt => actual < *value,
                NumOp::Le => actual <= *value,
                NumOp::Gt => actual > *value,
                NumOp::Ge => actual >= *value,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> Value {
        json!({
            "identity": {
                "authenticated": true,
                "subject": "user-1",
                "tenant": "acme",
                "roles": ["admin"],
            },
            "request": {
                "method": "POST",
                "path": "/orders",
                "body": {
                    "present": true,
                    "sizeBytes": 64,
                    "json": {
                        "tenantId": "acme",
                        "amount": 150,
                        "price": "19.99",
                        "name": "widget",
                        "tags": ["a", "b"],
                    },
                },
            },
        })
    }

    fn eval(expr: &str) -> bool {
        SafeEvaluator::new().evaluate(expr, &ctx()).unwrap()
    }

    #[test]
    fn auth_check() {
        assert!(eval("identity.authenticated == true"));
        assert!(!eval("identity.authenticated == false"));
    }

    #[test]
    fn equality_and_inequality() {
        assert!(eval("request.method == 'POST'"));
        assert!(eval("request.method != 'GET'"));
        assert!(eval("request.body.json.amount == 150"));
        assert!(eval("request.body.json.amount == 150.0"));
    }

    #[test]
    fn tenant_binding_resolves_both_sides() {
        assert!(eval("identity.tenant == request.body.json.tenantId"));
        assert!(!eval("identity.subject == request.body.json.tenantId"));
    }

    #[test]
    fn missing_path_resolves_to_null_without_error() {
        // intermediate is a string, not a mapping
        assert!(!eval("request.method.nested == 'x'"));
        // null == null holds for two missing paths
        assert!(eval("request.body.json.missing == identity.missing"));
    }

    #[test]
    fn membership_is_scalar_in_list() {
        assert!(eval("identity.tenant in ['acme', 'globex']"));
        assert!(!eval("identity.tenant in ['globex']"));
        // array LHS compared as an element: never matches
        assert!(!eval("identity.roles in ['admin', 'superuser']"));
    }

    #[test]
    fn size_checks() {
        assert!(eval("size(request.body.json.name) <= 100"));
        assert!(eval("size(request.body.json.name) == 6"));
        assert!(eval("size(request.body.json.tags) == 2"));
        assert!(eval("size(request.body.json.json) == 0")); // nil -> 0
        assert!(eval("size(request.body.json) == 5"));
    }

    #[test]
    fn size_of_number_is_an_evaluation_error() {
        let err = SafeEvaluator::new()
            .evaluate("size(request.body.json.amount) <= 3", &ctx())
            .unwrap_err();
        assert!(matches!(err, CelError::Evaluation { .. }));
    }

    #[test]
    fn numeric_comparisons() {
        assert!(eval("request.body.json.amount > 100"));
        assert!(eval("request.body.json.amount <= 150"));
        assert!(!eval("request.body.json.amount < 100"));
        // numeric strings coerce
        assert!(eval("request.body.json.price < 20"));
        // non-numeric and missing values fail the predicate, never raise
        assert!(!eval("request.body.json.name > 0"));
        assert!(!eval("request.body.json.missing > 0"));
    }

    #[test]
    fn compound_expressions_short_circuit() {
        assert!(eval(
            "identity.authenticated == true && request.method == 'POST'"
        ));
        assert!(!eval(
            "identity.authenticated == false && request.method == 'POST'"
        ));
        assert!(eval(
            "identity.authenticated == false || request.method == 'POST'"
        ));
    }

    #[test]
    fn evaluation_is_pure() {
        let context = ctx();
        let before = serde_json::to_string(&context).unwrap();
        let evaluator = SafeEvaluator::new();
        let first = evaluator
            .evaluate("request.body.json.amount > 100", &context)
            .unwrap();
        let second = evaluator
            .evaluate("request.body.json.amount > 100", &context)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(before, serde_json::to_string(&context).unwrap());
    }

    #[test]
    fn unsupported_pattern_carries_expression() {
        let err = SafeEvaluator::new()
            .evaluate("system('reboot')", &ctx())
            .unwrap_err();
        match err {
            CelError::Unsupported { expression } => {
                assert_eq!(expression, "system('reboot')")
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}

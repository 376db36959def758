//! Recursive-descent parser for the safe predicate grammar.
//!
//! Grammar, tried in order:
//!
//! ```text
//! expr     := conj ( " && " conj )*          -- && splits outermost
//! conj     := term ( " || " term )*
//! term     := size-check | membership | comparison
//! size     := "size(" path ")" (<=|<|>=|>|==) integer
//! member   := path " in " "[" literal ("," literal)* "]"
//! compare  := path (==|!=) (literal | path)
//!           | path (>|>=|<|<=) number
//! literal  := true | false | quoted string | integer | float | bare word
//! ```
//!
//! Splitting respects quoted strings and bracket nesting, so list items and
//! string literals may contain the separator characters. Anything outside
//! the grammar is rejected with the source expression attached.

use super::CelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Ne,
}

/// Ordering operators accepted by `size(...)` checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SizeOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

/// Ordering operators accepted by numeric comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NumOp {
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Literal {
    Bool(bool),
    Str(String),
    Int(i64),
    Float(f64),
}

/// Right-hand side of an equality comparison: a literal, or a bare
/// identifier path resolved against the context (path-vs-path comparisons,
/// e.g. tenant binding checks).
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Operand {
    Literal(Literal),
    Path(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Compare {
        path: String,
        op: CmpOp,
        rhs: Operand,
    },
    Membership {
        path: String,
        list: Vec<Literal>,
    },
    SizeCheck {
        path: String,
        op: SizeOp,
        limit: u64,
    },
    NumericCompare {
        path: String,
        op: NumOp,
        value: f64,
    },
}

fn unsupported(expression: &str) -> CelError {
    CelError::Unsupported {
        expression: expression.to_string(),
    }
}

fn is_path(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && !s.starts_with('.')
        && !s.ends_with('.')
        && !s.contains("..")
}

/// Split `input` on `sep` at the outermost level only: occurrences inside
/// quoted strings or brackets do not count.
fn split_top_level<'a>(input: &'a str, sep: &str) -> Vec<&'a str> {
    let bytes = input.as_bytes();
    let sep_bytes = sep.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                b'\'' | b'"' => quote = Some(c),
                b'[' | b'(' => depth += 1,
                b']' | b')' => depth = depth.saturating_sub(1),
                _ => {
                    if depth == 0 && bytes[i..].starts_with(sep_bytes) {
                        parts.push(&input[start..i]);
                        i += sep_bytes.len();
                        start = i;
                        continue;
                    }
                }
            },
        }
        i += 1;
    }
    parts.push(&input[start..]);
    parts
}

/// Parse one literal token. Bare words fall back to strings; whether a bare
/// word is instead a context path is the caller's decision.
fn parse_literal(token: &str) -> Option<Literal> {
    let token = token.trim();
    match token {
        "true" => return Some(Literal::Bool(true)),
        "false" => return Some(Literal::Bool(false)),
        _ => {}
    }
    if token.len() >= 2 {
        let first = token.as_bytes()[0];
        let last = token.as_bytes()[token.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return Some(Literal::Str(token[1..token.len() - 1].to_string()));
        }
    }
    if let Ok(n) = token.parse::<i64>() {
        return Some(Literal::Int(n));
    }
    if let Ok(f) = token.parse::<f64>() {
        return Some(Literal::Float(f));
    }
    if is_path(token) {
        // Bare identifier: kept as a string, the way list items like
        // `[admin, superuser]` are written.
        return Some(Literal::Str(token.to_string()));
    }
    None
}

/// Parse a list body (`a, 'b,c', 3`), respecting quoted commas.
fn parse_list(body: &str, expression: &str) -> Result<Vec<Literal>, CelError> {
    let mut items = Vec::new();
    for part in split_top_level(body, ",") {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        items.push(parse_literal(part).ok_or_else(|| unsupported(expression))?);
    }
    Ok(items)
}

fn parse_size_check(term: &str, expression: &str) -> Result<Expr, CelError> {
    let inner = term.strip_prefix("size(").ok_or_else(|| unsupported(expression))?;
    let close = inner.find(')').ok_or_else(|| unsupported(expression))?;
    let path = inner[..close].trim();
    if !is_path(path) {
        return Err(unsupported(expression));
    }
    let rest = inner[close + 1..].trim();
    let (op, remainder) = if let Some(r) = rest.strip_prefix("<=") {
        (SizeOp::Le, r)
    } else if let Some(r) = rest.strip_prefix(">=") {
        (SizeOp::Ge, r)
    } else if let Some(r) = rest.strip_prefix("==") {
        (SizeOp::Eq, r)
    } else if let Some(r) = rest.strip_prefix('<') {
        (SizeOp::Lt, r)
    } else if let Some(r) = rest.strip_prefix('>') {
        (SizeOp::Gt, r)
    } else {
        return Err(unsupported(expression));
    };
    let limit = remainder
        .trim()
        .parse::<u64>()
        .map_err(|_| unsupported(expression))?;
    Ok(Expr::SizeCheck {
        path: path.to_string(),
        op,
        limit,
    })
}

fn parse_membership(term: &str, expression: &str) -> Result<Expr, CelError> {
    let parts = split_top_level(term, " in ");
    if parts.len() != 2 {
        return Err(unsupported(expression));
    }
    let path = parts[0].trim();
    let rhs = parts[1].trim();
    if !is_path(path) || !rhs.starts_with('[') || !rhs.ends_with(']') {
        return Err(unsupported(expression));
    }
    let list = parse_list(&rhs[1..rhs.len() - 1], expression)?;
    Ok(Expr::Membership {
        path: path.to_string(),
        list,
    })
}

/// Locate the first comparison operator outside quotes. Two-character
/// operators are matched before their one-character prefixes.
fn find_operator(term: &str) -> Option<(usize, &'static str)> {
    let bytes = term.as_bytes();
    let mut quote: Option<u8> = None;
    for i in 0..bytes.len() {
        let c = bytes[i];
        match quote {
            Some(q) => {
                if c == q {
                    quote = None;
                }
            }
            None => {
                if c == b'\'' || c == b'"' {
                    quote = Some(c);
                    continue;
                }
                for op in ["==", "!=", ">=", "<=", ">", "<"] {
                    if bytes[i..].starts_with(op.as_bytes()) {
                        return Some((i, op));
                    }
                }
            }
        }
    }
    None
}

fn parse_comparison(term: &str, expression: &str) -> Result<Expr, CelError> {
    let (pos, op) = find_operator(term).ok_or_else(|| unsupported(expression))?;
    let path = term[..pos].trim();
    let rhs = term[pos + op.len()..].trim();
    if !is_path(path) || rhs.is_empty() {
        return Err(unsupported(expression));
    }

    match op {
        "==" | "!=" => {
            let cmp = if op == "==" { CmpOp::Eq } else { CmpOp::Ne };
            // A bare dotted identifier on the right is a context path; any
            // other shape is a literal.
            let operand = if rhs.contains('.') && is_path(rhs) && rhs.parse::<f64>().is_err() {
                Operand::Path(rhs.to_string())
            } else {
                Operand::Literal(parse_literal(rhs).ok_or_else(|| unsupported(expression))?)
            };
            Ok(Expr::Compare {
                path: path.to_string(),
                op: cmp,
                rhs: operand,
            })
        }
        ">" | ">=" | "<" | "<=" => {
            let value = rhs.parse::<f64>().map_err(|_| unsupported(expression))?;
            let num_op = match op {
                ">" => NumOp::Gt,
                ">=" => NumOp::Ge,
                "<" => NumOp::Lt,
                _ => NumOp::Le,
            };
            Ok(Expr::NumericCompare {
                path: path.to_string(),
                op: num_op,
                value,
            })
        }
        _ => Err(unsupported(expression)),
    }
}

fn parse_term(term: &str, expression: &str) -> Result<Expr, CelError> {
    let term = term.trim();
    if term.starts_with("size(") {
        return parse_size_check(term, expression);
    }
    if split_top_level(term, " in ").len() == 2 {
        return parse_membership(term, expression);
    }
    parse_comparison(term, expression)
}

fn parse_disjunction(input: &str, expression: &str) -> Result<Expr, CelError> {
    let parts = split_top_level(input, " || ");
    if parts.len() > 1 {
        let terms = parts
            .iter()
            .map(|p| parse_term(p, expression))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Expr::Or(terms));
    }
    parse_term(input, expression)
}

/// Parse an expression into its AST, or fail with the source expression.
pub(crate) fn parse(expression: &str) -> Result<Expr, CelError> {
    let trimmed = expression.trim();
    if trimmed.is_empty() {
        return Err(unsupported(expression));
    }

    let conjuncts = split_top_level(trimmed, " && ");
    if conjuncts.len() > 1 {
        let parts = conjuncts
            .iter()
            .map(|p| parse_disjunction(p.trim(), expression))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Expr::And(parts));
    }
    parse_disjunction(trimmed, expression)
}

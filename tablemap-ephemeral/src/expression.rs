//! Expression parser and evaluator
//!
//! Supports:
//! - KeyConditionExpression (for Query)
//! - ConditionExpression (for conditional writes and transaction checks)

use once_cell::sync::Lazy;
use regex_lite::Regex;
use std::cmp::Ordering;
use tablemap_core::{AttributeValue, ExpressionValues, Item};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExpressionError {
    #[error("Invalid expression: {0}")]
    Invalid(String),

    #[error("Missing expression attribute value: {0}")]
    MissingAttributeValue(String),

    #[error("Invalid operator: {0}")]
    InvalidOperator(String),
}

static KEY_BETWEEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^([\w.]+)\s+BETWEEN\s+(:\w+)\s+AND\s+(:\w+)$").expect("valid regex")
});
static COMPARISON_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([\w.]+)\s*(=|<>|<=|>=|<|>)\s*(:\w+)$").expect("valid regex")
});
static SIZE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^size\s*\(\s*([\w.]+)\s*\)\s*(=|<>|<=|>=|<|>)\s*(:\w+)$")
        .expect("valid regex")
});
static IN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^([\w.]+)\s+IN\s*\(([^)]+)\)$").expect("valid regex"));

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq, // =
    Ne, // <>
    Lt, // <
    Le, // <=
    Gt, // >
    Ge, // >=
}

impl ComparisonOp {
    fn parse(op: &str) -> Result<Self, ExpressionError> {
        Ok(match op {
            "=" => Self::Eq,
            "<>" => Self::Ne,
            "<" => Self::Lt,
            "<=" => Self::Le,
            ">" => Self::Gt,
            ">=" => Self::Ge,
            _ => return Err(ExpressionError::InvalidOperator(op.to_string())),
        })
    }

    /// Apply the operator to an ordering; `None` means the operands were not comparable
    fn holds(self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (Self::Ne, None) => true,
            (_, None) => false,
            (Self::Eq, Some(o)) => o == Ordering::Equal,
            (Self::Ne, Some(o)) => o != Ordering::Equal,
            (Self::Lt, Some(o)) => o == Ordering::Less,
            (Self::Le, Some(o)) => o != Ordering::Greater,
            (Self::Gt, Some(o)) => o == Ordering::Greater,
            (Self::Ge, Some(o)) => o != Ordering::Less,
        }
    }
}

/// Parsed condition expression
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionOp {
    Comparison {
        path: String,
        op: ComparisonOp,
        value: String,
    },
    Between {
        path: String,
        low: String,
        high: String,
    },
    In {
        path: String,
        values: Vec<String>,
    },
    /// `size(path) <op> :value`
    SizeComparison {
        path: String,
        op: ComparisonOp,
        value: String,
    },
    AttributeExists(String),
    AttributeNotExists(String),
    AttributeType(String, String), // path, type placeholder
    BeginsWith(String, String),    // path, value placeholder
    Contains(String, String),      // path, value placeholder
    And(Box<ConditionOp>, Box<ConditionOp>),
    Or(Box<ConditionOp>, Box<ConditionOp>),
    Not(Box<ConditionOp>),
}

/// A single key condition
#[derive(Debug, Clone, PartialEq)]
pub enum KeyCondition {
    Compare {
        attribute: String,
        op: ComparisonOp,
        value: String,
    },
    Between {
        attribute: String,
        low: String,
        high: String,
    },
    BeginsWith {
        attribute: String,
        prefix: String,
    },
}

impl KeyCondition {
    pub fn attribute(&self) -> &str {
        match self {
            Self::Compare { attribute, .. }
            | Self::Between { attribute, .. }
            | Self::BeginsWith { attribute, .. } => attribute,
        }
    }

    /// Whether this is the `attr = :value` form a partition key requires
    pub fn is_equality(&self) -> bool {
        matches!(
            self,
            Self::Compare {
                op: ComparisonOp::Eq,
                ..
            }
        )
    }
}

/// Expression context for evaluation
pub struct ExpressionContext<'a> {
    pub attribute_values: &'a ExpressionValues,
}

impl<'a> ExpressionContext<'a> {
    pub fn new(values: &'a ExpressionValues) -> Self {
        Self {
            attribute_values: values,
        }
    }

    /// Resolve an attribute value (handles :value placeholders)
    pub fn resolve_value(&self, placeholder: &str) -> Result<&'a AttributeValue, ExpressionError> {
        self.attribute_values
            .get(placeholder)
            .ok_or_else(|| ExpressionError::MissingAttributeValue(placeholder.to_string()))
    }
}

/// Parse a key condition expression
///
/// Key conditions are restricted to:
/// - partition_key = :value
/// - partition_key = :value AND sort_key <op> :value
/// - partition_key = :value AND sort_key BETWEEN :v1 AND :v2
/// - partition_key = :value AND begins_with(sort_key, :v)
pub fn parse_key_condition(expression: &str) -> Result<Vec<KeyCondition>, ExpressionError> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Ok(vec![]);
    }

    split_by_and(expression)
        .into_iter()
        .map(parse_single_key_condition)
        .collect()
}

fn parse_single_key_condition(expr: &str) -> Result<KeyCondition, ExpressionError> {
    let expr = expr.trim();

    if let Some(inner) = function_args(expr, "begins_with") {
        let [attribute, prefix] = two_args(inner, "begins_with")?;
        return Ok(KeyCondition::BeginsWith {
            attribute: attribute.to_string(),
            prefix: prefix.to_string(),
        });
    }

    if let Some(caps) = KEY_BETWEEN_RE.captures(expr) {
        return Ok(KeyCondition::Between {
            attribute: caps[1].to_string(),
            low: caps[2].to_string(),
            high: caps[3].to_string(),
        });
    }

    if let Some(caps) = COMPARISON_RE.captures(expr) {
        let op = ComparisonOp::parse(&caps[2])?;
        if op == ComparisonOp::Ne {
            return Err(ExpressionError::InvalidOperator(
                "<> is not allowed in a key condition".to_string(),
            ));
        }
        return Ok(KeyCondition::Compare {
            attribute: caps[1].to_string(),
            op,
            value: caps[3].to_string(),
        });
    }

    Err(ExpressionError::Invalid(format!(
        "Could not parse key condition: {expr}"
    )))
}

/// Parse a condition expression
pub fn parse_condition(expression: &str) -> Result<Option<ConditionOp>, ExpressionError> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Ok(None);
    }

    parse_condition_expr(expression).map(Some)
}

fn parse_condition_expr(expr: &str) -> Result<ConditionOp, ExpressionError> {
    let expr = expr.trim();

    // Handle parentheses wrapping the whole expression
    if expr.starts_with('(') && find_matching_paren(expr, 0) == Some(expr.len() - 1) {
        return parse_condition_expr(&expr[1..expr.len() - 1]);
    }

    // OR binds loosest, then AND, then NOT
    if let Some((left, right)) = split_top_level(expr, "OR") {
        return Ok(ConditionOp::Or(
            Box::new(parse_condition_expr(left)?),
            Box::new(parse_condition_expr(right)?),
        ));
    }

    if let Some((left, right)) = split_top_level(expr, "AND") {
        return Ok(ConditionOp::And(
            Box::new(parse_condition_expr(left)?),
            Box::new(parse_condition_expr(right)?),
        ));
    }

    if keyword_at(expr.as_bytes(), 0, "NOT") {
        return Ok(ConditionOp::Not(Box::new(parse_condition_expr(&expr[3..])?)));
    }

    // Functions
    if let Some(inner) = function_args(expr, "attribute_exists") {
        return Ok(ConditionOp::AttributeExists(inner.trim().to_string()));
    }
    if let Some(inner) = function_args(expr, "attribute_not_exists") {
        return Ok(ConditionOp::AttributeNotExists(inner.trim().to_string()));
    }
    if let Some(inner) = function_args(expr, "attribute_type") {
        let [path, kind] = two_args(inner, "attribute_type")?;
        return Ok(ConditionOp::AttributeType(path.to_string(), kind.to_string()));
    }
    if let Some(inner) = function_args(expr, "begins_with") {
        let [path, prefix] = two_args(inner, "begins_with")?;
        return Ok(ConditionOp::BeginsWith(path.to_string(), prefix.to_string()));
    }
    if let Some(inner) = function_args(expr, "contains") {
        let [path, operand] = two_args(inner, "contains")?;
        return Ok(ConditionOp::Contains(path.to_string(), operand.to_string()));
    }

    if let Some(caps) = SIZE_RE.captures(expr) {
        return Ok(ConditionOp::SizeComparison {
            path: caps[1].to_string(),
            op: ComparisonOp::parse(&caps[2])?,
            value: caps[3].to_string(),
        });
    }

    if let Some(caps) = KEY_BETWEEN_RE.captures(expr) {
        return Ok(ConditionOp::Between {
            path: caps[1].to_string(),
            low: caps[2].to_string(),
            high: caps[3].to_string(),
        });
    }

    if let Some(caps) = IN_RE.captures(expr) {
        let values = caps[2].split(',').map(|s| s.trim().to_string()).collect();
        return Ok(ConditionOp::In {
            path: caps[1].to_string(),
            values,
        });
    }

    if let Some(caps) = COMPARISON_RE.captures(expr) {
        return Ok(ConditionOp::Comparison {
            path: caps[1].to_string(),
            op: ComparisonOp::parse(&caps[2])?,
            value: caps[3].to_string(),
        });
    }

    Err(ExpressionError::Invalid(format!(
        "Could not parse condition: {expr}"
    )))
}

// === Evaluation Functions ===

/// Evaluate a condition against an item
pub fn evaluate_condition(
    condition: &ConditionOp,
    item: &Item,
    ctx: &ExpressionContext,
) -> Result<bool, ExpressionError> {
    match condition {
        ConditionOp::Comparison { path, op, value } => {
            let expected = ctx.resolve_value(value)?;
            let actual = get_nested_attribute(item, path);
            Ok(match actual {
                Some(actual) => op.holds(compare_attribute_values(actual, expected)),
                None => *op == ComparisonOp::Ne,
            })
        }
        ConditionOp::Between { path, low, high } => {
            let low = ctx.resolve_value(low)?;
            let high = ctx.resolve_value(high)?;
            Ok(get_nested_attribute(item, path).is_some_and(|v| is_between(v, low, high)))
        }
        ConditionOp::In { path, values } => {
            let Some(actual) = get_nested_attribute(item, path) else {
                return Ok(false);
            };
            for placeholder in values {
                if values_equal(actual, ctx.resolve_value(placeholder)?) {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        ConditionOp::SizeComparison { path, op, value } => {
            let expected = ctx.resolve_value(value)?;
            let size = get_nested_attribute(item, path).and_then(attribute_size);
            Ok(size.is_some_and(|size| {
                op.holds(compare_attribute_values(
                    &AttributeValue::N(size.to_string()),
                    expected,
                ))
            }))
        }
        ConditionOp::AttributeExists(path) => Ok(get_nested_attribute(item, path).is_some()),
        ConditionOp::AttributeNotExists(path) => Ok(get_nested_attribute(item, path).is_none()),
        ConditionOp::AttributeType(path, kind) => {
            let expected = ctx.resolve_value(kind)?;
            Ok(
                match (get_nested_attribute(item, path), expected.as_string()) {
                    (Some(actual), Some(expected)) => actual.type_tag() == expected,
                    _ => false,
                },
            )
        }
        ConditionOp::BeginsWith(path, prefix) => {
            let prefix = ctx.resolve_value(prefix)?;
            Ok(begins_with(get_nested_attribute(item, path), prefix))
        }
        ConditionOp::Contains(path, operand) => {
            let operand = ctx.resolve_value(operand)?;
            Ok(match (get_nested_attribute(item, path), operand) {
                (Some(AttributeValue::S(haystack)), AttributeValue::S(needle)) => {
                    haystack.contains(needle.as_str())
                }
                (Some(AttributeValue::L(list)), needle) => {
                    list.iter().any(|elem| values_equal(elem, needle))
                }
                _ => false,
            })
        }
        ConditionOp::And(left, right) => {
            Ok(evaluate_condition(left, item, ctx)? && evaluate_condition(right, item, ctx)?)
        }
        ConditionOp::Or(left, right) => {
            Ok(evaluate_condition(left, item, ctx)? || evaluate_condition(right, item, ctx)?)
        }
        ConditionOp::Not(inner) => Ok(!evaluate_condition(inner, item, ctx)?),
    }
}

/// Evaluate key conditions against an item
pub fn evaluate_key_conditions(
    conditions: &[KeyCondition],
    item: &Item,
    ctx: &ExpressionContext,
) -> Result<bool, ExpressionError> {
    for cond in conditions {
        let actual = item.get(cond.attribute());

        let matches = match cond {
            KeyCondition::Compare { op, value, .. } => {
                let expected = ctx.resolve_value(value)?;
                actual.is_some_and(|v| op.holds(compare_attribute_values(v, expected)))
            }
            KeyCondition::Between { low, high, .. } => {
                let low = ctx.resolve_value(low)?;
                let high = ctx.resolve_value(high)?;
                actual.is_some_and(|v| is_between(v, low, high))
            }
            KeyCondition::BeginsWith { prefix, .. } => {
                begins_with(actual, ctx.resolve_value(prefix)?)
            }
        };

        if !matches {
            return Ok(false);
        }
    }

    Ok(true)
}

// === Helper Functions ===

fn compare_attribute_values(a: &AttributeValue, b: &AttributeValue) -> Option<Ordering> {
    a.compare(b)
}

fn values_equal(a: &AttributeValue, b: &AttributeValue) -> bool {
    a.compare(b).map_or(a == b, |o| o == Ordering::Equal)
}

fn is_between(value: &AttributeValue, low: &AttributeValue, high: &AttributeValue) -> bool {
    ComparisonOp::Ge.holds(value.compare(low)) && ComparisonOp::Le.holds(value.compare(high))
}

fn begins_with(value: Option<&AttributeValue>, prefix: &AttributeValue) -> bool {
    match (value, prefix) {
        (Some(AttributeValue::S(s)), AttributeValue::S(p)) => s.starts_with(p.as_str()),
        (Some(AttributeValue::B(b)), AttributeValue::B(p)) => b.starts_with(p),
        _ => false,
    }
}

/// Size as reported by `size()`: characters, bytes, or element count
fn attribute_size(value: &AttributeValue) -> Option<usize> {
    match value {
        AttributeValue::S(s) => Some(s.chars().count()),
        AttributeValue::B(b) => Some(b.len()),
        AttributeValue::L(l) => Some(l.len()),
        AttributeValue::M(m) => Some(m.len()),
        _ => None,
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b':' | b'#' | b'.')
}

/// Whether `keyword` (ASCII, case-insensitive) stands alone at byte `i`
fn keyword_at(bytes: &[u8], i: usize, keyword: &str) -> bool {
    let kw = keyword.as_bytes();
    let end = i + kw.len();
    end <= bytes.len()
        && bytes[i..end].eq_ignore_ascii_case(kw)
        && (i == 0 || !is_word_byte(bytes[i - 1]))
        && (end == bytes.len() || !is_word_byte(bytes[end]))
}

/// Split at the first top-level occurrence of a boolean keyword, skipping
/// the AND that belongs to a BETWEEN
fn split_top_level<'a>(expr: &'a str, keyword: &str) -> Option<(&'a str, &'a str)> {
    let bytes = expr.as_bytes();
    let mut depth = 0i32;
    let mut in_between = false;

    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => depth -= 1,
            _ if depth == 0 => {
                if keyword_at(bytes, i, "BETWEEN") {
                    in_between = true;
                    i += "BETWEEN".len();
                    continue;
                }
                if in_between && keyword_at(bytes, i, "AND") {
                    in_between = false;
                    i += "AND".len();
                    continue;
                }
                if keyword_at(bytes, i, keyword) {
                    return Some((expr[..i].trim(), expr[i + keyword.len()..].trim()));
                }
            }
            _ => {}
        }
        i += 1;
    }

    None
}

fn split_by_and(expr: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = expr;
    while let Some((left, right)) = split_top_level(rest, "AND") {
        parts.push(left);
        rest = right;
    }
    parts.push(rest.trim());
    parts.into_iter().filter(|s| !s.is_empty()).collect()
}

fn find_matching_paren(expr: &str, start: usize) -> Option<usize> {
    let bytes = expr.as_bytes();
    if bytes.get(start) != Some(&b'(') {
        return None;
    }

    let mut depth = 0;
    for (i, &b) in bytes[start..].iter().enumerate() {
        if b == b'(' {
            depth += 1;
        } else if b == b')' {
            depth -= 1;
            if depth == 0 {
                return Some(start + i);
            }
        }
    }
    None
}

/// Arguments of `name(...)` when the whole expression is that call
fn function_args<'a>(expr: &'a str, name: &str) -> Option<&'a str> {
    let bytes = expr.as_bytes();
    if bytes.len() <= name.len() || !bytes[..name.len()].eq_ignore_ascii_case(name.as_bytes()) {
        return None;
    }

    let rest = &expr[name.len()..];
    let open = name.len() + (rest.len() - rest.trim_start().len());
    if find_matching_paren(expr, open)? != expr.len() - 1 {
        return None;
    }
    Some(&expr[open + 1..expr.len() - 1])
}

fn two_args<'a>(args: &'a str, func_name: &str) -> Result<[&'a str; 2], ExpressionError> {
    match split_function_args(args).as_slice() {
        [first, second] => Ok([first.trim(), second.trim()]),
        _ => Err(ExpressionError::Invalid(format!(
            "{func_name} requires 2 arguments"
        ))),
    }
}

fn split_function_args(args: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0;
    let mut last_pos = 0;

    for (i, &b) in args.as_bytes().iter().enumerate() {
        if b == b'(' {
            depth += 1;
        } else if b == b')' {
            depth -= 1;
        } else if b == b',' && depth == 0 {
            parts.push(&args[last_pos..i]);
            last_pos = i + 1;
        }
    }

    parts.push(&args[last_pos..]);
    parts
}

/// Get a nested attribute from an item using dot notation
fn get_nested_attribute<'a>(item: &'a Item, path: &str) -> Option<&'a AttributeValue> {
    let mut parts = path.split('.');
    let mut current = item.get(parts.next()?);

    for part in parts {
        match current {
            Some(AttributeValue::M(map)) => current = map.get(part),
            _ => return None,
        }
    }

    current
}

//! Composable condition expressions
//!
//! A [`Condition`] is a tree; [`Condition::render`] walks it left to right,
//! handing out `:v1`, `:v2`, ... to every literal, so placeholders of
//! composed conditions never collide.

use std::fmt;
use tablemap_core::{AttributeValue, ConditionExpression, ExpressionValues};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl Comparator {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "<>",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
        }
    }
}

impl fmt::Display for Comparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Primary key captured by a condition: partition value and optional sort value
pub type ConditionKey = (String, Option<String>);

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Renders to nothing; dropped from any request it is attached to
    NoOp,
    AttributeExists(String),
    AttributeNotExists(String),
    BeginsWith {
        attribute: String,
        prefix: AttributeValue,
    },
    Contains {
        attribute: String,
        operand: AttributeValue,
    },
    /// `size(attribute)`; only meaningful as the left side of a comparison
    Size(String),
    Compare {
        attribute: String,
        op: Comparator,
        value: AttributeValue,
    },
    /// Compare the rendered left condition (for example `size(tags)`)
    CompareTo {
        left: Box<Condition>,
        op: Comparator,
        value: AttributeValue,
    },
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
    Keyed {
        key: ConditionKey,
        inner: Box<Condition>,
    },
}

/// Output of [`Condition::render`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RenderedCondition {
    pub expression: String,
    /// First placeholder index not used by this condition
    pub next_index: usize,
    pub values: ExpressionValues,
    pub key: Option<ConditionKey>,
}

impl RenderedCondition {
    pub fn is_empty(&self) -> bool {
        self.expression.is_empty()
    }
}

struct RenderState {
    next_index: usize,
    values: ExpressionValues,
    key: Option<ConditionKey>,
}

impl RenderState {
    fn bind(&mut self, value: &AttributeValue) -> String {
        let placeholder = format!(":v{}", self.next_index);
        self.next_index += 1;
        self.values.insert(placeholder.clone(), value.clone());
        placeholder
    }
}

impl Condition {
    pub fn none() -> Self {
        Condition::NoOp
    }

    pub fn attribute_exists(attribute: impl Into<String>) -> Self {
        Condition::AttributeExists(attribute.into())
    }

    pub fn attribute_not_exists(attribute: impl Into<String>) -> Self {
        Condition::AttributeNotExists(attribute.into())
    }

    pub fn begins_with(attribute: impl Into<String>, prefix: impl Into<String>) -> Self {
        Condition::BeginsWith {
            attribute: attribute.into(),
            prefix: AttributeValue::S(prefix.into()),
        }
    }

    pub fn contains(attribute: impl Into<String>, operand: impl Into<AttributeValue>) -> Self {
        Condition::Contains {
            attribute: attribute.into(),
            operand: operand.into(),
        }
    }

    pub fn size(attribute: impl Into<String>) -> Self {
        Condition::Size(attribute.into())
    }

    fn compare(attribute: impl Into<String>, op: Comparator, value: impl Into<AttributeValue>) -> Self {
        Condition::Compare {
            attribute: attribute.into(),
            op,
            value: value.into(),
        }
    }

    pub fn equal(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::compare(attribute, Comparator::Equal, value)
    }

    pub fn not_equal(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::compare(attribute, Comparator::NotEqual, value)
    }

    pub fn less_than(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::compare(attribute, Comparator::LessThan, value)
    }

    pub fn less_than_or_equal(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::compare(attribute, Comparator::LessThanOrEqual, value)
    }

    pub fn greater_than(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::compare(attribute, Comparator::GreaterThan, value)
    }

    pub fn greater_than_or_equal(
        attribute: impl Into<String>,
        value: impl Into<AttributeValue>,
    ) -> Self {
        Self::compare(attribute, Comparator::GreaterThanOrEqual, value)
    }

    fn continue_with(self, op: Comparator, value: impl Into<AttributeValue>) -> Self {
        Condition::CompareTo {
            left: Box::new(self),
            op,
            value: value.into(),
        }
    }

    pub fn equal_to(self, value: impl Into<AttributeValue>) -> Self {
        self.continue_with(Comparator::Equal, value)
    }

    pub fn not_equal_to(self, value: impl Into<AttributeValue>) -> Self {
        self.continue_with(Comparator::NotEqual, value)
    }

    pub fn less_than_value(self, value: impl Into<AttributeValue>) -> Self {
        self.continue_with(Comparator::LessThan, value)
    }

    pub fn less_than_or_equal_to(self, value: impl Into<AttributeValue>) -> Self {
        self.continue_with(Comparator::LessThanOrEqual, value)
    }

    pub fn greater_than_value(self, value: impl Into<AttributeValue>) -> Self {
        self.continue_with(Comparator::GreaterThan, value)
    }

    pub fn greater_than_or_equal_to(self, value: impl Into<AttributeValue>) -> Self {
        self.continue_with(Comparator::GreaterThanOrEqual, value)
    }

    pub fn and(self, other: Condition) -> Self {
        match (self, other) {
            (Condition::NoOp, other) => other,
            (this, Condition::NoOp) => this,
            (this, other) => Condition::And(Box::new(this), Box::new(other)),
        }
    }

    pub fn or(self, other: Condition) -> Self {
        match (self, other) {
            (Condition::NoOp, other) => other,
            (this, Condition::NoOp) => this,
            (this, other) => Condition::Or(Box::new(this), Box::new(other)),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        match self {
            Condition::NoOp => Condition::NoOp,
            this => Condition::Not(Box::new(this)),
        }
    }

    /// Attach the primary key of the item this condition checks
    pub fn keyed(self, partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Condition::Keyed {
            key: (partition.into(), Some(sort.into())),
            inner: Box::new(self),
        }
    }

    /// Attach a partition-only key, for tables without a sort key
    pub fn keyed_partition(self, partition: impl Into<String>) -> Self {
        Condition::Keyed {
            key: (partition.into(), None),
            inner: Box::new(self),
        }
    }

    pub fn is_noop(&self) -> bool {
        matches!(self.unkeyed(), Condition::NoOp)
    }

    fn unkeyed(&self) -> &Condition {
        match self {
            Condition::Keyed { inner, .. } => inner.unkeyed(),
            other => other,
        }
    }

    /// Render with placeholders numbered from `start`
    pub fn render(&self, start: usize) -> RenderedCondition {
        let mut state = RenderState {
            next_index: start,
            values: ExpressionValues::new(),
            key: None,
        };
        let expression = self.render_into(&mut state);
        RenderedCondition {
            expression,
            next_index: state.next_index,
            values: state.values,
            key: state.key,
        }
    }

    /// Render from `:v1`; `None` for a condition that renders to nothing
    pub fn to_expression(&self) -> Option<ConditionExpression> {
        let rendered = self.render(1);
        (!rendered.is_empty())
            .then(|| ConditionExpression::new(rendered.expression, rendered.values))
    }

    fn render_into(&self, state: &mut RenderState) -> String {
        match self {
            Condition::NoOp => String::new(),
            Condition::AttributeExists(attribute) => format!("attribute_exists({attribute})"),
            Condition::AttributeNotExists(attribute) => {
                format!("attribute_not_exists({attribute})")
            }
            Condition::BeginsWith { attribute, prefix } => {
                format!("begins_with({attribute}, {})", state.bind(prefix))
            }
            Condition::Contains { attribute, operand } => {
                format!("contains({attribute}, {})", state.bind(operand))
            }
            Condition::Size(attribute) => format!("size({attribute})"),
            Condition::Compare {
                attribute,
                op,
                value,
            } => format!("{attribute} {op} {}", state.bind(value)),
            Condition::CompareTo { left, op, value } => {
                let left = left.render_into(state);
                format!("{left} {op} {}", state.bind(value))
            }
            Condition::And(left, right) => Self::join(left, right, "AND", state),
            Condition::Or(left, right) => Self::join(left, right, "OR", state),
            Condition::Not(inner) => {
                let inner = inner.render_into(state);
                if inner.is_empty() {
                    inner
                } else {
                    format!("NOT ({inner})")
                }
            }
            Condition::Keyed { key, inner } => {
                if state.key.is_none() {
                    state.key = Some(key.clone());
                }
                inner.render_into(state)
            }
        }
    }

    fn join(left: &Condition, right: &Condition, keyword: &str, state: &mut RenderState) -> String {
        let rendered_left = left.render_into(state);
        let rendered_right = right.render_into(state);
        match (rendered_left.is_empty(), rendered_right.is_empty()) {
            (true, _) => rendered_right,
            (_, true) => rendered_left,
            _ => format!(
                "{} {keyword} {}",
                left.group(rendered_left, keyword),
                right.group(rendered_right, keyword)
            ),
        }
    }

    /// Parenthesize a combinator of the other kind
    fn group(&self, rendered: String, keyword: &str) -> String {
        let other_kind = match self.unkeyed() {
            Condition::And(..) => keyword != "AND",
            Condition::Or(..) => keyword != "OR",
            _ => false,
        };
        if other_kind {
            format!("({rendered})")
        } else {
            rendered
        }
    }
}

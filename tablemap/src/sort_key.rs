//! Sort-key predicates for key-condition queries

use tablemap_core::{AttributeValue, ExpressionValues};

/// Marker replaced by the resolved sort-key attribute name
pub const SORT_KEY_MARKER: &str = "<SORT_KEY>";

const VALUE: &str = ":skVal";
const LOW: &str = ":skVal1";
const HIGH: &str = ":skVal2";

/// Condition on the sort key of a single-partition query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKey {
    Exactly(String),
    GreaterThan(String),
    GreaterThanOrEqual(String),
    LessThan(String),
    LessThanOrEqual(String),
    BeginsWith(String),
    Between(String, String),
}

impl SortKey {
    pub fn exactly(value: impl Into<String>) -> Self {
        SortKey::Exactly(value.into())
    }

    pub fn begins_with(prefix: impl Into<String>) -> Self {
        SortKey::BeginsWith(prefix.into())
    }

    pub fn between(low: impl Into<String>, high: impl Into<String>) -> Self {
        SortKey::Between(low.into(), high.into())
    }

    /// Expression template with [`SORT_KEY_MARKER`] in place of the attribute
    pub fn template(&self) -> String {
        match self {
            SortKey::Exactly(_) => format!("{SORT_KEY_MARKER} = {VALUE}"),
            SortKey::GreaterThan(_) => format!("{SORT_KEY_MARKER} > {VALUE}"),
            SortKey::GreaterThanOrEqual(_) => format!("{SORT_KEY_MARKER} >= {VALUE}"),
            SortKey::LessThan(_) => format!("{SORT_KEY_MARKER} < {VALUE}"),
            SortKey::LessThanOrEqual(_) => format!("{SORT_KEY_MARKER} <= {VALUE}"),
            SortKey::BeginsWith(_) => format!("begins_with({SORT_KEY_MARKER}, {VALUE})"),
            SortKey::Between(..) => format!("{SORT_KEY_MARKER} BETWEEN {LOW} AND {HIGH}"),
        }
    }

    pub fn render(&self, attribute: &str) -> String {
        self.template().replace(SORT_KEY_MARKER, attribute)
    }

    /// Placeholder table for the rendered template
    pub fn values(&self) -> ExpressionValues {
        match self {
            SortKey::Between(low, high) => ExpressionValues::from([
                (LOW.to_string(), AttributeValue::string(low.as_str())),
                (HIGH.to_string(), AttributeValue::string(high.as_str())),
            ]),
            SortKey::Exactly(v)
            | SortKey::GreaterThan(v)
            | SortKey::GreaterThanOrEqual(v)
            | SortKey::LessThan(v)
            | SortKey::LessThanOrEqual(v)
            | SortKey::BeginsWith(v) => {
                ExpressionValues::from([(VALUE.to_string(), AttributeValue::string(v.as_str()))])
            }
        }
    }

    /// The value of an exact match
    pub fn exact(&self) -> Option<&str> {
        match self {
            SortKey::Exactly(v) => Some(v),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_substitutes_attribute() {
        assert_eq!(SortKey::exactly("a").render("sk"), "sk = :skVal");
        assert_eq!(
            SortKey::begins_with("2024").render("gsi1sk"),
            "begins_with(gsi1sk, :skVal)"
        );
        assert_eq!(
            SortKey::between("a", "m").render("sk"),
            "sk BETWEEN :skVal1 AND :skVal2"
        );
        assert_eq!(
            SortKey::GreaterThanOrEqual("x".into()).template(),
            "<SORT_KEY> >= :skVal"
        );
    }

    #[test]
    fn test_values() {
        let values = SortKey::between("a", "m").values();
        assert_eq!(values[":skVal1"], AttributeValue::string("a"));
        assert_eq!(values[":skVal2"], AttributeValue::string("m"));

        let values = SortKey::LessThan("z".into()).values();
        assert_eq!(values.len(), 1);
        assert_eq!(values[":skVal"], AttributeValue::string("z"));
    }

    #[test]
    fn test_exact() {
        assert_eq!(SortKey::exactly("k").exact(), Some("k"));
        assert_eq!(SortKey::begins_with("k").exact(), None);
    }
}

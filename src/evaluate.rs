//! Condition evaluation
//!
//! Rules are checked in order and the first match picks the branch. Values
//! are compared numerically when both sides parse as numbers, otherwise as
//! trimmed, case-insensitive strings. A missing variable reads as `""`.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;

use crate::flow::ConditionRule;
use crate::interpolate::{display_value, lookup, render};
use crate::types::Variables;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[serde(alias = "eq", alias = "==")]
    Equals,
    #[serde(alias = "not-equals", alias = "neq", alias = "!=")]
    NotEquals,
    Contains,
    #[serde(alias = "greater-than", alias = "gt", alias = ">")]
    GreaterThan,
    #[serde(alias = "less-than", alias = "lt", alias = "<")]
    LessThan,
    #[serde(alias = "is-empty")]
    IsEmpty,
    #[serde(alias = "is-set", alias = "is_not_empty")]
    IsSet,
}

/// Parse a number the way contacts type them ("3", " 4.5 ", "4,5")
pub fn parse_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let normalized = if trimmed.contains(',') && !trimmed.contains('.') {
        trimmed.replace(',', ".")
    } else {
        trimmed.to_string()
    };
    normalized.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Order two operands, numerically when both are numbers
pub fn compare(left: &str, right: &str) -> Ordering {
    match (parse_number(left), parse_number(right)) {
        (Some(l), Some(r)) => l.partial_cmp(&r).unwrap_or(Ordering::Equal),
        _ => left.trim().to_lowercase().cmp(&right.trim().to_lowercase()),
    }
}

fn contains(value: Option<&JsonValue>, needle: &str) -> bool {
    let needle = needle.trim().to_lowercase();
    match value {
        Some(JsonValue::Array(items)) => items
            .iter()
            .any(|item| display_value(item).trim().to_lowercase() == needle),
        Some(other) => display_value(other).to_lowercase().contains(&needle),
        None => needle.is_empty(),
    }
}

/// Apply one operator to a variable value and an already rendered literal
pub fn apply(operator: Operator, value: Option<&JsonValue>, literal: &str) -> bool {
    let text = value.map(display_value).unwrap_or_default();
    match operator {
        Operator::Equals => compare(&text, literal) == Ordering::Equal,
        Operator::NotEquals => compare(&text, literal) != Ordering::Equal,
        Operator::Contains => contains(value, literal),
        Operator::GreaterThan => compare(&text, literal) == Ordering::Greater,
        Operator::LessThan => compare(&text, literal) == Ordering::Less,
        Operator::IsEmpty => text.trim().is_empty(),
        Operator::IsSet => !text.trim().is_empty(),
    }
}

pub fn evaluate_rule(rule: &ConditionRule, scope: &Variables) -> bool {
    let literal = render(&rule.value, scope);
    apply(rule.operator, lookup(scope, &rule.variable), &literal)
}

/// Label of the first matching rule, `None` when the default edge applies
pub fn select_branch<'a>(rules: &'a [ConditionRule], scope: &Variables) -> Option<&'a str> {
    rules
        .iter()
        .find(|rule| evaluate_rule(rule, scope))
        .map(|rule| rule.label.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;
    use serde_json::json;

    fn rule(variable: &str, operator: Operator, value: &str, label: &str) -> ConditionRule {
        ConditionRule {
            variable: variable.to_string(),
            operator,
            value: value.to_string(),
            label: label.to_string(),
        }
    }

    #[test]
    fn test_missing_variable_semantics() {
        let scope = Variables::new();

        assert!(evaluate_rule(&rule("nome", Operator::IsEmpty, "", "t"), &scope));
        assert!(!evaluate_rule(&rule("nome", Operator::IsSet, "", "t"), &scope));
        assert!(!evaluate_rule(&rule("nome", Operator::Equals, "x", "t"), &scope));
        assert!(evaluate_rule(&rule("nome", Operator::NotEquals, "x", "t"), &scope));
    }

    #[test]
    fn test_numeric_comparison_beats_string_order() {
        let scope: Variables = hashmap! { "idade".to_string() => json!("9") };

        // "9" > "10" as strings, but not as numbers
        assert!(evaluate_rule(&rule("idade", Operator::LessThan, "10", "t"), &scope));
        assert!(!evaluate_rule(&rule("idade", Operator::GreaterThan, "10", "t"), &scope));
        assert!(evaluate_rule(&rule("idade", Operator::Equals, "9.0", "t"), &scope));
    }

    #[test]
    fn test_string_fallback_is_case_insensitive() {
        let scope: Variables = hashmap! {
            "city".to_string() => json!(" Lisboa "),
            "tags".to_string() => json!(["VIP", "new"]),
        };

        assert!(evaluate_rule(&rule("city", Operator::Equals, "lisboa", "t"), &scope));
        assert!(evaluate_rule(&rule("city", Operator::Contains, "LIS", "t"), &scope));
        assert!(evaluate_rule(&rule("tags", Operator::Contains, "vip", "t"), &scope));
        assert!(!evaluate_rule(&rule("tags", Operator::Contains, "vi", "t"), &scope));
    }

    #[test]
    fn test_rule_value_is_interpolated() {
        let scope: Variables = hashmap! {
            "answer".to_string() => json!(42),
            "expected".to_string() => json!("42"),
        };
        assert!(evaluate_rule(
            &rule("answer", Operator::Equals, "{{expected}}", "t"),
            &scope
        ));
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let scope: Variables = hashmap! { "score".to_string() => json!(75) };
        let rules = vec![
            rule("score", Operator::GreaterThan, "90", "a"),
            rule("score", Operator::GreaterThan, "70", "b"),
            rule("score", Operator::GreaterThan, "50", "c"),
        ];
        assert_eq!(select_branch(&rules, &scope), Some("b"));

        let none = vec![rule("score", Operator::LessThan, "10", "low")];
        assert_eq!(select_branch(&none, &scope), None);
    }

    #[test]
    fn test_parse_number_forms() {
        assert_eq!(parse_number("4,5"), Some(4.5));
        assert_eq!(parse_number(" 12 "), Some(12.0));
        assert_eq!(parse_number("1,000.5"), None);
        assert_eq!(parse_number("nan"), None);
        assert_eq!(parse_number(""), None);
    }

    #[test]
    fn test_operator_aliases() {
        let op: Operator = serde_json::from_str(r#""is-empty""#).unwrap();
        assert_eq!(op, Operator::IsEmpty);
        let op: Operator = serde_json::from_str(r#""not_equals""#).unwrap();
        assert_eq!(op, Operator::NotEquals);
    }
}

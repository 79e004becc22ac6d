//! Variable interpolation for `{{name}}` tokens
//!
//! Substitution only: no expressions, no filters. Unknown names render as an
//! empty string so an authoring typo never breaks a live conversation.

use regex::{Captures, Regex};
use serde_json::Value as JsonValue;
use std::sync::OnceLock;

use crate::types::Variables;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([^{}\s]+)\s*\}\}").expect("token pattern is a valid regex")
    })
}

/// Render `template` against `scope`
pub fn render(template: &str, scope: &Variables) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }

    token_pattern()
        .replace_all(template, |caps: &Captures| {
            lookup(scope, &caps[1]).map(display_value).unwrap_or_default()
        })
        .into_owned()
}

/// Render a JSON document template without letting values change its shape.
///
/// Tokens inside a string literal are substituted JSON-escaped; bare tokens
/// become the value's JSON form (`null` when missing). A quote in a contact's
/// reply therefore stays inside its string.
pub fn render_json(template: &str, scope: &Variables) -> String {
    if !template.contains("{{") {
        return template.to_string();
    }

    let mut out = String::with_capacity(template.len());
    let mut in_string = false;
    let mut last = 0;
    for caps in token_pattern().captures_iter(template) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        let literal = &template[last..whole.start()];
        in_string = track_quotes(literal, in_string);
        out.push_str(literal);

        let value = lookup(scope, &caps[1]);
        if in_string {
            let quoted = JsonValue::String(value.map(display_value).unwrap_or_default()).to_string();
            out.push_str(&quoted[1..quoted.len() - 1]);
        } else {
            match value {
                Some(value) => out.push_str(&value.to_string()),
                None => out.push_str("null"),
            }
        }
        last = whole.end();
    }
    out.push_str(&template[last..]);
    out
}

/// Whether a JSON string literal is still open after `text`
fn track_quotes(text: &str, mut in_string: bool) -> bool {
    let mut escaped = false;
    for c in text.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            _ => {}
        }
    }
    in_string
}

/// Resolve a variable name, trying the flat key first and then walking a
/// dotted path (`contact.name`, `items.0.sku`) through JSON objects and arrays.
pub fn lookup<'a>(scope: &'a Variables, name: &str) -> Option<&'a JsonValue> {
    if let Some(value) = scope.get(name) {
        return Some(value);
    }

    let mut parts = name.split('.');
    let root = scope.get(parts.next()?)?;
    parts.try_fold(root, |value, part| match value {
        JsonValue::Object(map) => map.get(part),
        JsonValue::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Walk a dotted path inside an arbitrary JSON value
pub fn select_path<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |value, part| match value {
        JsonValue::Object(map) => map.get(part),
        JsonValue::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// String form of a scope value as shown to the contact
pub fn display_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// String form of a variable, empty when missing
pub fn variable_string(scope: &Variables, name: &str) -> String {
    lookup(scope, name).map(display_value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;
    use serde_json::json;

    #[test]
    fn test_render_known_and_unknown_tokens() {
        let scope: Variables = hashmap! {
            "nome".to_string() => json!("Ana"),
            "idade".to_string() => json!(31),
        };

        assert_eq!(render("Olá {{nome}}", &scope), "Olá Ana");
        assert_eq!(render("{{ nome }} tem {{idade}} anos", &scope), "Ana tem 31 anos");
        assert_eq!(render("Oi {{telefone}}!", &scope), "Oi !");
    }

    #[test]
    fn test_render_without_tokens_is_identity() {
        let scope = Variables::new();
        assert_eq!(render("plain text", &scope), "plain text");
        assert_eq!(render("{single} braces", &scope), "{single} braces");
        assert_eq!(render("{{ }} empty", &scope), "{{ }} empty");
    }

    #[test]
    fn test_dotted_paths() {
        let scope: Variables = hashmap! {
            "contact".to_string() => json!({"name": "Ana", "tags": ["vip", "new"]}),
            "order.id".to_string() => json!("flat-wins"),
            "order".to_string() => json!({"id": "nested"}),
        };

        assert_eq!(render("{{contact.name}}", &scope), "Ana");
        assert_eq!(render("{{contact.tags.1}}", &scope), "new");
        assert_eq!(render("{{order.id}}", &scope), "flat-wins");
        assert_eq!(render("{{contact.missing.deep}}", &scope), "");
    }

    #[test]
    fn test_render_json_keeps_document_shape() {
        let scope: Variables = hashmap! {
            "nome".to_string() => json!(r#"Ana", "admin": true, "x": ""#),
            "idade".to_string() => json!(31),
            "tags".to_string() => json!(["vip"]),
        };

        let rendered = render_json(
            r#"{"name": "{{nome}}", "age": {{idade}}, "tags": {{tags}}, "phone": {{telefone}}}"#,
            &scope,
        );
        let body: JsonValue = serde_json::from_str(&rendered).unwrap();
        assert_eq!(body["name"], json!(r#"Ana", "admin": true, "x": ""#));
        assert_eq!(body["age"], json!(31));
        assert_eq!(body["tags"], json!(["vip"]));
        assert_eq!(body["phone"], JsonValue::Null);
        assert!(body.get("admin").is_none());
    }

    #[test]
    fn test_render_json_respects_escaped_quotes() {
        let scope: Variables = hashmap! { "x".to_string() => json!("a\"b") };
        let rendered = render_json(r#"{"k": "say \"{{x}}\""}"#, &scope);
        let body: JsonValue = serde_json::from_str(&rendered).unwrap();
        assert_eq!(body["k"], json!("say \"a\"b\""));
    }

    #[test]
    fn test_display_values() {
        assert_eq!(display_value(&json!(null)), "");
        assert_eq!(display_value(&json!(true)), "true");
        assert_eq!(display_value(&json!(2.5)), "2.5");
        assert_eq!(display_value(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn test_select_path() {
        let value = json!({"data": {"items": [{"sku": "A1"}]}});
        assert_eq!(select_path(&value, "data.items.0.sku"), Some(&json!("A1")));
        assert_eq!(select_path(&value, ""), Some(&value));
        assert_eq!(select_path(&value, "data.nope"), None);
    }
}

//! Reply validation for input and channel nodes

use chrono::NaiveDate;
use regex::Regex;
use serde_json::{Number, Value as JsonValue};
use std::sync::OnceLock;

use crate::evaluate::parse_number;
use crate::flow::{Choice, NodeKind, DEFAULT_BRANCH};
use crate::interpolate::display_value;

/// How a node judged the contact's reply
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Accepted {
        variable: String,
        value: JsonValue,
        /// Edge to follow; `None` for single-output inputs
        branch: Option<String>,
    },
    /// Stay on the node and ask again
    Rejected { retry_message: Option<String> },
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is a valid regex")
    })
}

/// Text the contact sent. Selections may arrive as `{"id": ..}` objects.
pub fn reply_text(payload: &JsonValue) -> String {
    let text = match payload {
        JsonValue::Object(map) => ["id", "value", "text", "title"]
            .iter()
            .find_map(|key| map.get(*key))
            .map(display_value)
            .unwrap_or_default(),
        other => display_value(other),
    };
    text.trim().to_string()
}

fn number_value(n: f64) -> JsonValue {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        JsonValue::from(n as i64)
    } else {
        Number::from_f64(n).map(JsonValue::Number).unwrap_or(JsonValue::Null)
    }
}

/// Keep digits and a leading `+`; 7 to 15 digits per E.164
pub fn normalize_phone(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let plus = trimmed.starts_with('+');
    if trimmed
        .chars()
        .any(|c| !(c.is_ascii_digit() || " -().+".contains(c)))
    {
        return None;
    }
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if !(7..=15).contains(&digits.len()) {
        return None;
    }
    Some(if plus { format!("+{}", digits) } else { digits })
}

/// Accepts `YYYY-MM-DD` and `DD/MM/YYYY`, normalized to `YYYY-MM-DD`
pub fn normalize_date(text: &str) -> Option<String> {
    let trimmed = text.trim();
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(trimmed, "%d/%m/%Y"))
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

/// Match a reply against choices by id, label, value, or 1-based position
pub fn match_choice<'a>(choices: impl IntoIterator<Item = &'a Choice>, text: &str) -> Option<&'a Choice> {
    let choices: Vec<&Choice> = choices.into_iter().collect();
    let needle = text.trim().to_lowercase();

    choices
        .iter()
        .find(|c| c.id == text.trim())
        .or_else(|| {
            choices.iter().find(|c| {
                c.label.trim().to_lowercase() == needle
                    || c.value.as_deref().map(|v| v.trim().to_lowercase()) == Some(needle.clone())
            })
        })
        .or_else(|| {
            needle
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|idx| choices.get(idx))
        })
        .copied()
}

fn choice_reply<'a>(
    variable: &str,
    choices: impl IntoIterator<Item = &'a Choice>,
    text: &str,
) -> Reply {
    match match_choice(choices, text) {
        Some(choice) => Reply::Accepted {
            variable: variable.to_string(),
            value: JsonValue::String(choice.stored_value().to_string()),
            branch: Some(choice.id.clone()),
        },
        None => Reply::Accepted {
            variable: variable.to_string(),
            value: JsonValue::String(text.to_string()),
            branch: Some(DEFAULT_BRANCH.to_string()),
        },
    }
}

/// Judge `payload` as a reply to `kind`. `None` if the node takes no input.
pub fn accept(kind: &NodeKind, payload: &JsonValue) -> Option<Reply> {
    let text = reply_text(payload);

    let accepted = |variable: &str, value: JsonValue| Reply::Accepted {
        variable: variable.to_string(),
        value,
        branch: None,
    };
    let rejected = |retry: &Option<String>| Reply::Rejected {
        retry_message: retry.clone(),
    };

    let reply = match kind {
        NodeKind::InputText(cfg) => {
            if text.is_empty() {
                rejected(&cfg.retry_message)
            } else {
                accepted(&cfg.variable, JsonValue::String(text))
            }
        }
        NodeKind::InputNumber(cfg) => match parse_number(&text) {
            Some(n)
                if cfg.min.map_or(true, |min| n >= min) && cfg.max.map_or(true, |max| n <= max) =>
            {
                accepted(&cfg.input.variable, number_value(n))
            }
            _ => rejected(&cfg.input.retry_message),
        },
        NodeKind::InputEmail(cfg) => {
            if email_pattern().is_match(&text) {
                accepted(&cfg.variable, JsonValue::String(text))
            } else {
                rejected(&cfg.retry_message)
            }
        }
        NodeKind::InputPhone(cfg) => match normalize_phone(&text) {
            Some(phone) => accepted(&cfg.variable, JsonValue::String(phone)),
            None => rejected(&cfg.retry_message),
        },
        NodeKind::InputDate(cfg) => match normalize_date(&text) {
            Some(date) => accepted(&cfg.variable, JsonValue::String(date)),
            None => rejected(&cfg.retry_message),
        },
        NodeKind::InputRating(cfg) => match text.parse::<u8>() {
            Ok(n) if (1..=cfg.max).contains(&n) => accepted(&cfg.input.variable, JsonValue::from(n)),
            _ => rejected(&cfg.input.retry_message),
        },
        NodeKind::InputFileUpload(cfg) => match payload {
            JsonValue::Object(map) if map.contains_key("url") => {
                accepted(&cfg.variable, payload.clone())
            }
            _ if text.starts_with("http://") || text.starts_with("https://") => {
                accepted(&cfg.variable, JsonValue::String(text))
            }
            _ => rejected(&cfg.retry_message),
        },
        NodeKind::InputButtons(cfg) => choice_reply(&cfg.input.variable, &cfg.choices, &text),
        NodeKind::WhatsappButtons(cfg) => choice_reply(&cfg.variable, &cfg.buttons, &text),
        NodeKind::WhatsappList(cfg) => choice_reply(&cfg.variable, cfg.rows(), &text),
        _ => return None,
    };
    Some(reply)
}

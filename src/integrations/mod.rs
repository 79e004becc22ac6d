//! External Call Adapter
//!
//! Integration nodes are turned into a fully rendered [`CallRequest`] before
//! anything leaves the process. The request is what gets retried, logged with
//! its step token, and handed to an [`ExternalCallAdapter`].
//!
//! - `http.rs` - reqwest-backed adapter used in production
//! - `retry.rs` - per-attempt timeout and exponential backoff
//! - `token.rs` - step and trigger tokens

pub mod http;
pub mod retry;
pub mod token;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::fmt;

use crate::config::IntegrationsConfig;
use crate::flow::{CallLimits, NodeKind, ResultBinding, SheetsAction};
use crate::interpolate::{render, render_json, select_path};
use crate::types::Variables;

pub use http::HttpAdapter;
pub use retry::{invoke_with_retry, RetryPolicy};
pub use token::{step_token, trigger_token};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    Webhook,
    Sheets,
    Email,
    #[serde(rename = "openai")]
    OpenAi,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallKind::Webhook => "webhook",
            CallKind::Sheets => "sheets",
            CallKind::Email => "email",
            CallKind::OpenAi => "openai",
        };
        f.write_str(s)
    }
}

/// One rendered outbound call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub kind: CallKind,
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    /// Network failure or timeout; worth another attempt
    #[error("transient failure: {0}")]
    Transient(String),

    /// The remote side answered with an error; retrying will not help
    #[error("call rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The node cannot be turned into a request
    #[error("invalid integration config: {0}")]
    InvalidConfig(String),
}

impl CallError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CallError::Transient(_))
    }
}

/// Transport for rendered calls. Implementations perform exactly one attempt;
/// retry and timeout live in [`invoke_with_retry`].
#[async_trait]
pub trait ExternalCallAdapter: Send + Sync {
    async fn invoke(&self, request: &CallRequest) -> Result<JsonValue, CallError>;
}

/// Render an integration node against the scope.
///
/// Returns `None` for nodes that are not integrations.
pub fn prepare(
    kind: &NodeKind,
    scope: &Variables,
    settings: &IntegrationsConfig,
) -> Option<Result<CallRequest, CallError>> {
    let request = match kind {
        NodeKind::Webhook(cfg) => {
            // JSON bodies are rendered escape-aware; anything else goes out as text
            let body = cfg.body.as_ref().map(|template| {
                serde_json::from_str(&render_json(template, scope))
                    .unwrap_or_else(|_| JsonValue::String(render(template, scope)))
            });
            Ok(CallRequest {
                kind: CallKind::Webhook,
                method: cfg.method.to_uppercase(),
                url: render(&cfg.url, scope),
                headers: cfg
                    .headers
                    .iter()
                    .map(|(k, v)| (k.clone(), render(v, scope)))
                    .collect(),
                body,
            })
        }

        NodeKind::Sheets(cfg) => settings
            .sheets_api_url
            .as_deref()
            .ok_or_else(|| CallError::InvalidConfig("sheets_api_url is not configured".into()))
            .map(|base| {
                let base = base.trim_end_matches('/');
                let range = render(&cfg.range, scope);
                let values: Vec<String> = cfg.values.iter().map(|v| render(v, scope)).collect();
                let path = format!("{}/spreadsheets/{}/values/{}", base, cfg.spreadsheet_id, range);
                let (method, url, body) = match cfg.action {
                    SheetsAction::Read => ("GET", path, None),
                    SheetsAction::Append => (
                        "POST",
                        format!("{}:append", path),
                        Some(json!({ "values": [values] })),
                    ),
                    SheetsAction::Update => ("PUT", path, Some(json!({ "values": [values] }))),
                };
                CallRequest {
                    kind: CallKind::Sheets,
                    method: method.to_string(),
                    url,
                    headers: HashMap::new(),
                    body,
                }
            }),

        NodeKind::Email(cfg) => settings
            .email_relay_url
            .as_deref()
            .ok_or_else(|| CallError::InvalidConfig("email_relay_url is not configured".into()))
            .map(|url| CallRequest {
                kind: CallKind::Email,
                method: "POST".to_string(),
                url: url.to_string(),
                headers: HashMap::new(),
                body: Some(json!({
                    "to": render(&cfg.to, scope),
                    "cc": cfg.cc.iter().map(|c| render(c, scope)).collect::<Vec<_>>(),
                    "subject": render(&cfg.subject, scope),
                    "body": render(&cfg.body, scope),
                })),
            }),

        NodeKind::OpenAi(cfg) => {
            let mut messages = Vec::new();
            if let Some(system) = &cfg.system {
                messages.push(json!({ "role": "system", "content": render(system, scope) }));
            }
            messages.push(json!({ "role": "user", "content": render(&cfg.prompt, scope) }));

            let mut body = json!({ "model": cfg.model, "messages": messages });
            if let Some(temperature) = cfg.temperature {
                body["temperature"] = json!(temperature);
            }

            let mut headers = HashMap::new();
            if let Some(key) = &settings.openai_api_key {
                headers.insert("Authorization".to_string(), format!("Bearer {}", key));
            }

            Ok(CallRequest {
                kind: CallKind::OpenAi,
                method: "POST".to_string(),
                url: format!(
                    "{}/chat/completions",
                    settings.openai_base_url.trim_end_matches('/')
                ),
                headers,
                body: Some(body),
            })
        }

        _ => return None,
    };
    Some(request)
}

/// Where the result lands for an integration node
pub fn binding(kind: &NodeKind) -> Option<&ResultBinding> {
    match kind {
        NodeKind::Webhook(cfg) => Some(&cfg.binding),
        NodeKind::Sheets(cfg) => Some(&cfg.binding),
        NodeKind::Email(cfg) => Some(&cfg.binding),
        NodeKind::OpenAi(cfg) => Some(&cfg.binding),
        _ => None,
    }
}

/// Per-node timeout and retry overrides of an integration node
pub fn limits(kind: &NodeKind) -> Option<&CallLimits> {
    match kind {
        NodeKind::Webhook(cfg) => Some(&cfg.limits),
        NodeKind::Sheets(cfg) => Some(&cfg.limits),
        NodeKind::Email(cfg) => Some(&cfg.limits),
        NodeKind::OpenAi(cfg) => Some(&cfg.limits),
        _ => None,
    }
}

/// Shape a 2xx response into the value bound to the scope.
///
/// Chat completions reduce to the assistant's text; everything else becomes
/// `{"status": .., "body": ..}` with the body parsed as JSON when possible.
pub fn shape_response(kind: CallKind, status: u16, body: &str) -> JsonValue {
    let parsed: JsonValue =
        serde_json::from_str(body).unwrap_or_else(|_| JsonValue::String(body.to_string()));

    match kind {
        CallKind::OpenAi => select_path(&parsed, "choices.0.message.content")
            .cloned()
            .unwrap_or(parsed),
        _ => json!({ "status": status, "body": parsed }),
    }
}

/// Write a call result into the scope per the node's binding
pub fn bind_result(binding: &ResultBinding, result: &JsonValue, scope: &mut Variables) {
    if let Some(variable) = &binding.result_variable {
        scope.insert(variable.clone(), result.clone());
    }
    for mapping in &binding.mappings {
        let value = select_path(result, &mapping.path)
            .cloned()
            .unwrap_or(JsonValue::Null);
        scope.insert(mapping.variable.clone(), value);
    }
}

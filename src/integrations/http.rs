use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::Value as JsonValue;

use super::{shape_response, CallError, CallRequest, ExternalCallAdapter};

/// Adapter that sends rendered calls over HTTP
#[derive(Debug, Clone, Default)]
pub struct HttpAdapter {
    client: Client,
}

impl HttpAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn parse_method(method: &str) -> Result<Method, CallError> {
    match method.to_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "PATCH" => Ok(Method::PATCH),
        "DELETE" => Ok(Method::DELETE),
        other => Err(CallError::InvalidConfig(format!(
            "unsupported HTTP method: {}",
            other
        ))),
    }
}

#[async_trait]
impl ExternalCallAdapter for HttpAdapter {
    async fn invoke(&self, request: &CallRequest) -> Result<JsonValue, CallError> {
        let method = parse_method(&request.method)?;
        let mut builder = self.client.request(method, &request.url);

        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_builder() {
                CallError::InvalidConfig(e.to_string())
            } else {
                CallError::Transient(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CallError::Transient(e.to_string()))?;

        if !status.is_success() {
            return Err(CallError::Rejected {
                status: status.as_u16(),
                message: body.chars().take(500).collect(),
            });
        }

        Ok(shape_response(request.kind, status.as_u16(), &body))
    }
}

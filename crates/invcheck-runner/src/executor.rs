//! Request Executor: one HTTP operation, measured and recorded

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use invcheck_core::{
    ConfigurationError, Context, Execution, HttpMethod, RequestTemplate, TemplateError,
    TestSpecification,
};
use serde_json::Value;

use crate::transport::{HttpRequest, Transport};

/// A request with every `${...}` reference substituted.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRequest {
    pub method: HttpMethod,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Value>,
}

impl ResolvedRequest {
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// Same request with a different body.
    #[must_use]
    pub fn with_body(&self, body: Value) -> Self {
        Self {
            body: Some(body),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_header(&self, name: &str, value: &str) -> Self {
        let mut next = self.clone();
        next.headers.insert(name.to_string(), value.to_string());
        next
    }
}

/// Sends requests against the target's base URL with the default headers.
#[derive(Clone)]
pub struct Executor {
    transport: Arc<dyn Transport>,
    base_url: String,
    default_headers: BTreeMap<String, String>,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("base_url", &self.base_url)
            .field("default_headers", &self.default_headers)
            .finish_non_exhaustive()
    }
}

impl Executor {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>, spec: &TestSpecification) -> Self {
        Self {
            transport,
            base_url: spec.base_url.trim_end_matches('/').to_string(),
            default_headers: spec.headers.clone(),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve path, body and header templates against captured values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::UnresolvedReference`] naming the step.
    pub fn resolve(
        &self,
        step_id: &str,
        template: &RequestTemplate,
        context: &Context,
    ) -> Result<ResolvedRequest, ConfigurationError> {
        let unresolved = |e: TemplateError| ConfigurationError::UnresolvedReference {
            step: step_id.to_string(),
            reference: e.reference,
            reason: e.reason,
        };

        let path = context.resolve_str(&template.path).map_err(unresolved)?;
        let body = template
            .body
            .as_ref()
            .map(|b| context.resolve_value(b))
            .transpose()
            .map_err(unresolved)?;
        let mut headers = self.default_headers.clone();
        for (name, value) in &template.headers {
            headers.insert(name.clone(), context.resolve_str(value).map_err(unresolved)?);
        }

        Ok(ResolvedRequest {
            method: template.method,
            path,
            headers,
            body,
        })
    }

    /// Send one request. Transport failures are recorded, never returned.
    #[must_use]
    pub fn execute(&self, request: &ResolvedRequest) -> Execution {
        let url = format!("{}{}", self.base_url, request.path);
        let body = request.body.clone().filter(|_| request.method.has_body());
        let http = HttpRequest {
            method: request.method,
            url: url.clone(),
            headers: request.headers.clone(),
            body: body.clone(),
        };

        let start = Instant::now();
        let result = self.transport.send(&http);
        let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

        let mut execution = Execution {
            method: request.method,
            url,
            request_headers: request.headers.clone(),
            request_body: body,
            status: None,
            body: None,
            latency_ms,
            transport_error: None,
        };
        match result {
            Ok(resp) => {
                tracing::debug!(
                    method = %request.method,
                    path = %request.path,
                    status = resp.status,
                    latency_ms,
                    "request completed"
                );
                execution.status = Some(resp.status);
                execution.body = decode_body(&resp.body);
            }
            Err(e) => {
                tracing::warn!(
                    method = %request.method,
                    path = %request.path,
                    error = %e,
                    "transport error"
                );
                execution.transport_error = Some(e.to_string());
            }
        }
        execution
    }
}

/// JSON when it parses, otherwise the raw text. Empty bodies are `None`.
fn decode_body(text: &str) -> Option<Value> {
    if text.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
}

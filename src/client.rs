//! HTTP request execution.
//!
//! `execute` never fails: every transport error, bad status, and response
//! mismatch is materialized into the returned [`Outcome`]. Clients are built
//! once per proxy URL and reused across attempts and rows. Retries use
//! exponential backoff with jitter, capped at 30 seconds, and every wait is
//! cancellable.

use std::{
    collections::HashMap,
    fmt,
    sync::Mutex,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use rand::Rng;

use crate::{cancel::CancelToken, request::Method, request::RequestSpec, template::RenderedRequest};

pub const DEFAULT_MAX_RETRIES: u32 = 3;

const MAX_BACKOFF: Duration = Duration::from_secs(30);
const PREVIEW_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Timeout,
    ConnectionRefused,
    DnsError,
    Canceled,
    Unknown,
    ValidationError,
    TemplateError,
    Http5xx,
    Http429,
    Http4xx,
    ResponseMismatch,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::ConnectionRefused => "connection_refused",
            ErrorCategory::DnsError => "dns_error",
            ErrorCategory::Canceled => "canceled",
            ErrorCategory::Unknown => "unknown",
            ErrorCategory::ValidationError => "validation_error",
            ErrorCategory::TemplateError => "template_error",
            ErrorCategory::Http5xx => "http_5xx",
            ErrorCategory::Http429 => "http_429",
            ErrorCategory::Http4xx => "http_4xx",
            ErrorCategory::ResponseMismatch => "response_mismatch",
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCategory::Timeout
                | ErrorCategory::ConnectionRefused
                | ErrorCategory::DnsError
                | ErrorCategory::Unknown
                | ErrorCategory::Http5xx
                | ErrorCategory::Http429
        )
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal record for one row's HTTP attempt sequence.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub request_id: String,
    pub fingerprint: String,
    pub status_code: u16,
    pub success: bool,
    pub latency_ms: u64,
    pub retries: u32,
    pub error_category: Option<ErrorCategory>,
    pub error_detail: Option<String>,
    pub response_preview: String,
    pub headers: HashMap<String, String>,
}

impl Outcome {
    fn new(request_id: &str, fingerprint: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            fingerprint: fingerprint.to_string(),
            status_code: 0,
            success: false,
            latency_ms: 0,
            retries: 0,
            error_category: None,
            error_detail: None,
            response_preview: String::new(),
            headers: HashMap::new(),
        }
    }

    /// Synthetic outcome for a row whose templates failed to render.
    pub fn template_failure(request_id: &str, fingerprint: &str, detail: String) -> Self {
        let mut outcome = Self::new(request_id, fingerprint);
        outcome.error_category = Some(ErrorCategory::TemplateError);
        outcome.error_detail = Some(detail);
        outcome
    }

    /// Synthetic outcome for a row cancelled before its request was admitted.
    pub fn canceled(request_id: &str, fingerprint: &str) -> Self {
        let mut outcome = Self::new(request_id, fingerprint);
        outcome.error_category = Some(ErrorCategory::Canceled);
        outcome.error_detail = Some("run canceled".to_string());
        outcome
    }
}

struct AttemptResponse {
    status: u16,
    body: String,
    headers: HashMap<String, String>,
}

enum AttemptError {
    Canceled,
    Transport(reqwest::Error),
}

pub struct HttpExecutor {
    spec: std::sync::Arc<RequestSpec>,
    timeout: Duration,
    max_retries: u32,
    clients: Mutex<HashMap<String, reqwest::Client>>,
}

impl HttpExecutor {
    pub fn new(spec: std::sync::Arc<RequestSpec>, timeout: Duration, max_retries: u32) -> Self {
        Self {
            spec,
            timeout,
            max_retries,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub async fn execute(
        &self,
        cancel: &CancelToken,
        rendered: &RenderedRequest,
        request_id: &str,
    ) -> Outcome {
        let started = Instant::now();
        let mut outcome = Outcome::new(request_id, &rendered.fingerprint);

        let client = match self.client_for(rendered.proxy.as_deref()) {
            Ok(client) => client,
            Err(err) => {
                outcome.error_category = Some(ErrorCategory::Unknown);
                outcome.error_detail = Some(format!("{err:#}"));
                outcome.latency_ms = started.elapsed().as_millis() as u64;
                return outcome;
            }
        };

        for attempt in 0..=self.max_retries {
            outcome.retries = attempt;
            if cancel.is_cancelled() {
                outcome.error_category = Some(ErrorCategory::Canceled);
                outcome.error_detail = Some("run canceled".to_string());
                break;
            }

            let category = match self.attempt(&client, rendered, cancel).await {
                Ok(response) => {
                    outcome.status_code = response.status;
                    outcome.headers = response.headers;
                    outcome.response_preview = truncate_preview(&response.body);
                    if self.spec.success.is_success_status(response.status) {
                        if self.spec.success.response_keys.is_empty()
                            || response_keys_match(&self.spec.success.response_keys, &response.body)
                        {
                            outcome.success = true;
                            outcome.error_category = None;
                            outcome.error_detail = None;
                        } else {
                            outcome.error_category = Some(ErrorCategory::ResponseMismatch);
                            outcome.error_detail =
                                Some("response body does not match expected keys".to_string());
                        }
                        break;
                    }
                    let category = categorize_status(response.status);
                    outcome.error_category = Some(category);
                    outcome.error_detail = Some(format!("unexpected status {}", response.status));
                    category
                }
                Err(AttemptError::Canceled) => {
                    outcome.status_code = 0;
                    outcome.error_category = Some(ErrorCategory::Canceled);
                    outcome.error_detail = Some("request canceled".to_string());
                    break;
                }
                Err(AttemptError::Transport(err)) => {
                    outcome.status_code = 0;
                    let detail = error_chain_text(&err);
                    let category = categorize_transport(&detail);
                    outcome.error_category = Some(category);
                    outcome.error_detail = Some(detail);
                    category
                }
            };

            if !category.is_retryable() || attempt == self.max_retries {
                break;
            }
            let delay = backoff_delay(attempt);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        outcome.latency_ms = started.elapsed().as_millis() as u64;
        outcome
    }

    async fn attempt(
        &self,
        client: &reqwest::Client,
        rendered: &RenderedRequest,
        cancel: &CancelToken,
    ) -> Result<AttemptResponse, AttemptError> {
        let mut builder = client
            .request(to_reqwest_method(rendered.method), &rendered.url)
            .timeout(self.timeout)
            .body(rendered.body.clone());
        let mut has_user_agent = false;
        let mut has_accept_encoding = false;
        for (name, value) in &rendered.headers {
            if name.eq_ignore_ascii_case("user-agent") {
                has_user_agent = true;
            }
            if name.eq_ignore_ascii_case("accept-encoding") {
                has_accept_encoding = true;
            }
            builder = builder.header(name, value);
        }
        if !has_user_agent {
            builder = builder.header(reqwest::header::USER_AGENT, "csvfire/1.0");
        }
        if !has_accept_encoding {
            builder = builder.header(reqwest::header::ACCEPT_ENCODING, "gzip, deflate");
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(AttemptError::Canceled),
            response = builder.send() => response.map_err(AttemptError::Transport)?,
        };

        let status = response.status().as_u16();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            headers
                .entry(name.to_string())
                .or_insert_with(|| value.to_str().unwrap_or_default().to_string());
        }
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(AttemptError::Canceled),
            body = response.text() => body.map_err(AttemptError::Transport)?,
        };
        Ok(AttemptResponse {
            status,
            body,
            headers,
        })
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<reqwest::Client> {
        let key = proxy.unwrap_or_default();
        let mut clients = self.clients.lock().unwrap_or_else(|err| err.into_inner());
        if let Some(client) = clients.get(key) {
            return Ok(client.clone());
        }
        let mut builder = reqwest::Client::builder();
        if !key.is_empty() {
            builder = builder
                .proxy(reqwest::Proxy::all(key).with_context(|| format!("invalid proxy '{key}'"))?);
        }
        let client = builder.build().context("building HTTP client")?;
        clients.insert(key.to_string(), client.clone());
        Ok(client)
    }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Delete => reqwest::Method::DELETE,
        Method::Patch => reqwest::Method::PATCH,
    }
}

fn categorize_status(status: u16) -> ErrorCategory {
    if status >= 500 {
        ErrorCategory::Http5xx
    } else if status == 429 {
        ErrorCategory::Http429
    } else {
        ErrorCategory::Http4xx
    }
}

fn categorize_transport(detail: &str) -> ErrorCategory {
    let lowered = detail.to_ascii_lowercase();
    if lowered.contains("timed out") || lowered.contains("timeout") {
        ErrorCategory::Timeout
    } else if lowered.contains("connection refused") {
        ErrorCategory::ConnectionRefused
    } else if lowered.contains("no such host")
        || lowered.contains("dns")
        || lowered.contains("failed to lookup")
    {
        ErrorCategory::DnsError
    } else {
        ErrorCategory::Unknown
    }
}

fn error_chain_text(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = 2u64.saturating_pow(attempt).min(30) as f64;
    let jitter = rand::thread_rng().gen_range(0.75..=1.25);
    Duration::from_secs_f64((base * jitter).min(MAX_BACKOFF.as_secs_f64()))
}

fn truncate_preview(body: &str) -> String {
    if body.len() <= PREVIEW_LIMIT {
        return body.to_string();
    }
    let mut end = PREVIEW_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

fn response_keys_match(
    expected: &std::collections::BTreeMap<String, String>,
    body: &str,
) -> bool {
    let Ok(serde_json::Value::Object(object)) = serde_json::from_str(body) else {
        return false;
    };
    expected.iter().all(|(key, want)| {
        object
            .get(key)
            .is_some_and(|actual| stringify_json(actual) == *want)
    })
}

fn stringify_json(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

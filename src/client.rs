//! HTTP request execution against the system under test.
//!
//! Transport failures (connect errors, timeouts) are the only failures the
//! retry wrapper reacts to. A response with status >= 400 is logged and
//! returned as a normal value: retrying an application-level rejection would
//! mask real API errors and amplify load during an outage, so the caller
//! decides whether to branch away from its dependent chain.

use anyhow::{Context, Result};
use reqwest::{header::HeaderMap, Client, Method, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::error;

use crate::metrics::MetricsCollector;
use crate::retry::{RetryExhausted, RetryPolicy};
use crate::session::RequestContext;

/// A completed HTTP exchange: status, headers and raw body, regardless of
/// whether the API accepted the request.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

#[derive(Debug, Error)]
pub enum ResponseError {
    #[error("response body is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("response envelope has no `data` field")]
    MissingData,
    #[error("created entity has no `id` field")]
    MissingId,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Id of the created entity, from the `{"data": {"id": ...}}` envelope
    /// every successful create returns.
    pub fn data_id(&self) -> Result<String, ResponseError> {
        let value: Value = serde_json::from_str(&self.body)?;
        let data = value.get("data").ok_or(ResponseError::MissingData)?;
        match data.get("id") {
            Some(Value::String(id)) => Ok(id.clone()),
            Some(Value::Number(id)) => Ok(id.to_string()),
            _ => Err(ResponseError::MissingId),
        }
    }

    /// Raw `Set-Cookie` header value, if the response carried one.
    pub fn set_cookie(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::SET_COOKIE)?
            .to_str()
            .ok()
    }
}

/// Issues single HTTP calls against the API under test, routing each one
/// through the retry policy and recording it in the shared metrics.
pub struct ApiClient {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
    metrics: Arc<MetricsCollector>,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
            metrics,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get(
        &self,
        path: &str,
        ctx: &RequestContext,
    ) -> Result<ApiResponse, RetryExhausted> {
        self.execute(Method::GET, path, None, ctx).await
    }

    pub async fn post(
        &self,
        path: &str,
        body: Value,
        ctx: &RequestContext,
    ) -> Result<ApiResponse, RetryExhausted> {
        self.execute(Method::POST, path, Some(body), ctx).await
    }

    pub async fn put(
        &self,
        path: &str,
        body: Value,
        ctx: &RequestContext,
    ) -> Result<ApiResponse, RetryExhausted> {
        self.execute(Method::PUT, path, Some(body), ctx).await
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        ctx: &RequestContext,
    ) -> Result<ApiResponse, RetryExhausted> {
        let url = format!("{}{}", self.base_url, path);
        self.retry
            .run(|| self.attempt(method.clone(), url.clone(), body.clone(), ctx))
            .await
    }

    async fn attempt(
        &self,
        method: Method,
        url: String,
        body: Option<Value>,
        ctx: &RequestContext,
    ) -> Result<ApiResponse> {
        let mut request = self.http.request(method.clone(), url.clone());
        for (name, value) in ctx.header_pairs() {
            request = request.header(name, value);
        }
        if let Some(body) = &body {
            request = request.json(body);
        }

        let started = Instant::now();
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                self.metrics.record_transport_failure();
                return Err(err).context(format!("{method} {url} transport failure"));
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => {
                self.metrics.record_transport_failure();
                return Err(err).context(format!("{method} {url} failed reading response body"));
            }
        };
        self.metrics.record_request(status.as_u16(), started.elapsed());

        if status.as_u16() >= 400 {
            error!(
                method = %method,
                url = %url,
                status = status.as_u16(),
                body = %body,
                "request rejected"
            );
        }

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}

//! Session authentication for synthetic users.
//!
//! Authentication is fail-soft: a missing or malformed session cookie is
//! logged and degraded to an empty token instead of aborting the iteration.
//! Requests made with an empty token are rejected by the API (status >= 400)
//! and the failure surfaces at the first authenticated call.

use serde_json::json;
use std::sync::Arc;
use tracing::error;

use crate::client::ApiClient;
use crate::retry::RetryExhausted;
use crate::users::TestUser;

pub const SESSION_COOKIE_NAME: &str = "storeit_session";
pub const ORGANIZATION_HEADER: &str = "x-organization-id";

/// Opaque credential extracted from the authentication response. Empty means
/// unauthenticated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn empty() -> Self {
        Self(String::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Headers derived from a session; immutable once built.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub session_cookie: Option<String>,
    pub organization_id: Option<String>,
}

impl RequestContext {
    /// Header name/value pairs for one request, in a fixed order.
    pub fn header_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("content-type", String::from("application/json"))];
        if let Some(cookie) = &self.session_cookie {
            pairs.push(("cookie", cookie.clone()));
        }
        if let Some(org) = &self.organization_id {
            pairs.push((ORGANIZATION_HEADER, org.clone()));
        }
        pairs
    }
}

/// Cookie and org-scoping headers for an authenticated request. The org
/// header is present exactly when an organization id is supplied.
pub fn auth_headers(token: &SessionToken, organization_id: Option<&str>) -> RequestContext {
    RequestContext {
        session_cookie: Some(format!("{SESSION_COOKIE_NAME}={}", token.as_str())),
        organization_id: organization_id.map(str::to_owned),
    }
}

/// Locate the session cookie in a raw `Set-Cookie` value and capture its
/// value up to the next `;` or end of string. Empty values count as absent.
pub fn extract_session_cookie(raw: &str) -> Option<&str> {
    let key = format!("{SESSION_COOKIE_NAME}=");
    let key_start = raw.find(&key)?;
    let rest = &raw[key_start + key.len()..];
    let end = rest.find(';').unwrap_or(rest.len());
    let token = &rest[..end];
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

pub struct SessionManager {
    client: Arc<ApiClient>,
}

impl SessionManager {
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self { client }
    }

    /// Authenticate one synthetic user and extract the session token.
    ///
    /// Only retry exhaustion on the request itself is an error; a response
    /// without a usable cookie yields an empty token.
    pub async fn authenticate(&self, user: &TestUser) -> Result<SessionToken, RetryExhausted> {
        let payload = json!({
            "email": user.email,
            "firstName": user.first_name,
            "lastName": user.last_name,
        });
        let response = self
            .client
            .post("/auth/test", payload, &RequestContext::default())
            .await?;

        if response.status.as_u16() >= 400 {
            error!(
                status = response.status.as_u16(),
                body = %response.body,
                "authentication failed"
            );
        }

        let Some(raw) = response.set_cookie() else {
            error!("no cookies received from authentication");
            return Ok(SessionToken::empty());
        };

        match extract_session_cookie(raw) {
            Some(token) => Ok(SessionToken::new(token)),
            None => {
                error!("session cookie not found in response");
                Ok(SessionToken::empty())
            }
        }
    }
}

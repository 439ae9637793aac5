//! Session authentication flow
//!
//! Runs the sitemap's login step once per session and turns a successful
//! response into a [`CredentialContext`] that the session attaches to every
//! later request.
//!
//! Credential extraction is configuration-free and therefore heuristic: a
//! JSON field named `auth_token`, `token`, or `access_token` becomes a bearer
//! Authorization header; failing that, the first Set-Cookie value is carried
//! as a Cookie header; failing that, basic/bearer auth keeps carrying its
//! static credential header.

use crate::dispatch::{Dispatcher, Outcome, RequestBody, SimRequest};
use crate::error::AuthError;
use crate::sitemap::{AuthConfig, AuthType};
use crate::dispatch::Target;
use crate::vars::{encode_value, VariableResolver};
use std::time::Duration;

/// Deadline for the login round-trip
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Statuses accepted as a successful login
const SUCCESS_STATUSES: &[u16] = &[200, 201, 204];

/// Per-session header material produced by a successful login
///
/// Owned by exactly one session and dropped with it; never shared.
#[derive(Debug, Clone, Default)]
pub struct CredentialContext {
    headers: Vec<(String, String)>,
}

impl CredentialContext {
    /// A successful login that yielded nothing to carry
    pub fn empty() -> Self {
        Self::default()
    }

    /// Carry a bearer token as an Authorization header
    pub fn bearer(token: &str) -> Self {
        Self::header("Authorization", &format!("Bearer {token}"))
    }

    /// Carry a single arbitrary header
    pub fn header(name: &str, value: &str) -> Self {
        Self {
            headers: vec![(name.to_string(), value.to_string())],
        }
    }

    /// Headers to merge into every subsequent request of the session
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Whether the login produced any attachable material
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}

/// Executes the sitemap's login step for one session
#[derive(Debug, Clone)]
pub struct AuthFlowExecutor {
    config: AuthConfig,
    target: Target,
    resolver: VariableResolver,
}

impl AuthFlowExecutor {
    /// Build an executor for the given auth config
    pub fn new(config: AuthConfig, target: Target, resolver: VariableResolver) -> Self {
        Self {
            config,
            target,
            resolver,
        }
    }

    /// Run the login request and produce a credential context
    ///
    /// `base_headers` are the session's ambient headers (global headers and
    /// the forwarded-for header); credentials are layered on top.
    pub async fn authenticate(
        &self,
        dispatcher: &dyn Dispatcher,
        base_headers: &[(String, String)],
    ) -> Result<CredentialContext, AuthError> {
        let request = self.build_login_request(base_headers)?;
        tracing::debug!(
            auth_type = self.config.auth_type.name(),
            url = %request.url,
            "attempting authentication"
        );

        let outcome = dispatcher.dispatch(request).await;

        if let Some(error) = outcome.error {
            return Err(AuthError::Network(error));
        }
        let status = outcome.status.unwrap_or(0);
        if !SUCCESS_STATUSES.contains(&status) {
            tracing::warn!(status, "authentication rejected");
            return Err(AuthError::Rejected { status });
        }

        let context = self.extract_context(&outcome);
        if context.is_empty() {
            tracing::debug!(status, "login succeeded but carried no token or cookie");
        }
        Ok(context)
    }

    fn build_login_request(
        &self,
        base_headers: &[(String, String)],
    ) -> Result<SimRequest, AuthError> {
        let auth_type = self.config.auth_type;
        let path = self.resolver.resolve(&self.config.path);
        let mut url = self.target.url_for(&path);
        let mut headers = base_headers.to_vec();
        let mut body = None;

        match auth_type {
            AuthType::Basic | AuthType::Bearer => {
                let authorization = self
                    .config
                    .credentials
                    .headers
                    .get("Authorization")
                    .ok_or(AuthError::Credentials {
                        auth_type: auth_type.name(),
                        detail: "no Authorization header in credentials",
                    })?;
                headers.push(("Authorization".into(), authorization.clone()));
            }
            AuthType::FormData => {
                if self.config.credentials.body_params.is_empty() {
                    return Err(AuthError::Credentials {
                        auth_type: auth_type.name(),
                        detail: "no body_params in credentials",
                    });
                }
                let pairs = self.resolved_params();
                body = Some(RequestBody::Form(pairs));
            }
            AuthType::JsonBody => {
                let json = self.config.credentials.json_body.as_ref().ok_or(
                    AuthError::Credentials {
                        auth_type: auth_type.name(),
                        detail: "no json_body in credentials",
                    },
                )?;
                body = Some(RequestBody::Json(self.resolver.resolve_json(json)));
            }
            AuthType::QueryParams => {
                if self.config.credentials.body_params.is_empty() {
                    return Err(AuthError::Credentials {
                        auth_type: auth_type.name(),
                        detail: "no body_params in credentials",
                    });
                }
                let query: Vec<String> = self
                    .resolved_params()
                    .into_iter()
                    .filter(|(_, v)| !v.is_empty())
                    .map(|(k, v)| format!("{}={}", encode_value(&k), encode_value(&v)))
                    .collect();
                url = format!("{}?{}", url, query.join("&"));
            }
            AuthType::CustomHeaders => {
                if self.config.credentials.headers.is_empty() {
                    return Err(AuthError::Credentials {
                        auth_type: auth_type.name(),
                        detail: "no headers in credentials",
                    });
                }
                for (name, value) in &self.config.credentials.headers {
                    headers.push((name.clone(), self.resolver.resolve(value)));
                }
            }
        }

        Ok(SimRequest {
            method: self.config.method.to_ascii_uppercase(),
            url,
            headers,
            body,
            timeout: AUTH_TIMEOUT,
            capture_body: true,
        })
    }

    /// body_params with variable tokens resolved, in stable order
    fn resolved_params(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .config
            .credentials
            .body_params
            .iter()
            .map(|(k, v)| (k.clone(), self.resolver.resolve(v)))
            .collect();
        pairs.sort();
        pairs
    }

    fn extract_context(&self, outcome: &Outcome) -> CredentialContext {
        if let Some(body) = &outcome.body {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
                for key in ["auth_token", "token", "access_token"] {
                    if let Some(token) = json.get(key).and_then(|v| v.as_str()) {
                        return CredentialContext::bearer(token);
                    }
                }
            }
        }
        if let Some(cookie) = &outcome.set_cookie {
            let pair = cookie.split(';').next().unwrap_or(cookie).trim();
            if !pair.is_empty() {
                return CredentialContext::header("Cookie", pair);
            }
        }
        if matches!(self.config.auth_type, AuthType::Basic | AuthType::Bearer) {
            if let Some(authorization) = self.config.credentials.headers.get("Authorization") {
                return CredentialContext::header("Authorization", authorization);
            }
        }
        CredentialContext::empty()
    }
}

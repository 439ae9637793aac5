//! Sitemap data model: path groups, variables, and the auth flow description
//!
//! These are plain serde models. The control plane deserializes whatever wire
//! shape it accepts and hands the engine the canonical structs below;
//! `Sitemap::validate` is the engine's only gate.

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Supported HTTP methods for path groups and auth requests
const ALLOWED_METHODS: &[&str] = &["GET", "POST", "PUT", "DELETE", "HEAD", "PATCH", "OPTIONS"];

/// Header/user-agent simulation profile selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficType {
    /// Browser-like Accept/Accept-Language/User-Agent rotation
    Web,
    /// Client-library-like minimal headers
    Api,
}

/// A group of path templates sharing a method, body template, and profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathGroup {
    /// HTTP method, upper- or lowercase
    pub method: String,

    /// Path templates; may contain `@name` tokens
    pub paths: Vec<String>,

    /// Optional body template; may contain `@name` tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// Which header simulation profile requests from this group use
    pub traffic_type: TrafficType,
}

/// A variable source for `@name` substitution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum VariableSpec {
    /// Draw one value uniformly from a fixed list
    List(Vec<String>),
    /// Draw an integer uniformly from an inclusive range
    Range(i64, i64),
}

/// How credentials are attached to the login request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    /// HTTP Basic header taken from the credentials header map
    Basic,
    /// Static bearer token taken from the credentials header map
    Bearer,
    /// Credentials sent as an urlencoded form body
    FormData,
    /// Credentials sent as a JSON body
    JsonBody,
    /// Credentials appended as URL query parameters
    QueryParams,
    /// Credentials copied verbatim into request headers
    CustomHeaders,
}

impl AuthType {
    /// Stable lowercase name, used in logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            AuthType::Basic => "basic",
            AuthType::Bearer => "bearer",
            AuthType::FormData => "form_data",
            AuthType::JsonBody => "json_body",
            AuthType::QueryParams => "query_params",
            AuthType::CustomHeaders => "custom_headers",
        }
    }
}

/// Credential material; which fields matter depends on [`AuthType`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    /// Header name -> value (basic, bearer, custom_headers)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Form/query parameter name -> value (form_data, query_params)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub body_params: HashMap<String, String>,

    /// Arbitrary JSON login body (json_body)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_body: Option<serde_json::Value>,
}

/// The login step executed once per session when `has_auth` is set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HTTP method of the login request
    pub method: String,

    /// Path to authenticate against; may contain `@name` tokens
    pub path: String,

    /// How the credentials are attached
    pub auth_type: AuthType,

    /// The credential bundle itself
    pub credentials: Credentials,
}

/// Header overrides scoped to paths matching one of the given patterns
///
/// Patterns are compared segment-wise; a `@name` segment matches anything.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderOverride {
    /// Path patterns the override applies to
    pub paths: Vec<String>,

    /// Headers merged into matching requests; values may contain `@name` tokens
    pub headers: HashMap<String, String>,
}

/// Declarative description of target paths, auth flow, and variables for a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sitemap {
    /// Whether sessions perform the login step at start
    pub has_auth: bool,

    /// Path groups available to every session
    pub paths: Vec<PathGroup>,

    /// Path groups only visited by authenticated sessions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths_auth_req: Vec<PathGroup>,

    /// Login flow; required iff `has_auth`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,

    /// Headers merged into every request (overridable downstream)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub global_headers: HashMap<String, String>,

    /// Variable name -> source for `@name` substitution
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub variables: HashMap<String, VariableSpec>,

    /// Path-scoped header overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header_override: Option<HeaderOverride>,
}

impl Sitemap {
    /// Validate the sitemap
    ///
    /// Checks group/variable shape and the `has_auth` <-> auth config pairing.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.paths.is_empty() && self.paths_auth_req.is_empty() {
            return Err(ValidationError::EmptySitemap);
        }
        // Gated groups are only reachable by authenticated sessions; without
        // has_auth they would leave every session with nothing to visit.
        if self.paths.is_empty() && !self.has_auth {
            return Err(ValidationError::GatedPathsWithoutAuth);
        }

        for (list, groups) in [("paths", &self.paths), ("paths_auth_req", &self.paths_auth_req)] {
            for (index, group) in groups.iter().enumerate() {
                validate_method(&group.method)?;
                if group.paths.is_empty() {
                    return Err(ValidationError::EmptyPathGroup { list, index });
                }
            }
        }

        match (&self.auth, self.has_auth) {
            (None, true) => return Err(ValidationError::MissingAuthConfig),
            (Some(auth), true) => validate_method(&auth.method)?,
            // Auth config without has_auth is ignored, matching the original
            // control plane which nulls it out.
            _ => {}
        }

        for (name, spec) in &self.variables {
            match spec {
                VariableSpec::List(values) if values.is_empty() => {
                    return Err(ValidationError::EmptyVariable { name: name.clone() });
                }
                VariableSpec::Range(lo, hi) if lo > hi => {
                    return Err(ValidationError::InvertedRange {
                        name: name.clone(),
                        lo: *lo,
                        hi: *hi,
                    });
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Auth config, present only when the flow is actually enabled
    pub fn auth_flow(&self) -> Option<&AuthConfig> {
        if self.has_auth {
            self.auth.as_ref()
        } else {
            None
        }
    }
}

/// Check a method against the supported set
pub(crate) fn validate_method(method: &str) -> Result<(), ValidationError> {
    let upper = method.to_ascii_uppercase();
    if ALLOWED_METHODS.contains(&upper.as_str()) {
        Ok(())
    } else {
        Err(ValidationError::UnsupportedMethod(method.to_string()))
    }
}

/// Match a concrete request path against a template pattern
///
/// Segment counts must agree; `@name` segments match any single segment.
/// `/users/@id` matches `/users/123` but not `/users/123/profile`.
pub fn match_path(request_path: &str, pattern: &str) -> bool {
    let request: Vec<&str> = request_path.trim_matches('/').split('/').collect();
    let pattern: Vec<&str> = pattern.trim_matches('/').split('/').collect();

    request.len() == pattern.len()
        && request
            .iter()
            .zip(&pattern)
            .all(|(req, pat)| pat.starts_with('@') || req == pat)
}

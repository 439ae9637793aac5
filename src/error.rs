//! Error types for the traffic engine

use thiserror::Error;

/// Errors surfaced synchronously from engine control operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration or sitemap failed validation; the engine stays stopped
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// `start()` called while a run is already in progress
    #[error("engine is already running; stop it before starting a new run")]
    AlreadyRunning,

    /// `update()` called while a run is in progress
    #[error("configuration updates are rejected while running; stop the engine first")]
    RejectedWhileRunning,
}

/// Invalid configuration or sitemap, reported before any session is spawned
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Target URL could not be parsed or lacks a host
    #[error("invalid target URL {url:?}: {reason}")]
    TargetUrl {
        /// The URL as configured
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// A count field that must be >= 1 was zero
    #[error("{field} must be at least 1")]
    NotPositive {
        /// Name of the offending field
        field: &'static str,
    },

    /// Session length bounds are inverted or zero
    #[error("session length bounds invalid: min={min}s max={max}s (need 0 < min <= max)")]
    SessionBounds {
        /// Configured minimum session length
        min: u64,
        /// Configured maximum session length
        max: u64,
    },

    /// The sitemap carries no path groups at all
    #[error("sitemap has no path groups")]
    EmptySitemap,

    /// A path group has an empty template list
    #[error("path group {index} in {list} has an empty path list")]
    EmptyPathGroup {
        /// Which list the group sits in (`paths` or `paths_auth_req`)
        list: &'static str,
        /// Index of the group within that list
        index: usize,
    },

    /// Every path group is auth-gated but sessions never authenticate
    #[error("sitemap has only auth-gated path groups but has_auth is not set")]
    GatedPathsWithoutAuth,

    /// An HTTP method outside the supported set
    #[error("unsupported HTTP method {0:?}")]
    UnsupportedMethod(String),

    /// `has_auth` is set but no auth config was supplied
    #[error("has_auth is set but the sitemap carries no auth configuration")]
    MissingAuthConfig,

    /// A list variable with no values
    #[error("variable {name:?} has an empty value list")]
    EmptyVariable {
        /// Variable name as declared in the sitemap
        name: String,
    },

    /// A range variable with inverted bounds
    #[error("range variable {name:?} needs lo <= hi, got {lo}..={hi}")]
    InvertedRange {
        /// Variable name as declared in the sitemap
        name: String,
        /// Lower bound
        lo: i64,
        /// Upper bound
        hi: i64,
    },
}

/// Login-flow failure; the session slot retries a bounded number of times
#[derive(Debug, Error)]
pub enum AuthError {
    /// The target answered the login request with a non-success status
    #[error("login rejected with status {status}")]
    Rejected {
        /// HTTP status returned by the auth path
        status: u16,
    },

    /// The login request never produced a response
    #[error("login request failed: {0}")]
    Network(#[from] DispatchError),

    /// The configured credentials bundle lacks the material the auth type needs
    #[error("credentials missing for {auth_type} auth: {detail}")]
    Credentials {
        /// Auth type being executed
        auth_type: &'static str,
        /// What was missing
        detail: &'static str,
    },
}

/// Network or protocol failure on a single dispatched request
///
/// Never fatal to a session: the outcome is recorded and the session
/// continues after its think-time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The request exceeded its deadline
    #[error("request timed out")]
    Timeout,

    /// TCP/TLS connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other transport-level failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The assembled request was not sendable (bad method or URL)
    #[error("unsendable request: {0}")]
    InvalidRequest(String),
}

impl DispatchError {
    /// Classify a reqwest error into the dispatch taxonomy
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            DispatchError::Timeout
        } else if err.is_connect() {
            DispatchError::Connect(err.to_string())
        } else if err.is_builder() || err.is_request() {
            DispatchError::InvalidRequest(err.to_string())
        } else {
            DispatchError::Transport(err.to_string())
        }
    }
}

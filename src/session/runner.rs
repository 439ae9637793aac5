//! A single simulated user session
//!
//! A runner lives for one session: it picks a planned duration, optionally
//! authenticates, then loops request / think-time until the duration elapses
//! or shutdown is signalled. Dispatch failures are recorded and the session
//! keeps going; only shutdown or the deadline end it.

use crate::auth::{AuthFlowExecutor, CredentialContext};
use crate::config::EngineConfig;
use crate::dispatch::{Dispatcher, RequestBody, SimRequest, Target};
use crate::metrics::MetricsAggregator;
use crate::profile::SessionProfile;
use crate::session::limiter::InflightLimiter;
use crate::sitemap::{match_path, PathGroup, Sitemap};
use crate::vars::VariableResolver;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Lower bound of the pause between a session's requests
const THINK_TIME_MIN: Duration = Duration::from_millis(100);
/// Upper bound of the pause between a session's requests
const THINK_TIME_MAX: Duration = Duration::from_millis(1000);
/// Login attempts before a session gives up on authentication
const AUTH_ATTEMPTS: u32 = 3;
/// Pause between failed login attempts
const AUTH_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Lifecycle of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Duration picked, login (if any) in progress
    Starting = 0,
    /// Request / think-time loop
    Active = 1,
    /// Deadline reached or shutdown seen; finishing the in-flight request
    Draining = 2,
    /// Loop exited
    Finished = 3,
}

/// Shared view of a session's lifecycle state
///
/// The runner holds one end; the pool or a test can hold clones and observe
/// transitions while the session runs.
#[derive(Debug, Clone)]
pub struct SessionStateHandle(Arc<AtomicU8>);

impl SessionStateHandle {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(SessionState::Starting as u8)))
    }

    fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// The session's state as of this instant
    pub fn get(&self) -> SessionState {
        match self.0.load(Ordering::Acquire) {
            0 => SessionState::Starting,
            1 => SessionState::Active,
            2 => SessionState::Draining,
            _ => SessionState::Finished,
        }
    }
}

/// Drives one simulated user from login to expiry
pub struct SessionRunner {
    id: u64,
    config: Arc<EngineConfig>,
    sitemap: Arc<Sitemap>,
    target: Target,
    dispatcher: Arc<dyn Dispatcher>,
    resolver: VariableResolver,
    limiter: Arc<InflightLimiter>,
    metrics: Arc<MetricsAggregator>,
    profile: SessionProfile,
    state: SessionStateHandle,
    credentials: CredentialContext,
    authenticated: bool,
    requests_sent: u64,
}

impl SessionRunner {
    /// Assemble a runner with a freshly drawn fingerprint
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: u64,
        config: Arc<EngineConfig>,
        sitemap: Arc<Sitemap>,
        target: Target,
        dispatcher: Arc<dyn Dispatcher>,
        limiter: Arc<InflightLimiter>,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        let resolver = VariableResolver::new(Arc::new(sitemap.variables.clone()));
        Self {
            id,
            config,
            sitemap,
            target,
            dispatcher,
            resolver,
            limiter,
            metrics,
            profile: SessionProfile::sample(),
            state: SessionStateHandle::new(),
            credentials: CredentialContext::empty(),
            authenticated: false,
            requests_sent: 0,
        }
    }

    /// A handle that stays readable after `run` consumes the runner
    pub fn state_handle(&self) -> SessionStateHandle {
        self.state.clone()
    }

    /// Run the session to completion; returns the number of requests sent
    ///
    /// The receiver must have been subscribed before the session started so
    /// no shutdown signal can be missed.
    pub async fn run(mut self, shutdown: &mut broadcast::Receiver<()>) -> u64 {
        let planned = self.planned_duration();
        let deadline = Instant::now() + planned;
        tracing::debug!(
            session = self.id,
            duration_secs = planned.as_secs_f64(),
            source_ip = %self.profile.source_ip,
            "session starting"
        );

        if let Some(auth) = self.sitemap.auth_flow().cloned() {
            if !self.try_authenticate(&auth, shutdown).await {
                self.metrics.record_auth_failure();
                tracing::warn!(session = self.id, "authentication failed, session idling");
                // Idle one think time so a broken login endpoint cannot turn
                // the pool into a tight retry loop.
                let pause = think_time();
                tokio::select! {
                    _ = shutdown.recv() => {}
                    _ = tokio::time::sleep(pause) => {}
                }
                self.state.set(SessionState::Finished);
                return self.requests_sent;
            }
            self.authenticated = true;
        }

        self.state.set(SessionState::Active);
        loop {
            if Instant::now() >= deadline {
                self.state.set(SessionState::Draining);
                break;
            }

            let permit = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    self.state.set(SessionState::Draining);
                    break;
                }
                permit = self.limiter.acquire() => match permit {
                    Some(permit) => permit,
                    None => {
                        self.state.set(SessionState::Draining);
                        break;
                    }
                },
            };

            // A shutdown arriving mid-dispatch moves the session to Draining,
            // but the accepted request is allowed to finish so the target
            // never sees abandoned sockets.
            let request = self.build_request();
            let outcome = {
                let dispatch = self.dispatcher.dispatch(request);
                tokio::pin!(dispatch);
                tokio::select! {
                    biased;
                    _ = shutdown.recv() => {
                        self.state.set(SessionState::Draining);
                        dispatch.await
                    }
                    outcome = &mut dispatch => outcome,
                }
            };
            drop(permit);

            self.metrics.record(&outcome);
            self.requests_sent += 1;
            if self.state.get() == SessionState::Draining {
                break;
            }

            let pause = think_time();
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    self.state.set(SessionState::Draining);
                    break;
                }
                _ = tokio::time::sleep(pause) => {}
            }
        }

        self.state.set(SessionState::Finished);
        tracing::debug!(
            session = self.id,
            requests = self.requests_sent,
            "session finished"
        );
        self.requests_sent
    }

    fn planned_duration(&self) -> Duration {
        let mut rng = rand::thread_rng();
        let secs = rng.gen_range(self.config.min_session_secs..=self.config.max_session_secs);
        Duration::from_secs(secs)
    }

    async fn try_authenticate(
        &mut self,
        auth: &crate::sitemap::AuthConfig,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> bool {
        let executor =
            AuthFlowExecutor::new(auth.clone(), self.target.clone(), self.resolver.clone());
        let base_headers = self.ambient_headers();

        for attempt in 1..=AUTH_ATTEMPTS {
            // Login round-trips count against the in-flight cap like any
            // other dispatch.
            let permit = tokio::select! {
                biased;
                _ = shutdown.recv() => return false,
                permit = self.limiter.acquire() => match permit {
                    Some(permit) => permit,
                    None => return false,
                },
            };
            let result = executor
                .authenticate(self.dispatcher.as_ref(), &base_headers)
                .await;
            drop(permit);

            match result {
                Ok(context) => {
                    self.credentials = context;
                    return true;
                }
                Err(error) => {
                    tracing::warn!(
                        session = self.id,
                        attempt,
                        error = %error,
                        "login attempt failed"
                    );
                    if attempt == AUTH_ATTEMPTS {
                        return false;
                    }
                    let backoff = AUTH_RETRY_BACKOFF * attempt;
                    tokio::select! {
                        _ = shutdown.recv() => return false,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
        false
    }

    /// Headers every request of this session carries before profile and
    /// override layers: resolved global headers plus the fake source IP.
    fn ambient_headers(&self) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = self
            .sitemap
            .global_headers
            .iter()
            .map(|(k, v)| (k.clone(), self.resolver.resolve(v)))
            .collect();
        headers.push((
            self.config.xff_header_name.clone(),
            self.profile.source_ip.clone(),
        ));
        headers
    }

    fn build_request(&self) -> SimRequest {
        let group = self.pick_group();
        let (path, body_template) = {
            let mut rng = rand::thread_rng();
            let path = group
                .paths
                .choose(&mut rng)
                .cloned()
                // Empty groups are rejected by sitemap validation.
                .unwrap_or_default();
            (path, group.body.clone())
        };
        let resolved_path = self.resolver.resolve(&path);
        let url = self.target.url_for(&resolved_path);

        let mut headers = self.ambient_headers();
        for (name, value) in self.profile.headers_for(group.traffic_type) {
            merge_header(&mut headers, name, value);
        }
        if let Some(overrides) = &self.sitemap.header_override {
            if overrides
                .paths
                .iter()
                .any(|pattern| match_path(&resolved_path, pattern))
            {
                for (name, value) in &overrides.headers {
                    merge_header(&mut headers, name.clone(), self.resolver.resolve(value));
                }
            }
        }
        // Credentials last so nothing can shadow them.
        for (name, value) in self.credentials.headers() {
            merge_header(&mut headers, name.clone(), value.clone());
        }

        let body = body_template.map(|template| {
            let resolved = self.resolver.resolve(&template);
            match serde_json::from_str::<serde_json::Value>(&resolved) {
                Ok(json) => RequestBody::Json(json),
                Err(_) => RequestBody::Raw(resolved),
            }
        });

        SimRequest {
            method: group.method.to_ascii_uppercase(),
            url,
            headers,
            body,
            timeout: crate::dispatch::REQUEST_TIMEOUT,
            capture_body: false,
        }
    }

    /// One path group, uniform over everything this session may visit
    ///
    /// Validation guarantees `paths` is non-empty whenever sessions can run
    /// unauthenticated, so the draw range is never empty here.
    fn pick_group(&self) -> &PathGroup {
        let open = self.sitemap.paths.len();
        let gated = if self.authenticated {
            self.sitemap.paths_auth_req.len()
        } else {
            0
        };
        let mut rng = rand::thread_rng();
        let index = rng.gen_range(0..open + gated);
        if index < open {
            &self.sitemap.paths[index]
        } else {
            &self.sitemap.paths_auth_req[index - open]
        }
    }
}

/// Draw one pause between requests
fn think_time() -> Duration {
    let mut rng = rand::thread_rng();
    rng.gen_range(THINK_TIME_MIN..=THINK_TIME_MAX)
}

/// Append or replace a header, comparing names case-insensitively
fn merge_header(headers: &mut Vec<(String, String)>, name: String, value: String) {
    if let Some(slot) = headers
        .iter_mut()
        .find(|(existing, _)| existing.eq_ignore_ascii_case(&name))
    {
        slot.1 = value;
    } else {
        headers.push((name, value));
    }
}

//! Session runner and pool behavior against a scriptable dispatcher

use crate::auth::CredentialContext;
use crate::config::EngineConfig;
use crate::dispatch::{Dispatcher, Outcome, SimRequest, Target};
use crate::error::DispatchError;
use crate::metrics::MetricsAggregator;
use crate::session::limiter::InflightLimiter;
use crate::session::pool::SessionPool;
use crate::session::runner::{SessionRunner, SessionState};
use crate::sitemap::Sitemap;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// What the scripted dispatcher answers with
#[derive(Clone)]
enum Script {
    Ok { status: u16, delay: Duration },
    Fail,
    Hang,
}

struct ScriptedDispatcher {
    script: Script,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    requests: Mutex<Vec<SimRequest>>,
}

impl ScriptedDispatcher {
    fn new(script: Script) -> Self {
        Self {
            script,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::Acquire)
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl Dispatcher for ScriptedDispatcher {
    async fn dispatch(&self, request: SimRequest) -> Outcome {
        let current = self.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_in_flight.fetch_max(current, Ordering::AcqRel);
        self.requests.lock().unwrap().push(request);

        let outcome = match &self.script {
            Script::Ok { status, delay } => {
                tokio::time::sleep(*delay).await;
                Outcome {
                    status: Some(*status),
                    bytes_sent: 10,
                    bytes_received: 100,
                    elapsed: *delay,
                    error: None,
                    body: None,
                    set_cookie: None,
                }
            }
            Script::Fail => Outcome::failed(
                DispatchError::Connect("refused".into()),
                10,
                Duration::from_millis(1),
            ),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Outcome::failed(DispatchError::Timeout, 10, Duration::from_secs(60))
            }
        };

        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        outcome
    }
}

fn config(users: usize, rate_limit: usize, session_secs: u64) -> Arc<EngineConfig> {
    Arc::new(EngineConfig {
        target_url: "http://example.com".into(),
        dns_override: None,
        xff_header_name: "X-Forwarded-For".into(),
        rate_limit,
        simulated_users: users,
        min_session_secs: session_secs,
        max_session_secs: session_secs,
        debug: false,
    })
}

fn open_sitemap() -> Arc<Sitemap> {
    Arc::new(
        serde_json::from_value(serde_json::json!({
            "has_auth": false,
            "paths": [
                {"method": "GET", "paths": ["/", "/about", "/items/@id"], "traffic_type": "web"}
            ],
            "variables": {"id": {"type": "range", "value": [1, 50]}}
        }))
        .unwrap(),
    )
}

fn auth_sitemap() -> Arc<Sitemap> {
    Arc::new(
        serde_json::from_value(serde_json::json!({
            "has_auth": true,
            "paths": [
                {"method": "GET", "paths": ["/"], "traffic_type": "web"}
            ],
            "auth": {
                "method": "POST",
                "path": "/login",
                "auth_type": "json_body",
                "credentials": {"json_body": {"user": "u", "password": "p"}}
            }
        }))
        .unwrap(),
    )
}

fn runner(
    config: &Arc<EngineConfig>,
    sitemap: &Arc<Sitemap>,
    dispatcher: Arc<dyn Dispatcher>,
    metrics: &Arc<MetricsAggregator>,
) -> SessionRunner {
    let target = Target::from_config(config).unwrap();
    SessionRunner::new(
        1,
        Arc::clone(config),
        Arc::clone(sitemap),
        target,
        dispatcher,
        Arc::new(InflightLimiter::new(config.rate_limit)),
        Arc::clone(metrics),
    )
}

#[tokio::test]
async fn test_runner_sends_requests_for_planned_duration() {
    let config = config(1, 4, 1);
    let metrics = Arc::new(MetricsAggregator::new());
    let dispatcher = Arc::new(ScriptedDispatcher::new(Script::Ok {
        status: 200,
        delay: Duration::from_millis(5),
    }));
    let (tx, mut rx) = broadcast::channel(1);

    let start = std::time::Instant::now();
    let sent = runner(&config, &open_sitemap(), dispatcher.clone(), &metrics)
        .run(&mut rx)
        .await;
    drop(tx);

    assert!(sent >= 1, "a one-second session must send something");
    // Planned duration plus at most one trailing request + think time.
    assert!(start.elapsed() < Duration::from_secs(3));
    assert_eq!(dispatcher.request_count() as u64, sent);
    assert_eq!(metrics.total_requests(), sent);
}

#[tokio::test]
async fn test_runner_requests_carry_fingerprint_headers() {
    let config = config(1, 4, 1);
    let metrics = Arc::new(MetricsAggregator::new());
    let dispatcher = Arc::new(ScriptedDispatcher::new(Script::Ok {
        status: 200,
        delay: Duration::from_millis(1),
    }));
    let (_tx, mut rx) = broadcast::channel(1);

    runner(&config, &open_sitemap(), dispatcher.clone(), &metrics)
        .run(&mut rx)
        .await;

    let requests = dispatcher.requests.lock().unwrap();
    let first = &requests[0];
    let header = |name: &str| {
        first
            .headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    };
    let ip = header("X-Forwarded-For").unwrap();
    assert!(ip.split('.').count() == 4);
    assert!(header("User-Agent").is_some());

    // The fingerprint is sticky for the whole session.
    for request in requests.iter() {
        let this_ip = request
            .headers
            .iter()
            .find(|(k, _)| k == "X-Forwarded-For")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert_eq!(this_ip, ip);
    }
}

#[tokio::test]
async fn test_runner_survives_transport_failures() {
    let config = config(1, 4, 1);
    let metrics = Arc::new(MetricsAggregator::new());
    let dispatcher = Arc::new(ScriptedDispatcher::new(Script::Fail));
    let (_tx, mut rx) = broadcast::channel(1);

    let sent = runner(&config, &open_sitemap(), dispatcher.clone(), &metrics)
        .run(&mut rx)
        .await;

    assert!(sent >= 1);
    let snapshot = metrics.snapshot(crate::engine::EngineState::Running);
    assert_eq!(snapshot.failed_requests, sent);
    assert_eq!(snapshot.total_requests, sent);
}

#[tokio::test]
async fn test_runner_gives_up_after_rejected_logins() {
    let config = config(1, 4, 5);
    let metrics = Arc::new(MetricsAggregator::new());
    let dispatcher = Arc::new(ScriptedDispatcher::new(Script::Ok {
        status: 401,
        delay: Duration::from_millis(1),
    }));
    let (_tx, mut rx) = broadcast::channel(1);

    let sent = runner(&config, &auth_sitemap(), dispatcher.clone(), &metrics)
        .run(&mut rx)
        .await;

    assert_eq!(sent, 0, "no traffic without credentials");
    // Three login attempts, then the session idles out.
    assert_eq!(dispatcher.request_count(), 3);
    let snapshot = metrics.snapshot(crate::engine::EngineState::Running);
    assert_eq!(snapshot.auth_failures, 1);
}

#[tokio::test]
async fn test_credential_context_attached_after_login() {
    let config = config(1, 4, 1);
    let metrics = Arc::new(MetricsAggregator::new());
    let dispatcher = Arc::new(ScriptedDispatcher::new(Script::Ok {
        status: 200,
        delay: Duration::from_millis(1),
    }));
    let (_tx, mut rx) = broadcast::channel(1);

    // Login succeeds but yields no token or cookie; the session must still
    // proceed with an empty context rather than fail.
    let sent = runner(&config, &auth_sitemap(), dispatcher.clone(), &metrics)
        .run(&mut rx)
        .await;
    assert!(sent >= 1);
    assert!(CredentialContext::empty().is_empty());

    let requests = dispatcher.requests.lock().unwrap();
    assert_eq!(requests[0].url, "http://example.com/login");
    assert!(requests.len() as u64 > sent, "login is not counted as traffic");
}

/// Poll `cond` until it holds or `budget` elapses
async fn wait_until(budget: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + budget;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

#[tokio::test]
async fn test_session_states_observable_through_drain() {
    let config = config(1, 4, 5);
    let metrics = Arc::new(MetricsAggregator::new());
    let dispatcher = Arc::new(ScriptedDispatcher::new(Script::Ok {
        status: 200,
        delay: Duration::from_millis(500),
    }));
    let runner = runner(&config, &open_sitemap(), dispatcher.clone(), &metrics);
    let state = runner.state_handle();
    assert_eq!(state.get(), SessionState::Starting);

    let (tx, mut rx) = broadcast::channel(1);
    let task = tokio::spawn(async move { runner.run(&mut rx).await });

    // Wait until the first dispatch is in flight, then signal shutdown.
    assert!(
        wait_until(Duration::from_secs(2), || dispatcher.request_count() >= 1).await,
        "session never dispatched"
    );
    assert_eq!(state.get(), SessionState::Active);
    tx.send(()).unwrap();

    // The session drains: it reports Draining while the in-flight request is
    // still being finished rather than abandoning it.
    let state_probe = state.clone();
    assert!(
        wait_until(Duration::from_millis(300), move || {
            state_probe.get() == SessionState::Draining
        })
        .await,
        "session never reported Draining"
    );
    assert_eq!(dispatcher.in_flight.load(Ordering::Acquire), 1);

    let sent = task.await.unwrap();
    assert_eq!(state.get(), SessionState::Finished);
    assert_eq!(sent, 1, "the drained request still counts");
    assert_eq!(metrics.total_requests(), 1);
}

#[tokio::test]
async fn test_expired_session_reaches_finished() {
    let config = config(1, 4, 1);
    let metrics = Arc::new(MetricsAggregator::new());
    let dispatcher = Arc::new(ScriptedDispatcher::new(Script::Ok {
        status: 200,
        delay: Duration::from_millis(1),
    }));
    let runner = runner(&config, &open_sitemap(), dispatcher, &metrics);
    let state = runner.state_handle();
    let (_tx, mut rx) = broadcast::channel(1);

    runner.run(&mut rx).await;
    assert_eq!(state.get(), SessionState::Finished);
}

#[tokio::test]
async fn test_auth_requests_respect_rate_limit() {
    let metrics = Arc::new(MetricsAggregator::new());
    let dispatcher = Arc::new(ScriptedDispatcher::new(Script::Ok {
        status: 200,
        delay: Duration::from_millis(200),
    }));
    // Every session logs in at start; those round-trips must queue on the
    // same cap as regular traffic.
    let pool = SessionPool::spawn(
        config(4, 1, 5),
        auth_sitemap(),
        dispatcher.clone(),
        Arc::clone(&metrics),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_millis(700)).await;
    pool.shutdown(Duration::from_secs(2)).await;

    assert!(dispatcher.request_count() > 0);
    assert!(
        dispatcher.max_in_flight() <= 1,
        "saw {} concurrent requests with a cap of 1 during login",
        dispatcher.max_in_flight()
    );
}

#[tokio::test]
async fn test_pool_respects_rate_limit() {
    let metrics = Arc::new(MetricsAggregator::new());
    let dispatcher = Arc::new(ScriptedDispatcher::new(Script::Ok {
        status: 200,
        delay: Duration::from_millis(30),
    }));
    let pool = SessionPool::spawn(
        config(6, 2, 5),
        open_sitemap(),
        dispatcher.clone(),
        Arc::clone(&metrics),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(pool.active_sessions(), 6);
    pool.shutdown(Duration::from_secs(2)).await;

    assert!(dispatcher.request_count() > 0);
    assert!(
        dispatcher.max_in_flight() <= 2,
        "saw {} concurrent requests with a cap of 2",
        dispatcher.max_in_flight()
    );
}

#[tokio::test]
async fn test_pool_slots_restart_sessions() {
    let metrics = Arc::new(MetricsAggregator::new());
    let dispatcher = Arc::new(ScriptedDispatcher::new(Script::Ok {
        status: 200,
        delay: Duration::from_millis(1),
    }));
    // One-second sessions observed for over two seconds: each slot must have
    // started more than one session.
    let pool = SessionPool::spawn(
        config(2, 4, 1),
        open_sitemap(),
        dispatcher.clone(),
        Arc::clone(&metrics),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(pool.active_sessions(), 2);
    pool.shutdown(Duration::from_secs(2)).await;
    assert!(metrics.total_requests() > 2);
}

#[tokio::test]
async fn test_shutdown_aborts_hung_dispatches() {
    let metrics = Arc::new(MetricsAggregator::new());
    let dispatcher = Arc::new(ScriptedDispatcher::new(Script::Hang));
    let pool = SessionPool::spawn(
        config(3, 3, 30),
        open_sitemap(),
        dispatcher.clone(),
        Arc::clone(&metrics),
    )
    .unwrap();

    // Let every slot get stuck inside a dispatch.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stopped = tokio::time::timeout(
        Duration::from_secs(3),
        pool.shutdown(Duration::from_millis(300)),
    )
    .await;
    assert!(stopped.is_ok(), "shutdown must not wait out hung requests");
}

#[tokio::test]
async fn test_shutdown_with_idle_pool_is_quick() {
    let metrics = Arc::new(MetricsAggregator::new());
    let dispatcher = Arc::new(ScriptedDispatcher::new(Script::Ok {
        status: 200,
        delay: Duration::from_millis(1),
    }));
    let pool = SessionPool::spawn(
        config(2, 2, 30),
        open_sitemap(),
        dispatcher,
        Arc::clone(&metrics),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let start = std::time::Instant::now();
    pool.shutdown(Duration::from_secs(5)).await;
    // Sessions between requests notice the signal at the next await point.
    assert!(start.elapsed() < Duration::from_secs(3));
}

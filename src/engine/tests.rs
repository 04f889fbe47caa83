use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::*;
use crate::config::{ApiConfig, Config, ExtractorKind, ExtractorSpec, VerifyConfig, VerifyKind};
use crate::error::RequestError;
use crate::protocol::{Client, Protocol, Request, Response, SharedClient};
use crate::shutdown::Shutdown;
use crate::stats::Collector;

fn run_async_test<F>(future: F) -> Result<(), String>
where
    F: Future<Output = Result<(), String>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| format!("Failed to build runtime: {}", err))?;
    runtime.block_on(future)
}

type Script = Box<dyn Fn(&Request) -> Result<Response, RequestError> + Send + Sync>;

/// In-memory client scripted per request; records everything it was sent.
struct StubClient {
    script: Script,
    requests: Mutex<Vec<Request>>,
    closed: AtomicBool,
}

impl StubClient {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(StubClient {
            script,
            requests: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    fn ok_with_body(body: &'static str) -> Arc<Self> {
        StubClient::new(Box::new(move |request| {
            let mut response = Response::echo_of(request);
            response.status_code = 200;
            response.body = body.as_bytes().to_vec();
            response.duration = Duration::from_millis(1);
            Ok(response)
        }))
    }

    fn recorded(&self) -> Vec<Request> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Client for StubClient {
    async fn connect(&self) -> Result<(), RequestError> {
        Ok(())
    }

    async fn send(&self, request: &Request) -> Result<Response, RequestError> {
        // Yield so timers make progress under a current-thread runtime.
        tokio::task::yield_now().await;
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        (self.script)(request)
    }

    async fn close(&self) -> Result<(), RequestError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn protocol(&self) -> Protocol {
        Protocol::Http
    }
}

fn transport_error(request: &Request) -> RequestError {
    let mut response = Response::echo_of(request);
    response.duration = Duration::from_millis(1);
    response.error = Some("connection refused".to_owned());
    RequestError::Transport {
        message: "connection refused".to_owned(),
        response: Box::new(response),
    }
}

struct CountingHandler {
    calls: AtomicU32,
    fail_first: u32,
}

#[async_trait]
impl Handler for CountingHandler {
    async fn call(
        &self,
        request: &Request,
        _shutdown: &Shutdown,
    ) -> Result<Response, RequestError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            Err(transport_error(request))
        } else {
            let mut response = Response::echo_of(request);
            response.status_code = 200;
            response.duration = Duration::from_millis(1);
            Ok(response)
        }
    }
}

// --- circuit breaker -------------------------------------------------------

#[test]
fn breaker_opens_after_consecutive_failures() {
    let circuit = Circuit::new(3, Duration::from_secs(60));
    assert!(circuit.allow());
    circuit.record(false);
    circuit.record(false);
    assert!(circuit.allow());
    circuit.record(false);
    assert!(!circuit.allow());
}

#[test]
fn breaker_success_resets_the_failure_streak() {
    let circuit = Circuit::new(2, Duration::from_secs(60));
    circuit.record(false);
    circuit.record(true);
    circuit.record(false);
    assert!(circuit.allow(), "streak was broken, circuit must stay closed");
}

#[test]
fn breaker_recovers_through_half_open() -> Result<(), String> {
    run_async_test(async {
        let circuit = Circuit::new(1, Duration::from_millis(20));
        circuit.record(false);
        if circuit.allow() {
            return Err("circuit should be open".to_owned());
        }

        tokio::time::sleep(Duration::from_millis(40)).await;
        if !circuit.allow() {
            return Err("circuit should be half-open after the reset timeout".to_owned());
        }

        // Two consecutive successes close it again.
        circuit.record(true);
        circuit.record(true);
        circuit.record(false);
        if !circuit.allow() {
            return Err("one failure right after closing must not re-open".to_owned());
        }
        Ok(())
    })
}

#[test]
fn breaker_reopens_on_half_open_failure() -> Result<(), String> {
    run_async_test(async {
        let circuit = Circuit::new(1, Duration::from_millis(10));
        circuit.record(false);
        tokio::time::sleep(Duration::from_millis(20)).await;
        if !circuit.allow() {
            return Err("should probe half-open".to_owned());
        }
        circuit.record(false);
        if circuit.allow() {
            return Err("half-open failure must re-open the circuit".to_owned());
        }
        Ok(())
    })
}

#[test]
fn open_breaker_short_circuits_without_reaching_transport() -> Result<(), String> {
    run_async_test(async {
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        });
        let circuit = Arc::new(Circuit::new(3, Duration::from_secs(60)));
        let chain = MiddlewareChain::new()
            .with(breaker_middleware(Arc::clone(&circuit)))
            .build(handler.clone());

        let shutdown = Shutdown::new();
        let request = Request::default();

        let mut breaker_open = 0;
        for _ in 0..10 {
            match chain.call(&request, &shutdown).await {
                Err(RequestError::BreakerOpen) => breaker_open += 1,
                Err(_) => {}
                Ok(_) => return Err("stub always fails".to_owned()),
            }
        }

        if handler.calls.load(Ordering::SeqCst) != 3 {
            return Err(format!(
                "transport reached {} times, expected 3",
                handler.calls.load(Ordering::SeqCst)
            ));
        }
        if breaker_open != 7 {
            return Err(format!("expected 7 breaker-open failures, got {}", breaker_open));
        }
        Ok(())
    })
}

// --- retry -----------------------------------------------------------------

#[test]
fn retry_masks_a_transient_failure() -> Result<(), String> {
    run_async_test(async {
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            fail_first: 1,
        });
        let chain = MiddlewareChain::new()
            .with(retry_middleware(1, Duration::from_millis(10)))
            .build(handler.clone());

        let shutdown = Shutdown::new();
        let result = chain.call(&Request::default(), &shutdown).await;
        if result.is_err() {
            return Err("retry should have masked the first failure".to_owned());
        }
        if handler.calls.load(Ordering::SeqCst) != 2 {
            return Err(format!(
                "expected 2 attempts, saw {}",
                handler.calls.load(Ordering::SeqCst)
            ));
        }
        Ok(())
    })
}

#[test]
fn retry_returns_the_last_failure_when_budget_is_spent() -> Result<(), String> {
    run_async_test(async {
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        });
        let chain = MiddlewareChain::new()
            .with(retry_middleware(2, Duration::from_millis(1)))
            .build(handler.clone());

        let result = chain.call(&Request::default(), &Shutdown::new()).await;
        if result.is_ok() {
            return Err("all attempts fail, the last error must surface".to_owned());
        }
        if handler.calls.load(Ordering::SeqCst) != 3 {
            return Err(format!(
                "expected 1 + 2 attempts, saw {}",
                handler.calls.load(Ordering::SeqCst)
            ));
        }
        Ok(())
    })
}

#[test]
fn retry_treats_cancellation_as_terminal() -> Result<(), String> {
    run_async_test(async {
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        });
        let chain = MiddlewareChain::new()
            .with(retry_middleware(5, Duration::from_millis(1)))
            .build(handler.clone());

        let shutdown = Shutdown::new();
        shutdown.trigger();
        let result = chain.call(&Request::default(), &shutdown).await;
        if result.is_ok() {
            return Err("handler always fails".to_owned());
        }
        if handler.calls.load(Ordering::SeqCst) != 1 {
            return Err(format!(
                "cancelled run must not retry, saw {} attempts",
                handler.calls.load(Ordering::SeqCst)
            ));
        }
        Ok(())
    })
}

// --- verify middleware -----------------------------------------------------

#[test]
fn verify_failure_preserves_the_response() -> Result<(), String> {
    run_async_test(async {
        let client = StubClient::new(Box::new(|request| {
            let mut response = Response::echo_of(request);
            response.status_code = 500;
            response.duration = Duration::from_millis(1);
            Ok(response)
        }));
        let chain = MiddlewareChain::new()
            .with(verify_middleware(VerifyConfig {
                kind: VerifyKind::StatusCode,
                expect: serde_json::json!(200),
                ..VerifyConfig::default()
            }))
            .build(Arc::new(TransportHandler::new(client as SharedClient)));

        match chain.call(&Request::default(), &Shutdown::new()).await {
            Err(RequestError::Verification { response, .. }) => {
                if response.status_code != 500 {
                    return Err("response lost in the verification error".to_owned());
                }
                if response.verifications.len() != 1 {
                    return Err("verification result not recorded".to_owned());
                }
                Ok(())
            }
            other => Err(format!("expected a verification error, got {:?}", other.is_ok())),
        }
    })
}

// --- pool ------------------------------------------------------------------

fn stub_factory(counter: Arc<AtomicU32>) -> crate::protocol::ClientFactory {
    Arc::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(StubClient::ok_with_body("ok") as SharedClient)
    })
}

#[test]
fn pool_creates_lazily_up_to_capacity_and_reuses() -> Result<(), String> {
    run_async_test(async {
        let created = Arc::new(AtomicU32::new(0));
        let pool = ClientPool::new(stub_factory(Arc::clone(&created)), 2);

        let first = pool.get().await.map_err(|err| err.to_string())?;
        let second = pool.get().await.map_err(|err| err.to_string())?;
        if created.load(Ordering::SeqCst) != 2 {
            return Err("two gets on an empty pool must create twice".to_owned());
        }

        pool.put(first.clone()).await;
        let third = pool.get().await.map_err(|err| err.to_string())?;
        if !Arc::ptr_eq(&first, &third) {
            return Err("idle client must be reused".to_owned());
        }
        if created.load(Ordering::SeqCst) != 2 {
            return Err("reuse must not create".to_owned());
        }

        drop(second);
        Ok(())
    })
}

#[test]
fn pool_get_blocks_until_a_put() -> Result<(), String> {
    run_async_test(async {
        let created = Arc::new(AtomicU32::new(0));
        let pool = Arc::new(ClientPool::new(stub_factory(Arc::clone(&created)), 1));

        let held = pool.get().await.map_err(|err| err.to_string())?;

        let waiter_pool = Arc::clone(&pool);
        let waiter = tokio::spawn(async move { waiter_pool.get().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        if waiter.is_finished() {
            return Err("get must block while the pool is exhausted".to_owned());
        }

        pool.put(held).await;
        let released = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .map_err(|_| "blocked get never resumed".to_owned())
            .and_then(|join| join.map_err(|err| err.to_string()))
            .and_then(|result| result.map_err(|err| err.to_string()))?;
        drop(released);

        if created.load(Ordering::SeqCst) != 1 {
            return Err("the pool must never exceed its capacity".to_owned());
        }
        Ok(())
    })
}

#[test]
fn closed_pool_closes_returned_clients() -> Result<(), String> {
    run_async_test(async {
        let stub = StubClient::ok_with_body("ok");
        let stub_for_factory = Arc::clone(&stub);
        let factory: crate::protocol::ClientFactory =
            Arc::new(move || Ok(Arc::clone(&stub_for_factory) as SharedClient));
        let pool = ClientPool::new(factory, 1);

        let client = pool.get().await.map_err(|err| err.to_string())?;
        pool.close().await;
        pool.put(client).await;

        if !stub.closed.load(Ordering::SeqCst) {
            return Err("surplus client must be closed".to_owned());
        }
        Ok(())
    })
}

// --- selectors -------------------------------------------------------------

fn api(name: &str, url: &str) -> ApiConfig {
    ApiConfig {
        name: name.to_owned(),
        url: Some(url.to_owned()),
        method: Some("GET".to_owned()),
        weight: 1,
        ..ApiConfig::default()
    }
}

fn multi_api_config(apis: Vec<ApiConfig>) -> Config {
    Config {
        apis,
        ..Config::default()
    }
}

#[test]
fn single_config_yields_the_single_selector() -> Result<(), String> {
    let config = Config {
        url: Some("http://one.test/".to_owned()),
        ..Config::default()
    };
    let selector = ApiSelector::from_config(&config).map_err(|err| err.to_string())?;
    if !matches!(selector, ApiSelector::Single(_)) {
        return Err("expected the single selector".to_owned());
    }
    if selector.next().url != "http://one.test/" {
        return Err("single selector must return the global endpoint".to_owned());
    }
    Ok(())
}

#[test]
fn round_robin_visits_each_api_equally() -> Result<(), String> {
    let config = multi_api_config(vec![
        api("a", "http://t/a"),
        api("b", "http://t/b"),
        api("c", "http://t/c"),
    ]);
    let selector = ApiSelector::from_config(&config).map_err(|err| err.to_string())?;
    if selector.has_dependencies() {
        return Err("no dependencies declared".to_owned());
    }

    let mut counts = std::collections::HashMap::new();
    for _ in 0..9 {
        *counts.entry(selector.next().name).or_insert(0u32) += 1;
    }
    for name in ["a", "b", "c"] {
        if counts.get(name) != Some(&3) {
            return Err(format!("uneven round robin: {:?}", counts));
        }
    }
    Ok(())
}

#[test]
fn weighted_distribution_tracks_the_weights() -> Result<(), String> {
    let mut light = api("light", "http://t/light");
    light.weight = 1;
    let mut heavy = api("heavy", "http://t/heavy");
    heavy.weight = 3;

    let selector =
        ApiSelector::from_config(&multi_api_config(vec![light, heavy])).map_err(|err| err.to_string())?;
    if !matches!(selector, ApiSelector::Weighted { .. }) {
        return Err("expected the weighted selector".to_owned());
    }

    const DRAWS: u32 = 40_000;
    let mut heavy_hits = 0u32;
    for _ in 0..DRAWS {
        if selector.next().name == "heavy" {
            heavy_hits += 1;
        }
    }

    let expected = DRAWS * 3 / 4;
    let tolerance = DRAWS / 20; // ±5%
    if heavy_hits.abs_diff(expected) > tolerance {
        return Err(format!(
            "heavy drawn {} times, expected {}±{}",
            heavy_hits, expected, tolerance
        ));
    }
    Ok(())
}

#[test]
fn construction_rule_prefers_dependency_over_weight() -> Result<(), String> {
    let mut login = api("login", "http://t/login");
    login.extractors = vec![ExtractorSpec {
        name: "token".to_owned(),
        kind: ExtractorKind::Jsonpath,
        jsonpath: Some("$.token".to_owned()),
        ..ExtractorSpec::default()
    }];
    let mut me = api("me", "http://t/me");
    me.weight = 5;
    me.depends_on = vec!["login".to_owned()];

    let selector =
        ApiSelector::from_config(&multi_api_config(vec![login, me])).map_err(|err| err.to_string())?;
    if !selector.has_dependencies() {
        return Err("extractors and depends_on must select dependency mode".to_owned());
    }
    let resolver = selector
        .dependency_resolver()
        .ok_or_else(|| "resolver missing".to_owned())?;
    if resolver.execution_order() != ["login", "me"] {
        return Err(format!("bad order: {:?}", resolver.execution_order()));
    }

    // next() cycles the execution order with a monotonic counter.
    let walk: Vec<String> = (0..4).map(|_| selector.next().name).collect();
    if walk != ["login", "me", "login", "me"] {
        return Err(format!("next() broke the walk: {:?}", walk));
    }
    Ok(())
}

// --- dependency resolver ---------------------------------------------------

#[test]
fn topological_order_covers_every_api() -> Result<(), String> {
    let mut c = api("c", "http://t/c");
    c.depends_on = vec!["b".to_owned()];
    let mut b = api("b", "http://t/b");
    b.depends_on = vec!["a".to_owned()];
    let a = api("a", "http://t/a");

    let resolver = DependencyResolver::new(&[c, b, a]).map_err(|err| err.to_string())?;
    if resolver.execution_order() != ["a", "b", "c"] {
        return Err(format!("bad order: {:?}", resolver.execution_order()));
    }
    Ok(())
}

#[test]
fn dependency_cycle_is_reported() {
    let mut a = api("a", "http://t/a");
    a.depends_on = vec!["b".to_owned()];
    let mut b = api("b", "http://t/b");
    b.depends_on = vec!["a".to_owned()];

    let result = DependencyResolver::new(&[a, b]);
    assert!(matches!(
        result,
        Err(crate::error::ConfigError::CyclicDependency { .. })
    ));
}

#[test]
fn unknown_dependency_is_reported_with_the_dependent() {
    let mut a = api("a", "http://t/a");
    a.depends_on = vec!["ghost".to_owned()];

    match DependencyResolver::new(&[a]) {
        Err(crate::error::ConfigError::UnknownApi { api, dependent }) => {
            assert_eq!(api, "ghost");
            assert_eq!(dependent, "a");
        }
        other => panic!("expected UnknownApi, got {:?}", other.is_ok()),
    }
}

#[test]
fn variable_store_namespaces_by_api() -> Result<(), String> {
    let resolver = DependencyResolver::new(&[api("login", "http://t/login")])
        .map_err(|err| err.to_string())?;

    let mut values = std::collections::BTreeMap::new();
    values.insert("token".to_owned(), "T1".to_owned());
    resolver.store("login", values);

    if resolver.get("login", "token").as_deref() != Some("T1") {
        return Err("stored variable unreadable".to_owned());
    }

    let mut newer = std::collections::BTreeMap::new();
    newer.insert("token".to_owned(), "T2".to_owned());
    resolver.store("login", newer);
    if resolver.get("login", "token").as_deref() != Some("T2") {
        return Err("reads must see the most recent value".to_owned());
    }

    let bindings = resolver.bindings();
    if bindings.get("login.token").map(String::as_str) != Some("T2") {
        return Err(format!("flat copy wrong: {:?}", bindings));
    }
    Ok(())
}

#[test]
fn substitution_is_idempotent_and_literal() -> Result<(), String> {
    let config = multi_api_config(vec![api("a", "http://t/{{.login.token}}")]);
    let selector = ApiSelector::from_config(&config).map_err(|err| err.to_string())?;
    let api_config = selector.next();

    let mut bindings = std::collections::HashMap::new();
    bindings.insert("login.token".to_owned(), "T".to_owned());

    let once = substitute_bindings(&api_config, &bindings);
    if once.url != "http://t/T" {
        return Err(format!("substitution failed: {}", once.url));
    }
    let twice = substitute_bindings(&once, &bindings);
    if twice.url != once.url {
        return Err("substitution must be idempotent".to_owned());
    }
    Ok(())
}

// --- worker + scheduler ----------------------------------------------------

fn chain_over(client: SharedClient) -> SharedHandler {
    MiddlewareChain::new().build(Arc::new(TransportHandler::new(client)))
}

#[test]
fn scheduler_runs_every_worker_to_its_budget() -> Result<(), String> {
    run_async_test(async {
        let stub = StubClient::ok_with_body("ok");
        let stub_for_factory = Arc::clone(&stub);
        let factory: crate::protocol::ClientFactory =
            Arc::new(move || Ok(Arc::clone(&stub_for_factory) as SharedClient));

        let collector = Arc::new(Collector::new());
        let config = Config {
            url: Some("http://t/".to_owned()),
            ..Config::default()
        };
        let selector = Arc::new(ApiSelector::from_config(&config).map_err(|err| err.to_string())?);
        let pool = Arc::new(ClientPool::new(factory, 4));
        let scheduler = Scheduler::new(
            4,
            10,
            Duration::ZERO,
            pool,
            chain_over(stub as SharedClient),
            Arc::clone(&collector),
            selector,
        );

        scheduler.run(&Shutdown::new()).await.map_err(|err| err.to_string())?;

        let snapshot = collector.snapshot();
        if snapshot.total_requests != 40 {
            return Err(format!("expected 40 outcomes, got {}", snapshot.total_requests));
        }
        if snapshot.total_requests != snapshot.success_requests + snapshot.failed_requests {
            return Err("total must equal success + failed".to_owned());
        }
        Ok(())
    })
}

#[test]
fn one_worker_one_request_records_exactly_one_outcome() -> Result<(), String> {
    run_async_test(async {
        let stub = StubClient::ok_with_body("ok");
        let stub_for_factory = Arc::clone(&stub);
        let factory: crate::protocol::ClientFactory =
            Arc::new(move || Ok(Arc::clone(&stub_for_factory) as SharedClient));

        let collector = Arc::new(Collector::new());
        let config = Config {
            url: Some("http://t/".to_owned()),
            ..Config::default()
        };
        let selector = Arc::new(ApiSelector::from_config(&config).map_err(|err| err.to_string())?);
        let scheduler = Scheduler::new(
            1,
            1,
            Duration::ZERO,
            Arc::new(ClientPool::new(factory, 1)),
            chain_over(stub as SharedClient),
            Arc::clone(&collector),
            selector,
        );

        scheduler.run(&Shutdown::new()).await.map_err(|err| err.to_string())?;
        if collector.snapshot().total_requests != 1 {
            return Err(format!(
                "expected exactly one outcome, got {}",
                collector.snapshot().total_requests
            ));
        }
        Ok(())
    })
}

#[test]
fn cancellation_stops_unbounded_workers_without_synthetic_outcomes() -> Result<(), String> {
    run_async_test(async {
        let stub = StubClient::ok_with_body("ok");
        let collector = Arc::new(Collector::new());
        let config = Config {
            url: Some("http://t/".to_owned()),
            ..Config::default()
        };
        let selector = Arc::new(ApiSelector::from_config(&config).map_err(|err| err.to_string())?);
        let progress = Arc::new(ProgressTracker::new(0, 1, Arc::clone(&collector)));

        let worker = Worker::new(
            0,
            Arc::clone(&stub) as SharedClient,
            chain_over(Arc::clone(&stub) as SharedClient),
            Arc::clone(&collector),
            selector,
            0,
            progress,
        );

        let shutdown = Shutdown::new();
        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            stopper.trigger();
        });

        tokio::time::timeout(Duration::from_secs(5), worker.run(&shutdown))
            .await
            .map_err(|_| "worker ignored the cancellation".to_owned())?
            .map_err(|err| err.to_string())?;

        let snapshot = collector.snapshot();
        if snapshot.total_requests == 0 {
            return Err("worker should have recorded some outcomes".to_owned());
        }
        if snapshot.total_requests != snapshot.success_requests + snapshot.failed_requests {
            return Err("total must equal success + failed".to_owned());
        }
        Ok(())
    })
}

#[test]
fn dependency_chain_feeds_extracted_variables_forward() -> Result<(), String> {
    run_async_test(async {
        let stub = StubClient::new(Box::new(|request| {
            let mut response = Response::echo_of(request);
            response.duration = Duration::from_millis(1);
            if request.url.ends_with("/login") {
                response.status_code = 200;
                response.body = br#"{"token":"T"}"#.to_vec();
            } else {
                let authorized = request
                    .headers
                    .get("Authorization")
                    .is_some_and(|value| value == "Bearer T");
                response.status_code = if authorized { 200 } else { 401 };
                response.body = b"{}".to_vec();
            }
            Ok(response)
        }));

        let mut login = api("login", "http://t/login");
        login.extractors = vec![ExtractorSpec {
            name: "token".to_owned(),
            kind: ExtractorKind::Jsonpath,
            jsonpath: Some("$.token".to_owned()),
            ..ExtractorSpec::default()
        }];
        let mut me = api("me", "http://t/me");
        me.depends_on = vec!["login".to_owned()];
        me.headers.insert(
            "Authorization".to_owned(),
            "Bearer {{.login.token}}".to_owned(),
        );
        me.verify = vec![VerifyConfig {
            kind: VerifyKind::StatusCode,
            expect: serde_json::json!(200),
            ..VerifyConfig::default()
        }];

        let collector = Arc::new(Collector::new());
        let selector = Arc::new(
            ApiSelector::from_config(&multi_api_config(vec![login, me]))
                .map_err(|err| err.to_string())?,
        );
        let progress = Arc::new(ProgressTracker::new(0, 2, Arc::clone(&collector)));

        // Two workers, four iterations each, two endpoints per iteration.
        let shutdown = Shutdown::new();
        let mut handles = Vec::new();
        for id in 0..2 {
            let worker = Worker::new(
                id,
                Arc::clone(&stub) as SharedClient,
                chain_over(Arc::clone(&stub) as SharedClient),
                Arc::clone(&collector),
                Arc::clone(&selector),
                4,
                Arc::clone(&progress),
            );
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move { worker.run(&shutdown).await }));
        }
        for handle in handles {
            handle
                .await
                .map_err(|err| err.to_string())?
                .map_err(|err| err.to_string())?;
        }

        let snapshot = collector.snapshot();
        if snapshot.total_requests != 16 {
            return Err(format!("expected 16 outcomes, got {}", snapshot.total_requests));
        }
        if snapshot.failed_requests != 0 {
            return Err(format!(
                "every me call must carry the extracted token; {} failed",
                snapshot.failed_requests
            ));
        }

        for request in stub.recorded() {
            if request.url.ends_with("/me")
                && request.headers.get("Authorization").map(String::as_str) != Some("Bearer T")
            {
                return Err(format!(
                    "unsubstituted me request: {:?}",
                    request.headers.get("Authorization")
                ));
            }
        }
        Ok(())
    })
}

#[test]
fn breaker_open_failures_are_recorded_as_outcomes() -> Result<(), String> {
    run_async_test(async {
        let stub = StubClient::new(Box::new(|request| Err(transport_error(request))));
        let circuit = Arc::new(Circuit::new(3, Duration::from_secs(60)));
        let handler = MiddlewareChain::new()
            .with(breaker_middleware(circuit))
            .build(Arc::new(TransportHandler::new(
                Arc::clone(&stub) as SharedClient
            )));

        let collector = Arc::new(Collector::new());
        let config = Config {
            url: Some("http://t/".to_owned()),
            ..Config::default()
        };
        let selector = Arc::new(ApiSelector::from_config(&config).map_err(|err| err.to_string())?);
        let progress = Arc::new(ProgressTracker::new(10, 1, Arc::clone(&collector)));

        let worker = Worker::new(
            0,
            Arc::clone(&stub) as SharedClient,
            handler,
            Arc::clone(&collector),
            selector,
            10,
            progress,
        );
        worker.run(&Shutdown::new()).await.map_err(|err| err.to_string())?;

        let snapshot = collector.snapshot();
        if snapshot.total_requests != 10 || snapshot.failed_requests != 10 {
            return Err(format!(
                "expected 10 failures, got {}/{}",
                snapshot.failed_requests, snapshot.total_requests
            ));
        }
        if stub.recorded().len() != 3 {
            return Err(format!(
                "transport must only see the first 3 calls, saw {}",
                stub.recorded().len()
            ));
        }

        let errors = collector.errors();
        let breaker_open = errors
            .iter()
            .filter(|(message, _)| message.contains("circuit breaker open"))
            .map(|(_, count)| *count)
            .sum::<u64>();
        if breaker_open != 7 {
            return Err(format!("expected 7 breaker-open outcomes, got {}", breaker_open));
        }
        Ok(())
    })
}

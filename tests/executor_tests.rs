mod common;

use common::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use webapi_client::core::kernel::{ExecutorConfig, RequestExecutor};
use webapi_client::{AccessToken, ClientError, ClientEvent};

const QUOTA_SLEEP: Duration = Duration::from_secs(5);
const TIMEOUT: Duration = Duration::from_secs(10);

fn executor(transport: Arc<ScriptedTransport>) -> RequestExecutor<ScriptedTransport> {
    RequestExecutor::new(
        transport,
        ExecutorConfig {
            quota_sleep: QUOTA_SLEEP,
            max_attempts: 5,
        },
    )
}

fn token() -> AccessToken {
    AccessToken::new("tok==")
}

fn quote_url() -> reqwest::Url {
    url("https://api.example.com/v2/data/quote/MSFT")
}

fn drain(rx: &mut broadcast::Receiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn test_quota_then_success_sleeps_once_and_resends() {
    let transport = ScriptedTransport::new();
    transport.respond(Err(quota(&quote_url())));
    transport.respond(Ok(QUOTE_MSFT));
    let exec = executor(Arc::clone(&transport));
    let mut events = exec.subscribe();

    let start = Instant::now();
    let body = exec.get(quote_url(), &token(), TIMEOUT).await.unwrap();

    assert_eq!(body, QUOTE_MSFT);
    assert_eq!(start.elapsed(), QUOTA_SLEEP);
    assert_eq!(transport.request_count(), 2);
    assert_eq!(
        drain(&mut events),
        vec![
            ClientEvent::QuotaExceeded { uri: quote_url() },
            ClientEvent::MessageResent { uri: quote_url() },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_quota_on_resend_reports_again_and_keeps_trying() {
    let transport = ScriptedTransport::new();
    transport.respond(Err(quota(&quote_url())));
    transport.respond(Err(quota(&quote_url())));
    transport.respond(Ok(QUOTE_MSFT));
    let exec = executor(Arc::clone(&transport));
    let mut events = exec.subscribe();

    let start = Instant::now();
    let body = exec.get(quote_url(), &token(), TIMEOUT).await.unwrap();

    assert_eq!(body, QUOTE_MSFT);
    assert_eq!(start.elapsed(), QUOTA_SLEEP);
    assert_eq!(transport.request_count(), 3);
    assert_eq!(
        drain(&mut events),
        vec![
            ClientEvent::QuotaExceeded { uri: quote_url() },
            ClientEvent::QuotaExceeded { uri: quote_url() },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_timeouts_exhaust_attempts_and_return_empty() {
    let transport = ScriptedTransport::new();
    for _ in 0..5 {
        transport.respond(Err(timed_out(&quote_url())));
    }
    let exec = executor(Arc::clone(&transport));
    let mut events = exec.subscribe();

    let body = exec.get(quote_url(), &token(), TIMEOUT).await.unwrap();

    assert!(body.is_empty());
    assert_eq!(transport.request_count(), 5);
    let events = drain(&mut events);
    assert_eq!(events.len(), 5);
    assert!(events
        .iter()
        .all(|e| *e == ClientEvent::Timeout { uri: quote_url() }));
}

#[tokio::test(start_paused = true)]
async fn test_timeout_then_success_retries() {
    let transport = ScriptedTransport::new();
    transport.respond(Err(timed_out(&quote_url())));
    transport.respond(Ok(QUOTE_MSFT));
    let exec = executor(Arc::clone(&transport));
    let mut events = exec.subscribe();

    let body = exec.get(quote_url(), &token(), TIMEOUT).await.unwrap();

    assert_eq!(body, QUOTE_MSFT);
    assert_eq!(transport.request_count(), 2);
    assert_eq!(
        drain(&mut events),
        vec![ClientEvent::Timeout { uri: quote_url() }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_empty_bodies_are_retried_up_to_max_attempts() {
    let transport = ScriptedTransport::new();
    let exec = RequestExecutor::new(
        Arc::clone(&transport),
        ExecutorConfig {
            quota_sleep: QUOTA_SLEEP,
            max_attempts: 3,
        },
    );

    let body = exec.get(quote_url(), &token(), TIMEOUT).await.unwrap();

    assert!(body.is_empty());
    assert_eq!(transport.request_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_symbol_not_found_is_reported_not_raised() {
    let search = url("https://api.example.com/v2/data/symbols/search/c=EQ&r=XYZ");
    let transport = ScriptedTransport::new();
    transport.respond(Err(status(404, "", &search)));
    let exec = executor(Arc::clone(&transport));
    let mut events = exec.subscribe();

    let body = exec.get(search, &token(), TIMEOUT).await.unwrap();

    assert!(body.is_empty());
    assert_eq!(
        drain(&mut events),
        vec![ClientEvent::SymbolNotFound {
            symbol: "XYZ".to_string()
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_keep_alive_failure_is_reported_and_retried() {
    let transport = ScriptedTransport::new();
    transport.respond(Err(disconnected(&quote_url())));
    transport.respond(Ok(QUOTE_MSFT));
    let exec = executor(Arc::clone(&transport));
    let mut events = exec.subscribe();

    let body = exec.get(quote_url(), &token(), TIMEOUT).await.unwrap();

    assert_eq!(body, QUOTE_MSFT);
    assert_eq!(
        drain(&mut events),
        vec![ClientEvent::KeepAliveFailure { uri: quote_url() }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_non_recoverable_failures_propagate_immediately() {
    let cases = [
        (status(401, "denied", &quote_url()), "unauthorized"),
        (
            status(400, r#"{"Message":"bad","StatusCode":400}"#, &quote_url()),
            "bad request",
        ),
        (status(500, "boom", &quote_url()), "protocol"),
    ];

    for (failure, name) in cases {
        let transport = ScriptedTransport::new();
        transport.respond(Err(failure));
        let exec = executor(Arc::clone(&transport));
        let mut events = exec.subscribe();

        let err = exec
            .get(quote_url(), &token(), TIMEOUT)
            .await
            .unwrap_err();

        let matched = match name {
            "unauthorized" => matches!(err, ClientError::Unauthorized { .. }),
            "bad request" => matches!(err, ClientError::BadRequest(_)),
            _ => matches!(err, ClientError::Protocol { .. }),
        };
        assert!(matched, "{}: {:?}", name, err);
        assert_eq!(transport.request_count(), 1, "{}", name);
        assert!(drain(&mut events).is_empty(), "{}", name);
    }
}

#[tokio::test(start_paused = true)]
async fn test_failure_on_resend_propagates() {
    let transport = ScriptedTransport::new();
    transport.respond(Err(quota(&quote_url())));
    transport.respond(Err(status(401, "denied", &quote_url())));
    let exec = executor(Arc::clone(&transport));

    let err = exec
        .get(quote_url(), &token(), TIMEOUT)
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Unauthorized { .. }));
    assert_eq!(transport.request_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_sleep_gate_holds_back_other_callers() {
    let transport = ScriptedTransport::new();
    transport.respond(Err(quota(&quote_url())));
    transport.respond(Ok(QUOTE_MSFT));
    transport.respond(Ok(QUOTE_MSFT));
    let exec = Arc::new(executor(Arc::clone(&transport)));

    let first = {
        let exec = Arc::clone(&exec);
        tokio::spawn(async move { exec.get(quote_url(), &token(), TIMEOUT).await })
    };

    while exec.sleep_gate().deadline().is_none() {
        tokio::task::yield_now().await;
    }

    let start = Instant::now();
    let second = exec.get(quote_url(), &token(), TIMEOUT).await.unwrap();
    assert!(start.elapsed() >= QUOTA_SLEEP);
    assert_eq!(second, QUOTE_MSFT);
    assert_eq!(first.await.unwrap().unwrap(), QUOTE_MSFT);
    assert_eq!(transport.request_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_post_follows_retry_policy() {
    let orders = url("https://api.example.com/v2/orders");
    let transport = ScriptedTransport::new();
    transport.respond(Err(quota(&orders)));
    transport.respond(Ok(r#"[{"OrderID":"1"}]"#));
    let exec = executor(Arc::clone(&transport));

    let body = exec
        .post(orders, &token(), r#"{"Symbol":"MSFT"}"#, TIMEOUT)
        .await
        .unwrap();

    assert_eq!(body, r#"[{"OrderID":"1"}]"#);
    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].body.as_deref(), Some(r#"{"Symbol":"MSFT"}"#));
    assert!(requests[1].has_header("Content-Type"));
}

#[tokio::test(start_paused = true)]
async fn test_put_and_delete_are_sent_once() {
    let order = url("https://api.example.com/v2/orders/42");
    let transport = ScriptedTransport::new();
    transport.respond(Err(timed_out(&order)));
    transport.respond(Err(quota(&order)));
    let exec = executor(Arc::clone(&transport));
    let mut events = exec.subscribe();

    let put = exec.put(order.clone(), &token(), "{}", TIMEOUT).await;
    assert!(matches!(put, Err(ClientError::Timeout { .. })));

    let delete = exec.delete(order, &token(), TIMEOUT).await;
    assert!(matches!(delete, Err(ClientError::QuotaExceeded { .. })));

    assert_eq!(transport.request_count(), 2);
    assert!(drain(&mut events).is_empty());
    assert!(exec.sleep_gate().deadline().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_expired_token_is_reported_once_per_call() {
    let transport = ScriptedTransport::new();
    transport.respond(Err(timed_out(&quote_url())));
    transport.respond(Ok(QUOTE_MSFT));
    let exec = executor(Arc::clone(&transport));
    let mut events = exec.subscribe();

    let expired = token()
        .with_expires_in(60)
        .with_issued_at(chrono::Utc::now() - chrono::Duration::seconds(600));
    let body = exec.get(quote_url(), &expired, TIMEOUT).await.unwrap();

    assert_eq!(body, QUOTE_MSFT);
    let events = drain(&mut events);
    assert_eq!(events[0], ClientEvent::AccessTokenExpired);
    assert_eq!(
        events
            .iter()
            .filter(|e| **e == ClientEvent::AccessTokenExpired)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_requests_carry_authorization_and_accept() {
    let transport = ScriptedTransport::new();
    transport.respond(Ok(QUOTE_MSFT));
    let exec = executor(Arc::clone(&transport));

    exec.get(quote_url(), &token(), TIMEOUT).await.unwrap();

    let request = &transport.requests()[0];
    assert_eq!(request.method, reqwest::Method::GET);
    assert_eq!(request.timeout, TIMEOUT);
    assert!(request
        .headers
        .contains(&("Authorization".to_string(), "tok==".to_string())));
    assert!(request
        .headers
        .contains(&("Accept".to_string(), "application/JSON".to_string())));
}

#[tokio::test]
async fn test_empty_token_rejected_before_io() {
    let transport = ScriptedTransport::new();
    let exec = executor(Arc::clone(&transport));

    let err = exec
        .get(quote_url(), &AccessToken::new(""), TIMEOUT)
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::InvalidParameters(_)));
    assert_eq!(transport.request_count(), 0);
}

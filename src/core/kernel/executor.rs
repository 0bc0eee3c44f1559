use crate::core::errors::ClientError;
use crate::core::events::{ClientEvent, EventBus};
use crate::core::kernel::classify::classify;
use crate::core::kernel::transport::{HttpTransport, RequestContext};
use crate::core::types::{AcceptType, AccessToken};
use parking_lot::Mutex;
use reqwest::{Method, Url};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, instrument, warn};

const CONTENT_TYPE_JSON: &str = "application/JSON";

/// Shared "do not send before" deadline for every caller of one executor.
///
/// A quota violation on any caller pushes the deadline out; every caller
/// waits for it before its next request.
#[derive(Debug, Default)]
pub struct SleepGate {
    until: Mutex<Option<Instant>>,
}

impl SleepGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push the deadline to `now + period` unless it already lies further out.
    /// Returns the deadline in force.
    pub fn defer_for(&self, period: Duration) -> Instant {
        let candidate = Instant::now() + period;
        let mut until = self.until.lock();
        let deadline = until.map_or(candidate, |current| current.max(candidate));
        *until = Some(deadline);
        deadline
    }

    pub fn deadline(&self) -> Option<Instant> {
        *self.until.lock()
    }

    /// Suspend until no future deadline remains; returns immediately if there is none.
    ///
    /// The deadline is re-read after every sleep, so a quota violation raised
    /// while this caller waits extends its wait.
    pub async fn wait(&self) {
        while let Some(deadline) = self.deadline() {
            let now = Instant::now();
            if deadline <= now {
                break;
            }
            debug!(
                remaining_ms = (deadline - now).as_millis() as u64,
                "Waiting on quota sleep gate"
            );
            sleep_until(deadline).await;
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// Back-off applied to every caller after a quota violation
    pub quota_sleep: Duration,
    /// Attempts made while a GET/POST keeps producing an empty body
    pub max_attempts: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            quota_sleep: crate::core::config::DEFAULT_QUOTA_SLEEP,
            max_attempts: crate::core::config::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Issues authorized requests and recovers from quota, timeout and
/// symbol-not-found conditions.
///
/// GET and POST run through the retry policy: timeouts, unknown symbols and
/// dropped keep-alive connections become notifications plus an empty
/// attempt, a quota violation sleeps and resends once, and the whole
/// sequence repeats while the body stays empty, up to `max_attempts`.
/// PUT and DELETE are sent once and surface every classified failure.
///
/// An empty `Ok` body means "no data this time", not "no such data".
pub struct RequestExecutor<T: HttpTransport> {
    transport: Arc<T>,
    gate: SleepGate,
    events: EventBus<ClientEvent>,
    config: ExecutorConfig,
}

impl<T: HttpTransport> std::fmt::Debug for RequestExecutor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("config", &self.config)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl<T: HttpTransport> RequestExecutor<T> {
    pub fn new(transport: Arc<T>, config: ExecutorConfig) -> Self {
        Self {
            transport,
            gate: SleepGate::new(),
            events: EventBus::new(),
            config,
        }
    }

    /// Publish notifications on an existing bus instead of a private one
    #[must_use]
    pub fn with_events(mut self, events: EventBus<ClientEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus<ClientEvent> {
        &self.events
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn sleep_gate(&self) -> &SleepGate {
        &self.gate
    }

    pub const fn config(&self) -> ExecutorConfig {
        self.config
    }

    pub async fn get(
        &self,
        uri: Url,
        token: &AccessToken,
        timeout: Duration,
    ) -> Result<String, ClientError> {
        self.get_accepting(uri, token, timeout, AcceptType::Json).await
    }

    #[instrument(skip(self, token), fields(method = "GET", url = %uri))]
    pub async fn get_accepting(
        &self,
        uri: Url,
        token: &AccessToken,
        timeout: Duration,
        accept: AcceptType,
    ) -> Result<String, ClientError> {
        let request = authorized(Method::GET, uri, token, timeout, accept)?;
        self.check_token(token);
        self.send_with_retry(&request).await
    }

    #[instrument(skip(self, token, body), fields(method = "POST", url = %uri))]
    pub async fn post(
        &self,
        uri: Url,
        token: &AccessToken,
        body: impl Into<String> + Send,
        timeout: Duration,
    ) -> Result<String, ClientError> {
        let request = authorized(Method::POST, uri, token, timeout, AcceptType::Json)?
            .with_header("Content-Type", CONTENT_TYPE_JSON)
            .with_body(body);
        self.check_token(token);
        self.send_with_retry(&request).await
    }

    #[instrument(skip(self, token, body), fields(method = "PUT", url = %uri))]
    pub async fn put(
        &self,
        uri: Url,
        token: &AccessToken,
        body: impl Into<String> + Send,
        timeout: Duration,
    ) -> Result<String, ClientError> {
        let request = authorized(Method::PUT, uri, token, timeout, AcceptType::Json)?
            .with_header("Content-Type", CONTENT_TYPE_JSON)
            .with_body(body);
        self.send_once(&request).await
    }

    #[instrument(skip(self, token), fields(method = "DELETE", url = %uri))]
    pub async fn delete(
        &self,
        uri: Url,
        token: &AccessToken,
        timeout: Duration,
    ) -> Result<String, ClientError> {
        let request = authorized(Method::DELETE, uri, token, timeout, AcceptType::Json)?
            .with_header("Content-Type", CONTENT_TYPE_JSON);
        self.send_once(&request).await
    }

    /// One exchange, classified, with no retry and no sleep gate
    pub async fn send_once(&self, request: &RequestContext) -> Result<String, ClientError> {
        self.transport.execute(request).await.map_err(classify)
    }

    /// Run the retry policy for an already-built request
    pub async fn send_with_retry(&self, request: &RequestContext) -> Result<String, ClientError> {
        let mut body = String::new();

        for attempt in 1..=self.config.max_attempts.max(1) {
            self.gate.wait().await;
            debug!(attempt, "Sending request");

            match self.send_once(request).await {
                Ok(text) => body = text,
                Err(ClientError::QuotaExceeded { .. }) => {
                    body = self.resend_after_quota(request).await?;
                }
                Err(ClientError::Timeout { .. }) => {
                    warn!(attempt, url = %request.url, "Request timed out");
                    self.events.publish(ClientEvent::Timeout {
                        uri: request.url.clone(),
                    });
                }
                Err(ClientError::SymbolNotFound { symbol }) => {
                    debug!(%symbol, "Symbol not found");
                    self.events.publish(ClientEvent::SymbolNotFound { symbol });
                }
                Err(ClientError::KeepAliveFailure { .. }) => {
                    warn!(attempt, url = %request.url, "Keep-alive connection dropped");
                    self.events.publish(ClientEvent::KeepAliveFailure {
                        uri: request.url.clone(),
                    });
                }
                Err(e) => return Err(e),
            }

            if !body.is_empty() {
                break;
            }
        }

        Ok(body)
    }

    async fn resend_after_quota(&self, request: &RequestContext) -> Result<String, ClientError> {
        let period = self.config.quota_sleep;
        self.gate.defer_for(period);
        warn!(
            url = %request.url,
            sleep_ms = period.as_millis() as u64,
            "Quota exceeded, sleeping before resend"
        );
        self.events.publish(ClientEvent::QuotaExceeded {
            uri: request.url.clone(),
        });

        sleep(period).await;

        match self.send_once(request).await {
            Ok(text) => {
                self.events.publish(ClientEvent::MessageResent {
                    uri: request.url.clone(),
                });
                Ok(text)
            }
            Err(ClientError::QuotaExceeded { .. }) => {
                warn!(url = %request.url, "Quota still exceeded after resend");
                self.events.publish(ClientEvent::QuotaExceeded {
                    uri: request.url.clone(),
                });
                Ok(String::new())
            }
            Err(e) => Err(e),
        }
    }

    fn check_token(&self, token: &AccessToken) {
        if token.is_expired() {
            warn!("Access token has expired");
            self.events.publish(ClientEvent::AccessTokenExpired);
        }
    }
}

fn authorized(
    method: Method,
    uri: Url,
    token: &AccessToken,
    timeout: Duration,
    accept: AcceptType,
) -> Result<RequestContext, ClientError> {
    if token.token().is_empty() {
        return Err(ClientError::InvalidParameters(
            "Access token cannot be empty".to_string(),
        ));
    }

    Ok(RequestContext::new(method, uri, timeout)
        .with_header("Authorization", token.token())
        .with_header("Accept", accept.as_str()))
}

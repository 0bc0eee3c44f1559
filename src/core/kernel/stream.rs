use crate::core::config::{DEFAULT_STREAM_CONNECT_TIMEOUT, DEFAULT_STREAM_READ_TIMEOUT};
use crate::core::errors::ClientError;
use crate::core::events::{StreamEvent, StreamSubscribers};
use crate::core::kernel::classify::classify;
use crate::core::kernel::codec::{StreamCodec, StreamRecord};
use crate::core::kernel::transport::{HttpTransport, RequestContext};
use crate::core::types::{AccessToken, ListenerState, ListenerStatus};
use chrono::Utc;
use parking_lot::Mutex;
use reqwest::{Method, Url};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

/// Timeouts applied by a listener's worker
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// Bound on establishing the connection and receiving response headers
    pub connect_timeout: Duration,
    /// Longest silence tolerated between two lines once connected
    pub read_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_STREAM_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_STREAM_READ_TIMEOUT,
        }
    }
}

/// What one `start` call should stream
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub url: Url,
    /// Raise `BarsBackQuotaReached` once this many records have been delivered
    pub record_limit: Option<u32>,
}

impl StreamRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            record_limit: None,
        }
    }

    #[must_use]
    pub fn with_record_limit(mut self, limit: u32) -> Self {
        self.record_limit = Some(limit);
        self
    }
}

struct WorkerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Long-lived streaming connection driven by one background worker.
///
/// State moves `Stopped -> Running -> Stopping -> Stopped`. Starting a new
/// stream first drains the previous worker, so at most one connection per
/// listener is ever `Running`. Records and notifications reach each subscriber
/// through its own bounded queue; a full queue pauses the worker.
pub struct StreamListener<C: StreamCodec, T: HttpTransport> {
    shared: Arc<Shared<C, T>>,
    worker: Mutex<Option<WorkerHandle>>,
    start_lock: tokio::sync::Mutex<()>,
}

struct Shared<C: StreamCodec, T: HttpTransport> {
    transport: Arc<T>,
    codec: C,
    token: Arc<AccessToken>,
    config: StreamConfig,
    state: watch::Sender<ListenerState>,
    events: StreamSubscribers<StreamEvent<C::Record>>,
    connected_server: Mutex<Option<String>>,
    records_received: AtomicU32,
}

impl<C: StreamCodec, T: HttpTransport> std::fmt::Debug for StreamListener<C, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamListener")
            .field("state", &self.state())
            .field("connected_server", &self.connected_server())
            .field("records_received", &self.records_received())
            .finish_non_exhaustive()
    }
}

impl<C: StreamCodec, T: HttpTransport> StreamListener<C, T> {
    /// Create a stopped listener. `token` is the credential snapshot used for
    /// every connection this listener opens.
    pub fn new(transport: Arc<T>, codec: C, token: Arc<AccessToken>, config: StreamConfig) -> Self {
        let (state, _) = watch::channel(ListenerState::default());
        Self {
            shared: Arc::new(Shared {
                transport,
                codec,
                token,
                config,
                state,
                events: StreamSubscribers::new(),
                connected_server: Mutex::new(None),
                records_received: AtomicU32::new(0),
            }),
            worker: Mutex::new(None),
            start_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Queue receiving every event published after this call
    pub fn subscribe(&self) -> mpsc::Receiver<StreamEvent<C::Record>> {
        self.shared.events.subscribe()
    }

    /// Receiver that observes every state transition
    pub fn watch_state(&self) -> watch::Receiver<ListenerState> {
        self.shared.state.subscribe()
    }

    pub fn state(&self) -> ListenerState {
        *self.shared.state.borrow()
    }

    pub fn status(&self) -> ListenerStatus {
        self.state().status
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    /// Node that served the most recent connection (`?` if it did not say)
    pub fn connected_server(&self) -> Option<String> {
        self.shared.connected_server.lock().clone()
    }

    /// Records delivered on the current (or last) connection
    pub fn records_received(&self) -> u32 {
        self.shared.records_received.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> StreamConfig {
        self.shared.config
    }

    /// Replace any active stream with `request`.
    ///
    /// Returns once the previous worker (if any) has settled to `Stopped` and
    /// the new worker has been spawned. Connection outcome is reported through
    /// state changes and events, not through the return value.
    pub async fn start(&self, request: StreamRequest) -> Result<(), ClientError> {
        if self.shared.token.token().is_empty() {
            return Err(ClientError::InvalidParameters(
                "Access token cannot be empty".to_string(),
            ));
        }

        let _serialized = self.start_lock.lock().await;
        self.drain().await;

        let cancel = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let worker_cancel = cancel.clone();
        let span = info_span!("stream_worker", url = %request.url);

        let join = tokio::spawn(
            async move {
                if let Err(err) = shared.run(request, &worker_cancel).await {
                    error!(error = %err, "Stream worker failed");
                    shared
                        .emit(StreamEvent::Failed(Arc::new(err)), &worker_cancel)
                        .await;
                }
            }
            .instrument(span),
        );

        *self.worker.lock() = Some(WorkerHandle { cancel, join });
        Ok(())
    }

    /// Ask the worker to stop. Does not wait; the state reaches `Stopped`
    /// once the worker has released its connection.
    pub fn stop(&self) {
        self.shared.state.send_if_modified(|state| {
            if state.status == ListenerStatus::Running {
                state.status = ListenerStatus::Stopping;
                true
            } else {
                false
            }
        });

        if let Some(worker) = self.worker.lock().as_ref() {
            worker.cancel.cancel();
        }
    }

    /// Stop and wait until the worker has exited
    pub async fn shutdown(&self) {
        let _serialized = self.start_lock.lock().await;
        self.drain().await;
    }

    async fn drain(&self) {
        self.stop();

        let previous = self.worker.lock().take();
        if let Some(worker) = previous {
            if let Err(e) = worker.join.await {
                warn!(error = %e, "Stream worker ended abnormally");
            }
        }

        let mut state = self.shared.state.subscribe();
        let _ = state
            .wait_for(|s| s.status == ListenerStatus::Stopped)
            .await;
    }
}

impl<C: StreamCodec, T: HttpTransport> Drop for StreamListener<C, T> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.cancel.cancel();
        }
    }
}

/// Forces the state back to `Stopped` however the worker exits
struct SettleOnExit<'a>(&'a watch::Sender<ListenerState>);

impl Drop for SettleOnExit<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|state| {
            state.status = ListenerStatus::Stopped;
            state.connected_at = None;
        });
    }
}

impl<C: StreamCodec, T: HttpTransport> Shared<C, T> {
    async fn run(&self, request: StreamRequest, cancel: &CancellationToken) -> Result<(), ClientError> {
        let _settle = SettleOnExit(&self.state);

        let ctx = RequestContext::new(Method::GET, request.url.clone(), self.config.connect_timeout)
            .with_header("Authorization", self.token.token())
            .with_header("Connection", "keep-alive");

        let connecting = tokio::time::timeout(ctx.timeout, self.transport.open_stream(&ctx));
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Cancelled while connecting");
                return Ok(());
            }
            outcome = connecting => outcome,
        };

        let mut connection = match outcome {
            Err(_elapsed) => {
                self.timed_out(&request.url, cancel).await;
                return Ok(());
            }
            Ok(Err(failure)) => match classify(failure) {
                ClientError::Timeout { .. } => {
                    self.timed_out(&request.url, cancel).await;
                    return Ok(());
                }
                err => return Err(err),
            },
            Ok(Ok(connection)) => connection,
        };

        self.records_received.store(0, Ordering::SeqCst);
        *self.connected_server.lock() = Some(connection.server_name.clone());
        self.state.send_modify(|state| {
            state.status = ListenerStatus::Running;
            state.connected_at = Some(Utc::now());
        });
        info!(server = %connection.server_name, "Stream running");

        loop {
            if !self.state.borrow().is_running() {
                break;
            }

            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                next = tokio::time::timeout(self.config.read_timeout, connection.lines.next_line()) => next,
            };

            let line = match next {
                Err(_elapsed) => {
                    self.timed_out(&request.url, cancel).await;
                    break;
                }
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => {
                    debug!("Stream closed by server");
                    break;
                }
                Ok(Err(failure)) => match classify(failure) {
                    ClientError::Timeout { .. } => {
                        self.timed_out(&request.url, cancel).await;
                        break;
                    }
                    err => return Err(err),
                },
            };

            match self.codec.decode(&line) {
                StreamRecord::End => {
                    debug!("End of stream marker received");
                    self.state
                        .send_modify(|state| state.status = ListenerStatus::Stopping);
                    break;
                }
                StreamRecord::Undecodable => trace!(%line, "Ignoring undecodable line"),
                StreamRecord::Payload(record) => {
                    if !self.deliver(record, request.record_limit, cancel).await {
                        break;
                    }
                }
            }
        }

        debug!(records = self.records_received.load(Ordering::SeqCst), "Stream worker exiting");
        Ok(())
    }

    /// Publish to every subscriber. Returns `false` if cancelled first.
    async fn emit(&self, event: StreamEvent<C::Record>, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            () = cancel.cancelled() => false,
            () = self.events.publish(event) => true,
        }
    }

    async fn deliver(&self, record: C::Record, limit: Option<u32>, cancel: &CancellationToken) -> bool {
        if !self.emit(StreamEvent::Record(record), cancel).await {
            return false;
        }
        let count = self.records_received.fetch_add(1, Ordering::SeqCst) + 1;

        if limit == Some(count) {
            info!(bars = count, "Requested bar count delivered");
            return self
                .emit(StreamEvent::BarsBackQuotaReached { bars: count }, cancel)
                .await;
        }
        true
    }

    async fn timed_out(&self, url: &Url, cancel: &CancellationToken) {
        warn!(%url, "Stream timed out");
        self.emit(StreamEvent::Timeout { uri: url.clone() }, cancel).await;
    }
}

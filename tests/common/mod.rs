#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{StatusCode, Url};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use webapi_client::core::kernel::{
    HttpTransport, LineReader, RequestContext, StreamConnection, TransportFailure,
};
use webapi_client::core::types::{ListenerState, ListenerStatus};

pub const QUOTE_MSFT: &str = r#"{"Symbol":"MSFT","Last":412.5,"Bid":412.4,"Ask":412.6,"Volume":1000}"#;
pub const QUOTE_AAPL: &str = r#"{"Symbol":"AAPL","Last":189.1,"Volume":250}"#;
pub const BAR: &str = r#"{"Open":10,"High":11,"Low":9.5,"Close":10.5,"TotalVolume":1200,"TimeStamp":"/Date(1390510800000)/"}"#;

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

pub fn quota(target: &Url) -> TransportFailure {
    TransportFailure::Status {
        status: StatusCode::FORBIDDEN,
        body: r#"{"Message":"quota exceeded","StatusCode":403}"#.to_string(),
        url: target.clone(),
    }
}

pub fn timed_out(target: &Url) -> TransportFailure {
    TransportFailure::TimedOut {
        url: target.clone(),
    }
}

pub fn status(code: u16, body: &str, target: &Url) -> TransportFailure {
    TransportFailure::Status {
        status: StatusCode::from_u16(code).unwrap(),
        body: body.to_string(),
        url: target.clone(),
    }
}

pub fn disconnected(target: &Url) -> TransportFailure {
    TransportFailure::Disconnected {
        url: target.clone(),
        reason: "connection reset by peer".to_string(),
    }
}

pub enum LineStep {
    Line(String),
    Pause(Duration),
    Fail(TransportFailure),
}

/// One scripted streaming response
pub struct ScriptedStream {
    pub server_name: Option<String>,
    pub connect_delay: Option<Duration>,
    pub connect_failure: Option<TransportFailure>,
    pub steps: Vec<LineStep>,
    /// Keep the connection open once the steps run out
    pub hold_open: bool,
    /// Set when the worker drops the connection
    pub closed: Arc<AtomicBool>,
}

impl ScriptedStream {
    pub fn lines(lines: &[&str]) -> Self {
        Self {
            server_name: None,
            connect_delay: None,
            connect_failure: None,
            steps: lines.iter().map(|l| LineStep::Line((*l).to_string())).collect(),
            hold_open: false,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn failing(failure: TransportFailure) -> Self {
        let mut stream = Self::lines(&[]);
        stream.connect_failure = Some(failure);
        stream
    }

    pub fn server(mut self, name: &str) -> Self {
        self.server_name = Some(name.to_string());
        self
    }

    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }

    pub fn then(mut self, step: LineStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn held_open(mut self) -> Self {
        self.hold_open = true;
        self
    }
}

struct ScriptedLines {
    steps: VecDeque<LineStep>,
    hold_open: bool,
    closed: Arc<AtomicBool>,
}

impl Drop for ScriptedLines {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl LineReader for ScriptedLines {
    async fn next_line(&mut self) -> Result<Option<String>, TransportFailure> {
        loop {
            match self.steps.pop_front() {
                Some(LineStep::Line(line)) => return Ok(Some(line)),
                Some(LineStep::Pause(delay)) => tokio::time::sleep(delay).await,
                Some(LineStep::Fail(failure)) => return Err(failure),
                None if self.hold_open => std::future::pending::<()>().await,
                None => return Ok(None),
            }
        }
    }
}

/// In-memory transport replaying scripted outcomes in order.
///
/// One-shot calls with nothing left in the script answer with an empty body.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<String, TransportFailure>>>,
    streams: Mutex<VecDeque<ScriptedStream>>,
    requests: Mutex<Vec<RequestContext>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, outcome: Result<&str, TransportFailure>) {
        self.responses
            .lock()
            .push_back(outcome.map(str::to_string));
    }

    pub fn stream(&self, stream: ScriptedStream) {
        self.streams.lock().push_back(stream);
    }

    pub fn requests(&self) -> Vec<RequestContext> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn record(&self, request: &RequestContext) {
        self.requests.lock().push(request.clone());
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn execute(&self, request: &RequestContext) -> Result<String, TransportFailure> {
        self.record(request);
        let next = self.responses.lock().pop_front();
        next.unwrap_or_else(|| Ok(String::new()))
    }

    async fn open_stream(
        &self,
        request: &RequestContext,
    ) -> Result<StreamConnection, TransportFailure> {
        self.record(request);
        let script = self.streams.lock().pop_front();
        let Some(script) = script else {
            return Err(TransportFailure::Disconnected {
                url: request.url.clone(),
                reason: "no scripted stream".to_string(),
            });
        };

        if let Some(delay) = script.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = script.connect_failure {
            return Err(failure);
        }

        Ok(StreamConnection {
            server_name: script.server_name.unwrap_or_else(|| "?".to_string()),
            lines: Box::new(ScriptedLines {
                steps: script.steps.into_iter().collect(),
                hold_open: script.hold_open,
                closed: script.closed,
            }),
        })
    }
}

/// Wait for the first transition after `rx` was created, then for `Stopped`
pub async fn settled(rx: &mut watch::Receiver<ListenerState>) {
    tokio::time::timeout(Duration::from_secs(3600), async {
        rx.changed().await.unwrap();
        rx.wait_for(|s| s.status == ListenerStatus::Stopped)
            .await
            .map(|_| ())
            .unwrap();
    })
    .await
    .expect("listener did not settle");
}

pub async fn running(rx: &mut watch::Receiver<ListenerState>) {
    tokio::time::timeout(Duration::from_secs(3600), async {
        rx.wait_for(ListenerState::is_running)
            .await
            .map(|_| ())
            .unwrap();
    })
    .await
    .expect("listener never reached Running");
}

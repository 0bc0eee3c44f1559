use crate::core::kernel::headers::translate_headers;
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use reqwest::{Client, ClientBuilder, Method, RequestBuilder, Response, StatusCode, Url};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, trace};

/// Response header naming the node that served a request
pub const SERVER_NAME_HEADER: &str = "X-ServerName";
pub const UNKNOWN_SERVER: &str = "?";

/// Longest line a stream may send before it is treated as broken
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const TCP_KEEPALIVE: Duration = Duration::from_secs(60);

/// One HTTP exchange. Built per call and never shared between calls.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub url: Url,
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
    pub timeout: Duration,
}

impl RequestContext {
    pub fn new(method: Method, url: Url, timeout: Duration) -> Self {
        Self {
            url,
            method,
            headers: Vec::new(),
            body: None,
            timeout,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

/// A failed exchange before classification
#[derive(Debug, Error)]
pub enum TransportFailure {
    #[error("request timed out: {url}")]
    TimedOut { url: Url },

    #[error("HTTP {status} from {url}")]
    Status {
        status: StatusCode,
        body: String,
        url: Url,
    },

    /// The connection was reset or closed before a complete response arrived
    #[error("connection dropped for {url}: {reason}")]
    Disconnected { url: Url, reason: String },

    #[error(transparent)]
    Fatal(reqwest::Error),
}

/// Reads a streaming response body one line at a time
#[async_trait]
pub trait LineReader: Send {
    /// Next line without its terminator, or `None` once the body is exhausted
    async fn next_line(&mut self) -> Result<Option<String>, TransportFailure>;
}

/// An open streaming response
pub struct StreamConnection {
    pub server_name: String,
    pub lines: Box<dyn LineReader>,
}

impl std::fmt::Debug for StreamConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamConnection")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

/// Network seam for the request executor and the streaming listeners
#[async_trait]
pub trait HttpTransport: Send + Sync + 'static {
    /// Perform a one-shot exchange and return the response body
    async fn execute(&self, request: &RequestContext) -> Result<String, TransportFailure>;

    /// Open a long-lived streaming response.
    ///
    /// Implementations do not bound the lifetime of the stream; callers apply
    /// their own connect and read timeouts.
    async fn open_stream(&self, request: &RequestContext)
        -> Result<StreamConnection, TransportFailure>;
}

fn client_builder(user_agent: Option<&str>) -> ClientBuilder {
    let builder = Client::builder()
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .tcp_keepalive(TCP_KEEPALIVE);
    match user_agent {
        Some(user_agent) => builder.user_agent(user_agent),
        None => builder,
    }
}

/// `HttpTransport` implementation using reqwest
#[derive(Clone, Debug)]
pub struct ReqwestTransport {
    client: Client,
    user_agent: Option<String>,
    /// One client per proxy named in request headers, built with the same settings
    proxied: Arc<Mutex<HashMap<String, Client>>>,
}

impl ReqwestTransport {
    pub fn new(user_agent: &str) -> Result<Self, reqwest::Error> {
        let client = client_builder(Some(user_agent)).build()?;
        Ok(Self {
            client,
            user_agent: Some(user_agent.to_string()),
            proxied: Arc::default(),
        })
    }

    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            user_agent: None,
            proxied: Arc::default(),
        }
    }

    fn proxied_client(&self, proxy: &str) -> Result<Client, TransportFailure> {
        if let Some(client) = self.proxied.lock().get(proxy) {
            return Ok(client.clone());
        }

        let client = client_builder(self.user_agent.as_deref())
            .proxy(reqwest::Proxy::all(proxy).map_err(TransportFailure::Fatal)?)
            .build()
            .map_err(TransportFailure::Fatal)?;
        debug!(%proxy, "Built proxied client");
        self.proxied
            .lock()
            .insert(proxy.to_string(), client.clone());
        Ok(client)
    }

    fn build_request(&self, ctx: &RequestContext) -> Result<RequestBuilder, TransportFailure> {
        let translated = translate_headers(
            ctx.headers.iter().map(|(n, v)| (n.as_str(), v.as_str())),
            &ctx.url,
        );

        // Proxies are a client-level setting in reqwest
        let client = match &translated.proxy {
            Some(proxy) => self.proxied_client(proxy)?,
            None => self.client.clone(),
        };

        let mut builder = client
            .request(ctx.method.clone(), ctx.url.clone())
            .headers(translated.to_header_map());

        if let Some(body) = &ctx.body {
            builder = builder.body(body.clone());
        }

        Ok(builder)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    #[instrument(skip(self, request), fields(method = %request.method, url = %request.url))]
    async fn execute(&self, request: &RequestContext) -> Result<String, TransportFailure> {
        let response = self
            .build_request(request)?
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, &request.url))?;

        let status = response.status();
        let url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(e, &url))?;

        trace!(%status, "Response body: {}", body);

        if status.is_success() {
            Ok(body)
        } else {
            Err(TransportFailure::Status { status, body, url })
        }
    }

    #[instrument(skip(self, request), fields(url = %request.url))]
    async fn open_stream(
        &self,
        request: &RequestContext,
    ) -> Result<StreamConnection, TransportFailure> {
        let response = self
            .build_request(request)?
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, &request.url))?;

        let status = response.status();
        let url = response.url().clone();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|e| map_reqwest_error(e, &url))?;
            return Err(TransportFailure::Status { status, body, url });
        }

        let server_name = parse_server_name(response.headers());
        debug!(%status, server = %server_name, "Stream connected");

        Ok(StreamConnection {
            server_name,
            lines: Box::new(ResponseLines {
                response,
                url,
                buffer: LineBuffer::default(),
                exhausted: false,
            }),
        })
    }
}

/// Name of the serving node, or `?` when the service did not report one
pub fn parse_server_name(headers: &HeaderMap) -> String {
    headers
        .get(SERVER_NAME_HEADER)
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| UNKNOWN_SERVER.to_string(), str::to_string)
}

fn map_reqwest_error(err: reqwest::Error, url: &Url) -> TransportFailure {
    if err.is_timeout() {
        TransportFailure::TimedOut { url: url.clone() }
    } else if is_disconnect(&err) {
        TransportFailure::Disconnected {
            url: url.clone(),
            reason: err.to_string(),
        }
    } else {
        TransportFailure::Fatal(err)
    }
}

fn is_disconnect(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            if matches!(
                io_err.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::UnexpectedEof
            ) {
                return true;
            }
        }
        if cause
            .to_string()
            .contains("connection closed before message completed")
        {
            return true;
        }
        source = cause.source();
    }
    false
}

/// Splits a byte stream into lines, tolerating `\r\n` and a missing final newline.
///
/// Bytes already searched for a terminator are not rescanned when more arrive.
#[derive(Debug)]
pub struct LineBuffer {
    pending: Vec<u8>,
    scanned: usize,
    max_line: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_LENGTH)
    }
}

impl LineBuffer {
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            max_line,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    pub fn next_line(&mut self) -> Option<String> {
        let Some(offset) = self.pending[self.scanned..].iter().position(|b| *b == b'\n') else {
            self.scanned = self.pending.len();
            return None;
        };
        let pos = self.scanned + offset;
        self.scanned = 0;

        let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// An unterminated line has grown past the limit
    pub fn is_overflowing(&self) -> bool {
        self.scanned == self.pending.len() && self.pending.len() > self.max_line
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Whatever is left once the stream has ended
    pub fn finish(&mut self) -> Option<String> {
        self.scanned = 0;
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string())
    }
}

struct ResponseLines {
    response: Response,
    url: Url,
    buffer: LineBuffer,
    exhausted: bool,
}

#[async_trait]
impl LineReader for ResponseLines {
    async fn next_line(&mut self) -> Result<Option<String>, TransportFailure> {
        loop {
            if let Some(line) = self.buffer.next_line() {
                return Ok(Some(line));
            }
            if self.buffer.is_overflowing() {
                return Err(TransportFailure::Disconnected {
                    url: self.url.clone(),
                    reason: format!(
                        "unterminated line of {} bytes exceeds the {} byte limit",
                        self.buffer.pending_len(),
                        MAX_LINE_LENGTH
                    ),
                });
            }
            if self.exhausted {
                return Ok(self.buffer.finish());
            }
            match self.response.chunk().await {
                Ok(Some(bytes)) => self.buffer.push(&bytes),
                Ok(None) => self.exhausted = true,
                Err(e) => return Err(map_reqwest_error(e, &self.url)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_line_buffer_splits_across_chunks() {
        let mut buffer = LineBuffer::default();
        buffer.push(b"{\"Close\":1}\r\n{\"Cl");
        assert_eq!(buffer.next_line().as_deref(), Some("{\"Close\":1}"));
        assert_eq!(buffer.next_line(), None);

        buffer.push(b"ose\":2}\nEND");
        assert_eq!(buffer.next_line().as_deref(), Some("{\"Close\":2}"));
        assert_eq!(buffer.next_line(), None);
        assert_eq!(buffer.finish().as_deref(), Some("END"));
        assert_eq!(buffer.finish(), None);
    }

    #[test]
    fn test_line_buffer_resumes_scan_and_caps_length() {
        let mut buffer = LineBuffer::with_max_line(8);
        buffer.push(b"abcd");
        assert_eq!(buffer.next_line(), None);
        assert!(!buffer.is_overflowing());

        buffer.push(b"ef\ngh");
        assert_eq!(buffer.next_line().as_deref(), Some("abcdef"));
        assert_eq!(buffer.next_line(), None);

        buffer.push(b"ijklmnop");
        assert_eq!(buffer.next_line(), None);
        assert!(buffer.is_overflowing());
        assert_eq!(buffer.pending_len(), 10);

        buffer.push(b"\n");
        assert!(!buffer.is_overflowing());
        assert_eq!(buffer.next_line().as_deref(), Some("ghijklmnop"));
    }

    #[test]
    fn test_parse_server_name() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_server_name(&headers), "?");

        headers.insert(SERVER_NAME_HEADER, HeaderValue::from_static("WEBAPI-07"));
        assert_eq!(parse_server_name(&headers), "WEBAPI-07");
    }

    #[test]
    fn test_request_context_headers() {
        let url = Url::parse("https://api.example.com/v2/orders").unwrap();
        let ctx = RequestContext::new(Method::POST, url, Duration::from_secs(1))
            .with_header("Content-Type", "application/JSON")
            .with_body("{}");
        assert!(ctx.has_header("CONTENT-TYPE"));
        assert!(!ctx.has_header("Accept"));
        assert_eq!(ctx.body.as_deref(), Some("{}"));
    }
}

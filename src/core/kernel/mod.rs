//! WebAPI kernel: transport, classification, retry and streaming
//!
//! The kernel contains everything between a typed endpoint call and the
//! wire. Endpoint knowledge (paths, payload types) lives in `webapi`; the
//! kernel only knows how to move a request and what a failure means.
//!
//! # Architecture
//!
//! ## Transport Layer
//! - `HttpTransport`: Network seam for one-shot and streaming exchanges
//! - `ReqwestTransport`: reqwest-backed implementation
//! - `translate_headers`: Generic name/value pairs onto typed request fields
//!
//! ## Failure Handling
//! - `classify`: Transport failures onto `ClientError` kinds
//! - `RequestExecutor`: Retry policy, quota back-off and notifications
//! - `SleepGate`: Shared "do not send before" deadline
//!
//! ## Streaming
//! - `StreamCodec`: Per-stream line decoding
//! - `StreamListener`: Background worker with a `Stopped/Running/Stopping` state machine
//!
//! # Usage
//!
//! ```rust,no_run
//! use webapi_client::core::kernel::*;
//! use webapi_client::core::types::AccessToken;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(ReqwestTransport::new("webapi-client/0.1")?);
//! let executor = RequestExecutor::new(transport, ExecutorConfig::default());
//! let token = AccessToken::new("token-value");
//!
//! let url = "https://api.tradestation.com/v2/data/quote/MSFT".parse()?;
//! let body = executor.get(url, &token, Duration::from_secs(10)).await?;
//! if body.is_empty() {
//!     // retries exhausted without data
//! }
//! # Ok(())
//! # }
//! ```
pub mod classify;
pub mod codec;
pub mod executor;
pub mod headers;
pub mod stream;
pub mod transport;

// Re-export key types for convenience
pub use classify::{classify, classify_response, searched_symbol};
pub use codec::{BarCodec, JsonLineCodec, QuoteCodec, StreamCodec, StreamRecord, END_OF_STREAM};
pub use executor::{ExecutorConfig, RequestExecutor, SleepGate};
pub use headers::{translate_headers, TranslatedHeaders};
pub use stream::{StreamConfig, StreamListener, StreamRequest};
pub use transport::{
    HttpTransport, LineBuffer, LineReader, ReqwestTransport, RequestContext, StreamConnection,
    TransportFailure, MAX_LINE_LENGTH,
};

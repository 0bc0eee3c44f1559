use crate::core::types::{IntradayBar, Quote};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::marker::PhantomData;
use tracing::trace;

/// Literal line that ends a stream gracefully
pub const END_OF_STREAM: &str = "END";

/// One line of a stream after decoding
#[derive(Debug, Clone, PartialEq)]
pub enum StreamRecord<R> {
    Payload(R),
    End,
    /// Noise the service interleaves with records (e.g. `ERROR`); dropped
    Undecodable,
}

/// Codec trait for line-delimited streaming responses
///
/// Each stream variant decides how a single line becomes a record. The end
/// marker check is shared: `END` in any case, surrounding whitespace ignored.
pub trait StreamCodec: Send + Sync + 'static {
    /// The type representing parsed records from this stream
    type Record: Clone + Debug + Send + Sync + 'static;

    /// Decode a line that is not the end marker.
    ///
    /// # Returns
    /// - `Some(record)` - Successfully decoded record
    /// - `None` - Line could not be decoded and should be skipped
    fn decode_line(&self, line: &str) -> Option<Self::Record>;

    fn is_end_of_stream(&self, line: &str) -> bool {
        line.trim().eq_ignore_ascii_case(END_OF_STREAM)
    }

    fn decode(&self, line: &str) -> StreamRecord<Self::Record> {
        if self.is_end_of_stream(line) {
            return StreamRecord::End;
        }
        self.decode_line(line)
            .map_or(StreamRecord::Undecodable, StreamRecord::Payload)
    }
}

/// Decodes each line as one JSON document of type `T`
pub struct JsonLineCodec<T> {
    _record: PhantomData<fn() -> T>,
}

impl<T> JsonLineCodec<T> {
    pub const fn new() -> Self {
        Self {
            _record: PhantomData,
        }
    }
}

impl<T> Default for JsonLineCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Debug for JsonLineCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JsonLineCodec")
    }
}

impl<T> StreamCodec for JsonLineCodec<T>
where
    T: DeserializeOwned + Clone + Debug + Send + Sync + 'static,
{
    type Record = T;

    fn decode_line(&self, line: &str) -> Option<T> {
        match serde_json::from_str(line) {
            Ok(record) => Some(record),
            Err(e) => {
                trace!(error = %e, "Discarding undecodable stream line");
                None
            }
        }
    }
}

pub type BarCodec = JsonLineCodec<IntradayBar>;
pub type QuoteCodec = JsonLineCodec<Quote>;

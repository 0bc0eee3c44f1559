use crate::core::errors::ClientError;
use crate::core::events::StreamEvent;
use crate::core::kernel::{
    BarCodec, HttpTransport, QuoteCodec, ReqwestTransport, StreamConfig, StreamListener,
    StreamRequest,
};
use crate::core::types::{AccessToken, BarIntervalUnit, IntradayBar, ListenerState, Quote};
use chrono::NaiveDate;
use reqwest::Url;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::instrument;

const STREAM_DATE_FORMAT: &str = "%m-%d-%Y";

fn stream_date(date: NaiveDate) -> String {
    date.format(STREAM_DATE_FORMAT).to_string()
}

fn validate_interval(
    symbol: &str,
    interval_quantity: u32,
    unit: BarIntervalUnit,
) -> Result<(), ClientError> {
    if symbol.trim().is_empty() {
        return Err(ClientError::InvalidParameters(
            "Symbol cannot be empty".to_string(),
        ));
    }
    if interval_quantity == 0 {
        return Err(ClientError::InvalidParameters(
            "Interval quantity must be at least 1".to_string(),
        ));
    }
    if unit.requires_unit_quantity() && interval_quantity != 1 {
        return Err(ClientError::InvalidParameters(format!(
            "Quantity must be 1 if the interval is {}",
            unit
        )));
    }
    Ok(())
}

/// Path for bars between `start` and an optional `end` date
pub fn bar_chart_path(
    symbol: &str,
    interval_quantity: u32,
    unit: BarIntervalUnit,
    start: NaiveDate,
    end: Option<NaiveDate>,
) -> Result<String, ClientError> {
    validate_interval(symbol, interval_quantity, unit)?;

    let mut path = format!(
        "/v2/stream/barchart/{}/{}/{}/{}",
        symbol,
        interval_quantity,
        unit,
        stream_date(start)
    );
    if let Some(end) = end {
        path.push('/');
        path.push_str(&stream_date(end));
    }
    Ok(path)
}

/// Path for the last `bars_back` bars up to `last_date`
pub fn bars_back_path(
    symbol: &str,
    interval_quantity: u32,
    unit: BarIntervalUnit,
    bars_back: u32,
    last_date: NaiveDate,
) -> Result<String, ClientError> {
    validate_interval(symbol, interval_quantity, unit)?;
    if bars_back == 0 {
        return Err(ClientError::InvalidParameters(
            "Bars back must be at least 1".to_string(),
        ));
    }

    Ok(format!(
        "/v2/stream/barchart/{}/{}/{}/{}/{}",
        symbol,
        interval_quantity,
        unit,
        bars_back,
        stream_date(last_date)
    ))
}

/// Comma-separated symbol list for quote streams and quote requests
pub(crate) fn symbol_list(symbols: &[&str]) -> Result<String, ClientError> {
    let symbols: Vec<&str> = symbols
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() {
        return Err(ClientError::InvalidParameters(
            "At least one symbol is required".to_string(),
        ));
    }
    Ok(symbols.join(","))
}

fn join_root(root: &Url, path: &str) -> Result<Url, ClientError> {
    root.join(path)
        .map_err(|e| ClientError::InvalidParameters(format!("Invalid stream path '{}': {}", path, e)))
}

/// Streams intraday, daily, weekly or monthly bars for one symbol
pub struct BarChartListener<T: HttpTransport = ReqwestTransport> {
    listener: StreamListener<BarCodec, T>,
    api_root: Url,
    symbol: parking_lot::Mutex<Option<String>>,
}

impl<T: HttpTransport> std::fmt::Debug for BarChartListener<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BarChartListener")
            .field("api_root", &self.api_root.as_str())
            .field("symbol", &self.symbol())
            .field("listener", &self.listener)
            .finish()
    }
}

impl<T: HttpTransport> BarChartListener<T> {
    pub fn new(
        api_root: Url,
        transport: Arc<T>,
        token: Arc<AccessToken>,
        config: StreamConfig,
    ) -> Self {
        Self {
            listener: StreamListener::new(transport, BarCodec::new(), token, config),
            api_root,
            symbol: parking_lot::Mutex::new(None),
        }
    }

    /// Stream bars from `start` through `end` (or up to now)
    #[instrument(skip(self))]
    pub async fn stream_bars(
        &self,
        symbol: &str,
        interval_quantity: u32,
        unit: BarIntervalUnit,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Result<(), ClientError> {
        let path = bar_chart_path(symbol, interval_quantity, unit, start, end)?;
        let url = join_root(&self.api_root, &path)?;
        *self.symbol.lock() = Some(symbol.to_string());
        self.listener.start(StreamRequest::new(url)).await
    }

    /// Stream the last `bars_back` bars ending at `last_date`.
    ///
    /// `BarsBackQuotaReached` is published once all requested bars have arrived.
    #[instrument(skip(self))]
    pub async fn stream_bars_back(
        &self,
        symbol: &str,
        interval_quantity: u32,
        unit: BarIntervalUnit,
        bars_back: u32,
        last_date: NaiveDate,
    ) -> Result<(), ClientError> {
        let path = bars_back_path(symbol, interval_quantity, unit, bars_back, last_date)?;
        let url = join_root(&self.api_root, &path)?;
        *self.symbol.lock() = Some(symbol.to_string());
        self.listener
            .start(StreamRequest::new(url).with_record_limit(bars_back))
            .await
    }

    /// Symbol of the most recently started stream
    pub fn symbol(&self) -> Option<String> {
        self.symbol.lock().clone()
    }

    pub fn bars_received(&self) -> u32 {
        self.listener.records_received()
    }

    pub fn subscribe(&self) -> mpsc::Receiver<StreamEvent<IntradayBar>> {
        self.listener.subscribe()
    }

    pub fn state(&self) -> ListenerState {
        self.listener.state()
    }

    pub fn connected_server(&self) -> Option<String> {
        self.listener.connected_server()
    }

    pub fn stop(&self) {
        self.listener.stop();
    }

    pub async fn shutdown(&self) {
        self.listener.shutdown().await;
    }

    pub fn listener(&self) -> &StreamListener<BarCodec, T> {
        &self.listener
    }
}

/// Streams quote snapshots or quote changes for a list of symbols
pub struct QuoteListener<T: HttpTransport = ReqwestTransport> {
    listener: StreamListener<QuoteCodec, T>,
    api_root: Url,
}

impl<T: HttpTransport> std::fmt::Debug for QuoteListener<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuoteListener")
            .field("api_root", &self.api_root.as_str())
            .field("listener", &self.listener)
            .finish()
    }
}

impl<T: HttpTransport> QuoteListener<T> {
    pub fn new(
        api_root: Url,
        transport: Arc<T>,
        token: Arc<AccessToken>,
        config: StreamConfig,
    ) -> Self {
        Self {
            listener: StreamListener::new(transport, QuoteCodec::new(), token, config),
            api_root,
        }
    }

    /// Full quotes for `symbols`, followed by updates
    pub async fn stream_snapshots(&self, symbols: &[&str]) -> Result<(), ClientError> {
        let path = format!("/v2/stream/quote/snapshots/{}", symbol_list(symbols)?);
        let url = join_root(&self.api_root, &path)?;
        self.listener.start(StreamRequest::new(url)).await
    }

    /// Only the fields that changed since the previous quote
    pub async fn stream_changes(&self, symbols: &[&str]) -> Result<(), ClientError> {
        let path = format!("/v2/stream/quote/changes/{}", symbol_list(symbols)?);
        let url = join_root(&self.api_root, &path)?;
        self.listener.start(StreamRequest::new(url)).await
    }

    pub fn subscribe(&self) -> mpsc::Receiver<StreamEvent<Quote>> {
        self.listener.subscribe()
    }

    pub fn state(&self) -> ListenerState {
        self.listener.state()
    }

    pub fn connected_server(&self) -> Option<String> {
        self.listener.connected_server()
    }

    pub fn stop(&self) {
        self.listener.stop();
    }

    pub async fn shutdown(&self) {
        self.listener.shutdown().await;
    }

    pub fn listener(&self) -> &StreamListener<QuoteCodec, T> {
        &self.listener
    }
}

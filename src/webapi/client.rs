use crate::core::config::ClientConfig;
use crate::core::errors::ClientError;
use crate::core::events::ClientEvent;
use crate::core::kernel::{
    ExecutorConfig, HttpTransport, ReqwestTransport, RequestExecutor, StreamConfig,
};
use crate::core::types::AccessToken;
use crate::webapi::listeners::{symbol_list, BarChartListener, QuoteListener};
use crate::webapi::{authorization, utility};
use parking_lot::RwLock;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, instrument};

/// Thin typed wrapper around `RequestExecutor` for the v2 WebAPI
///
/// Every call reads the current token snapshot when it starts; `refresh_token`
/// only affects calls and listeners created afterwards. An `Ok(None)` result
/// means the executor ran out of attempts without receiving data.
pub struct WebApiClient<T: HttpTransport = ReqwestTransport> {
    config: ClientConfig,
    executor: RequestExecutor<T>,
    token: RwLock<Arc<AccessToken>>,
}

impl<T: HttpTransport> std::fmt::Debug for WebApiClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebApiClient")
            .field("api_root", &self.config.api_root.as_str())
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl WebApiClient<ReqwestTransport> {
    pub fn new(config: ClientConfig, token: AccessToken) -> Result<Self, ClientError> {
        let transport = ReqwestTransport::new(&config.user_agent)?;
        Ok(Self::with_transport(config, token, Arc::new(transport)))
    }

    /// Authorize with the configured client credentials and build a client
    /// holding the issued token.
    pub async fn authorize(
        config: ClientConfig,
        auth_code: &str,
        redirect_uri: &Url,
    ) -> Result<Self, ClientError> {
        let transport = Arc::new(ReqwestTransport::new(&config.user_agent)?);
        let token = authorization::authorize(
            transport.as_ref(),
            &config.api_root,
            auth_code,
            config.client_id(),
            config.client_secret(),
            redirect_uri,
        )
        .await?;
        Ok(Self::with_transport(config, token, transport))
    }
}

impl<T: HttpTransport> WebApiClient<T> {
    pub fn with_transport(config: ClientConfig, token: AccessToken, transport: Arc<T>) -> Self {
        let executor = RequestExecutor::new(
            transport,
            ExecutorConfig {
                quota_sleep: config.quota_sleep,
                max_attempts: config.max_attempts,
            },
        );
        Self {
            config,
            executor,
            token: RwLock::new(Arc::new(token)),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn executor(&self) -> &RequestExecutor<T> {
        &self.executor
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.executor.subscribe()
    }

    /// Current token snapshot
    pub fn token(&self) -> Arc<AccessToken> {
        Arc::clone(&self.token.read())
    }

    pub fn refresh_token(&self, token: AccessToken) {
        info!(user = token.user_id().unwrap_or("?"), "Access token replaced");
        *self.token.write() = Arc::new(token);
    }

    pub fn bar_chart_listener(&self) -> BarChartListener<T> {
        BarChartListener::new(
            self.config.api_root.clone(),
            Arc::clone(self.executor.transport()),
            self.token(),
            self.stream_config(),
        )
    }

    pub fn quote_listener(&self) -> QuoteListener<T> {
        QuoteListener::new(
            self.config.api_root.clone(),
            Arc::clone(self.executor.transport()),
            self.token(),
            self.stream_config(),
        )
    }

    pub async fn is_online(&self) -> bool {
        utility::is_online(self.executor.transport().as_ref(), &self.config.api_root).await
    }

    pub async fn api_version(&self) -> i32 {
        utility::api_version(self.executor.transport().as_ref(), &self.config.api_root).await
    }

    fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            connect_timeout: self.config.stream_connect_timeout,
            read_timeout: self.config.stream_read_timeout,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.config
            .api_root
            .join(path)
            .map_err(|e| ClientError::InvalidParameters(format!("Invalid endpoint '{}': {}", path, e)))
    }

    // Generic typed calls

    pub async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<Option<R>, ClientError> {
        let url = self.endpoint(path)?;
        let token = self.token();
        let body = self
            .executor
            .get(url, &token, self.config.request_timeout)
            .await?;
        decode_body(&body)
    }

    pub async fn post_json<B, R>(&self, path: &str, payload: &B) -> Result<Option<R>, ClientError>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        let token = self.token();
        let body = self
            .executor
            .post(url, &token, serde_json::to_string(payload)?, self.config.request_timeout)
            .await?;
        decode_body(&body)
    }

    pub async fn put_json<B, R>(&self, path: &str, payload: &B) -> Result<Option<R>, ClientError>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        let token = self.token();
        let body = self
            .executor
            .put(url, &token, serde_json::to_string(payload)?, self.config.request_timeout)
            .await?;
        decode_body(&body)
    }

    pub async fn delete_json<R: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Option<R>, ClientError> {
        let url = self.endpoint(path)?;
        let token = self.token();
        let body = self
            .executor
            .delete(url, &token, self.config.request_timeout)
            .await?;
        decode_body(&body)
    }

    // Brokerage

    pub async fn account_balances(&self, account_ids: &[u64]) -> Result<Option<Value>, ClientError> {
        let ids = id_list(account_ids)?;
        self.get_json(&format!("/v2/accounts/{}/balances", ids)).await
    }

    pub async fn account_orders(&self, account_ids: &[u64]) -> Result<Option<Value>, ClientError> {
        let ids = id_list(account_ids)?;
        self.get_json(&format!("/v2/accounts/{}/orders", ids)).await
    }

    pub async fn account_positions(&self, account_ids: &[u64]) -> Result<Option<Value>, ClientError> {
        let ids = id_list(account_ids)?;
        self.get_json(&format!("/v2/accounts/{}/positions", ids)).await
    }

    pub async fn user_accounts(&self, user_name: &str) -> Result<Option<Value>, ClientError> {
        let user_name = required("user name", user_name)?;
        self.get_json(&format!("/v2/users/{}/accounts", user_name)).await
    }

    pub async fn user_positions(&self, user_id: &str) -> Result<Option<Value>, ClientError> {
        let user_id = required("user id", user_id)?;
        self.get_json(&format!("/v2/users/{}/positions", user_id)).await
    }

    // Order execution

    #[instrument(skip(self, order))]
    pub async fn place_order(&self, order: &Value) -> Result<Option<Value>, ClientError> {
        self.post_json("/v2/orders", order).await
    }

    pub async fn confirm_order(&self, order: &Value) -> Result<Option<Value>, ClientError> {
        self.post_json("/v2/orders/confirm", order).await
    }

    /// Replace an open order. Sent once; failures are not retried.
    #[instrument(skip(self, order))]
    pub async fn update_order(&self, order_id: u64, order: &Value) -> Result<Option<Value>, ClientError> {
        self.put_json(&format!("/v2/orders/{}", order_id), order).await
    }

    /// Sent once; failures are not retried.
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: u64) -> Result<Option<Value>, ClientError> {
        self.delete_json(&format!("/v2/orders/{}", order_id)).await
    }

    pub async fn confirm_group_order(&self, group: &Value) -> Result<Option<Value>, ClientError> {
        self.post_json("/v2/orders/groups/confirm", group).await
    }

    #[instrument(skip(self, group))]
    pub async fn send_group_order(&self, group: &Value) -> Result<Option<Value>, ClientError> {
        self.post_json("/v2/orders/groups", group).await
    }

    // Market data

    /// Search with raw criteria such as `c=EQ&n=MSFT`.
    ///
    /// An unknown symbol is reported as a `SymbolNotFound` event and results in `Ok(None)`.
    pub async fn symbol_search(&self, criteria: &str) -> Result<Option<Value>, ClientError> {
        let criteria = required("search criteria", criteria)?;
        self.get_json(&format!("/v2/data/symbols/search/{}", criteria)).await
    }

    pub async fn symbol(&self, symbol: &str) -> Result<Option<Value>, ClientError> {
        let symbol = required("symbol", symbol)?;
        self.get_json(&format!("/v2/data/symbol/{}", symbol)).await
    }

    pub async fn symbol_suggest(&self, text: &str, top: u32) -> Result<Option<Value>, ClientError> {
        let text = required("suggest text", text)?;
        self.get_json(&format!("/v2/data/symbols/suggest/{}?$top={}", text, top))
            .await
    }

    pub async fn quotes(&self, symbols: &[&str]) -> Result<Option<Value>, ClientError> {
        let symbols = symbol_list(symbols)?;
        self.get_json(&format!("/v2/data/quote/{}", symbols)).await
    }

    pub async fn symbol_lists(&self) -> Result<Option<Value>, ClientError> {
        self.get_json("/v2/data/symbollists").await
    }

    pub async fn symbol_list(&self, list_id: &str) -> Result<Option<Value>, ClientError> {
        let list_id = required("symbol list id", list_id)?;
        self.get_json(&format!("/v2/data/symbollists/{}", list_id)).await
    }

    pub async fn symbol_list_symbols(&self, list_id: &str) -> Result<Option<Value>, ClientError> {
        let list_id = required("symbol list id", list_id)?;
        self.get_json(&format!("/v2/data/symbollists/{}/symbols", list_id))
            .await
    }
}

fn decode_body<R: DeserializeOwned>(body: &str) -> Result<Option<R>, ClientError> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(body)?))
}

fn required<'a>(what: &str, value: &'a str) -> Result<&'a str, ClientError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ClientError::InvalidParameters(format!("{} is required", what)));
    }
    Ok(value)
}

fn id_list(ids: &[u64]) -> Result<String, ClientError> {
    if ids.is_empty() {
        return Err(ClientError::InvalidParameters(
            "At least one account id is required".to_string(),
        ));
    }
    Ok(ids
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(","))
}

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use webapi_client::{AccessToken, ClientConfig, StreamEvent, WebApiClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Reads WEBAPI_API_ROOT and friends (and .env when present)
    let config = load_config().context("loading client configuration")?;
    let token = std::env::var("WEBAPI_ACCESS_TOKEN").unwrap_or_default();

    let client = WebApiClient::new(config, AccessToken::new(token))?;

    println!("Service online: {}", client.is_online().await);
    println!("API version: {}", client.api_version().await);

    if client.token().token().is_empty() {
        println!("Set WEBAPI_ACCESS_TOKEN to stream quotes");
        return Ok(());
    }

    let listener = client.quote_listener();
    let mut events = listener.subscribe();
    listener.stream_changes(&["MSFT", "AAPL"]).await?;

    let mut received = 0;
    while received < 10 {
        match events.recv().await {
            Some(StreamEvent::Record(quote)) => {
                received += 1;
                println!(
                    "{}: last={:?} bid={:?} ask={:?}",
                    quote.symbol.as_deref().unwrap_or("?"),
                    quote.last,
                    quote.bid,
                    quote.ask
                );
            }
            Some(StreamEvent::Timeout { uri }) => {
                println!("Stream timed out: {}", uri);
                break;
            }
            Some(StreamEvent::Failed(err)) => {
                println!("Stream failed: {}", err);
                break;
            }
            Some(StreamEvent::BarsBackQuotaReached { .. }) => {}
            None => break,
        }
    }

    listener.shutdown().await;
    Ok(())
}

#[cfg(feature = "env-file")]
fn load_config() -> Result<ClientConfig, webapi_client::core::config::ConfigError> {
    ClientConfig::from_env_file("WEBAPI")
}

#[cfg(not(feature = "env-file"))]
fn load_config() -> Result<ClientConfig, webapi_client::core::config::ConfigError> {
    ClientConfig::from_env("WEBAPI")
}

use crate::core::kernel::{HttpTransport, RequestContext};
use reqwest::{Method, Url};
use std::time::Duration;
use tracing::{debug, instrument, warn};

pub const UTILITY_TIMEOUT: Duration = Duration::from_millis(5_000);

const ONLINE_STATUS: &str = "marketdatanormal";

/// Whether the service reports normal market data. Any failure counts as offline.
#[instrument(skip(transport, api_root), fields(root = %api_root))]
pub async fn is_online<T: HttpTransport + ?Sized>(transport: &T, api_root: &Url) -> bool {
    let Ok(url) = api_root.join("/v2/Status.ashx") else {
        return false;
    };

    match transport
        .execute(&RequestContext::new(Method::GET, url, UTILITY_TIMEOUT))
        .await
    {
        Ok(body) => {
            debug!(status = %body, "Service status");
            body == ONLINE_STATUS
        }
        Err(e) => {
            warn!(error = %e, "Status check failed");
            false
        }
    }
}

/// Numeric API version from `version.txt`.
///
/// The file holds four `/`-separated fields with the version last. Any other
/// shape, or a non-numeric last field, yields `0`; a failed request yields `-1`.
#[instrument(skip(transport, api_root), fields(root = %api_root))]
pub async fn api_version<T: HttpTransport + ?Sized>(transport: &T, api_root: &Url) -> i32 {
    let Ok(url) = api_root.join("/v2/version.txt") else {
        return -1;
    };

    match transport
        .execute(&RequestContext::new(Method::GET, url, UTILITY_TIMEOUT))
        .await
    {
        Ok(body) => parse_version(&body),
        Err(e) => {
            warn!(error = %e, "Version request failed");
            -1
        }
    }
}

fn parse_version(body: &str) -> i32 {
    let fields: Vec<&str> = body.split('/').collect();
    match fields.as_slice() {
        [_, _, _, version] => version.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

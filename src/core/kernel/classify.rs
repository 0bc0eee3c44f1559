use crate::core::errors::{BadRequest, ClientError};
use crate::core::kernel::transport::TransportFailure;
use reqwest::{StatusCode, Url};

const QUOTA_MARKER: &str = "quota exceeded";
const SYMBOL_SEARCH_PATH: &str = "symbols/search";
const SYMBOL_PARAM: &str = "r";

/// Turn a failed exchange into a semantic error kind.
///
/// Failures without an HTTP response (refused connection, DNS, TLS) come back
/// as `ClientError::Transport` unclassified.
pub fn classify(failure: TransportFailure) -> ClientError {
    match failure {
        TransportFailure::TimedOut { url } => ClientError::Timeout { url },
        TransportFailure::Disconnected { url, .. } => ClientError::KeepAliveFailure { url },
        TransportFailure::Fatal(err) => ClientError::Transport(err),
        TransportFailure::Status { status, body, url } => classify_response(status, body, url),
    }
}

/// Classify an HTTP error response. The first matching rule wins:
/// quota marker, symbol-search 404, structured error body, 401, anything else.
pub fn classify_response(status: StatusCode, body: String, url: Url) -> ClientError {
    if body.contains(QUOTA_MARKER) {
        return ClientError::QuotaExceeded { url };
    }

    if status == StatusCode::NOT_FOUND && url.as_str().to_lowercase().contains(SYMBOL_SEARCH_PATH)
    {
        return ClientError::SymbolNotFound {
            symbol: searched_symbol(&url),
        };
    }

    if body.contains("Message") && body.contains("StatusCode") {
        return ClientError::BadRequest(BadRequest::from_body(body));
    }

    if status == StatusCode::UNAUTHORIZED {
        return ClientError::Unauthorized { url };
    }

    ClientError::Protocol { status, body }
}

/// Value of the `r` parameter, read from the query string or, when there is
/// none, from the last path segment (`.../search/r=ABC&x=1`). Empty if absent.
pub fn searched_symbol(url: &Url) -> String {
    let source = match url.query() {
        Some(query) if !query.is_empty() => query,
        _ => url.path().rsplit('/').next().unwrap_or_default(),
    };

    source
        .split('&')
        .find_map(|pair| {
            let parts: Vec<&str> = pair.split('=').collect();
            match parts.as_slice() {
                [key, value] if key.eq_ignore_ascii_case(SYMBOL_PARAM) => Some((*value).to_string()),
                _ => None,
            }
        })
        .unwrap_or_default()
}

use crate::core::errors::ClientError;
use crate::core::kernel::{classify, HttpTransport, RequestContext};
use crate::core::types::{AcceptType, AccessToken};
use reqwest::{Method, Url};
use std::time::Duration;
use tracing::{info, instrument};
use url::form_urlencoded;

pub const AUTHORIZE_TIMEOUT: Duration = Duration::from_millis(20_000);

/// Exchange an authorization code for an access token.
///
/// The service only recognizes the client id and secret in upper case.
#[instrument(
    skip(transport, api_root, auth_code, client_secret, redirect_uri),
    fields(root = %api_root)
)]
pub async fn authorize<T: HttpTransport + ?Sized>(
    transport: &T,
    api_root: &Url,
    auth_code: &str,
    client_id: &str,
    client_secret: &str,
    redirect_uri: &Url,
) -> Result<AccessToken, ClientError> {
    if auth_code.is_empty() || client_id.is_empty() || client_secret.is_empty() {
        return Err(ClientError::InvalidParameters(
            "Authorization code, client id and client secret are required".to_string(),
        ));
    }

    let url = api_root
        .join("v2/security/authorize")
        .map_err(|e| ClientError::InvalidParameters(format!("Invalid API root: {}", e)))?;

    let request = RequestContext::new(Method::POST, url, AUTHORIZE_TIMEOUT)
        .with_header("Content-Type", AcceptType::FormUrlEncoded.as_str())
        .with_body(authorization_form(auth_code, client_id, client_secret, redirect_uri));

    let body = transport.execute(&request).await.map_err(classify)?;
    let token: AccessToken = serde_json::from_str(&body)?;
    info!(user = token.user_id().unwrap_or("?"), "Access token issued");
    Ok(token)
}

fn authorization_form(
    auth_code: &str,
    client_id: &str,
    client_secret: &str,
    redirect_uri: &Url,
) -> String {
    form_urlencoded::Serializer::new(String::new())
        .append_pair("grant_type", "authorization_code")
        .append_pair("code", auth_code)
        .append_pair("client_id", &client_id.to_uppercase())
        .append_pair("redirect_uri", redirect_uri.as_str())
        .append_pair("client_secret", &client_secret.to_uppercase())
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_form_uppercases_credentials() {
        let redirect = Url::parse("http://localhost:8080/callback").unwrap();
        let form = authorization_form("code-1", "abc-def", "s3cr3t", &redirect);
        assert_eq!(
            form,
            "grant_type=authorization_code&code=code-1&client_id=ABC-DEF\
             &redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Fcallback&client_secret=S3CR3T"
        );
    }

    #[test]
    fn test_authorization_form_escapes_reserved_characters() {
        let redirect = Url::parse("https://app.example.com/cb?state=a&b=c d").unwrap();
        let form = authorization_form("x&y=z", "id", "p+q", &redirect);

        let pairs: Vec<(String, String)> = form_urlencoded::parse(form.as_bytes())
            .into_owned()
            .collect();
        assert_eq!(pairs.len(), 5);
        assert_eq!(pairs[1], ("code".to_string(), "x&y=z".to_string()));
        assert_eq!(
            pairs[3],
            ("redirect_uri".to_string(), redirect.as_str().to_string())
        );
        assert_eq!(pairs[4], ("client_secret".to_string(), "P+Q".to_string()));
    }
}

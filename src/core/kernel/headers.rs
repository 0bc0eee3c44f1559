use chrono::{DateTime, Utc};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use tracing::warn;

const BEARER: &str = "Bearer";

/// Request headers sorted into the fields the transport sets individually.
///
/// Values for typed fields that fail to parse (a non-numeric content length,
/// an unreadable date) are dropped rather than rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslatedHeaders {
    pub authorization: Option<String>,
    pub content_type: Option<String>,
    pub accept: Option<String>,
    pub connection: Option<String>,
    pub content_length: Option<u64>,
    pub date: Option<DateTime<Utc>>,
    pub expect: Option<String>,
    pub host: Option<String>,
    pub if_modified_since: Option<DateTime<Utc>>,
    pub range: Option<u64>,
    pub referer: Option<String>,
    pub transfer_encoding: Option<String>,
    pub user_agent: Option<String>,
    pub proxy: Option<String>,
    pub other: Vec<(String, String)>,
}

/// Map generic name/value pairs onto transport fields for a request to `target`.
///
/// Version 2 endpoints (`/v2/` anywhere in the URL) need the authorization
/// value to carry the bearer marker; it is added unless already present.
pub fn translate_headers<'a, I>(headers: I, target: &Url) -> TranslatedHeaders
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let is_v2 = target.as_str().to_lowercase().contains("/v2/");
    let mut out = TranslatedHeaders::default();

    for (name, value) in headers {
        match name.to_ascii_uppercase().as_str() {
            "AUTHORIZATION" => {
                out.authorization = Some(if is_v2 && !value.contains(BEARER) {
                    format!("{} {}", BEARER, value)
                } else {
                    value.to_string()
                });
            }
            "CONTENT-TYPE" => out.content_type = Some(value.to_string()),
            "ACCEPT" => out.accept = Some(value.to_string()),
            "CONNECTION" => out.connection = Some(value.to_string()),
            "CONTENT-LENGTH" => {
                if let Ok(length) = value.trim().parse() {
                    out.content_length = Some(length);
                }
            }
            "DATE" => {
                if let Some(date) = parse_date(value) {
                    out.date = Some(date);
                }
            }
            "EXPECT" => out.expect = Some(value.to_string()),
            "HOST" => out.host = Some(value.to_string()),
            "IF-MODIFIED-SINCE" => {
                if let Some(date) = parse_date(value) {
                    out.if_modified_since = Some(date);
                }
            }
            "RANGE" => {
                if let Ok(offset) = value.trim().parse() {
                    out.range = Some(offset);
                }
            }
            "REFERER" => out.referer = Some(value.to_string()),
            "TRANSFER-ENCODING" => out.transfer_encoding = Some(value.to_string()),
            "USER-AGENT" => out.user_agent = Some(value.to_string()),
            "PROXY" | "PROXY-CONNECTION" => out.proxy = Some(value.to_string()),
            _ => out.other.push((name.to_string(), value.to_string())),
        }
    }

    out
}

fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|d| d.with_timezone(&Utc))
        .ok()
}

fn http_date(date: DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

impl TranslatedHeaders {
    /// Build the wire header map. The proxy field is not a header; the transport consumes it.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();

        let typed = [
            (header::AUTHORIZATION, self.authorization.clone()),
            (header::CONTENT_TYPE, self.content_type.clone()),
            (header::ACCEPT, self.accept.clone()),
            (header::CONNECTION, self.connection.clone()),
            (header::CONTENT_LENGTH, self.content_length.map(|l| l.to_string())),
            (header::DATE, self.date.map(http_date)),
            (header::EXPECT, self.expect.clone()),
            (header::HOST, self.host.clone()),
            (header::IF_MODIFIED_SINCE, self.if_modified_since.map(http_date)),
            (header::RANGE, self.range.map(|r| format!("bytes={}-", r))),
            (header::REFERER, self.referer.clone()),
            (header::TRANSFER_ENCODING, self.transfer_encoding.clone()),
            (header::USER_AGENT, self.user_agent.clone()),
        ];

        for (name, value) in typed {
            if let Some(value) = value {
                insert(&mut map, name, &value);
            }
        }

        for (name, value) in &self.other {
            match HeaderName::from_bytes(name.as_bytes()) {
                Ok(name) => insert(&mut map, name, value),
                Err(e) => warn!(header = %name, error = %e, "Dropping header with invalid name"),
            }
        }

        map
    }
}

fn insert(map: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            map.append(name, value);
        }
        Err(e) => warn!(header = %name, error = %e, "Dropping header with invalid value"),
    }
}

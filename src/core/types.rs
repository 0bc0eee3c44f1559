use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Bearer credential issued by the authorization endpoint.
///
/// Requests and listeners hold their own snapshot of the token; replacing the
/// token on the client only affects operations started afterwards.
#[derive(Debug, Clone)]
pub struct AccessToken {
    token: Secret<String>,
    refresh_token: Option<Secret<String>>,
    user_id: Option<String>,
    expires_in: Option<u64>,
    issued_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: Secret::new(token.into()),
            refresh_token: None,
            user_id: None,
            expires_in: None,
            issued_at: Utc::now(),
        }
    }

    /// Set the lifetime in seconds, counted from `issued_at`
    #[must_use]
    pub fn with_expires_in(mut self, seconds: u64) -> Self {
        self.expires_in = Some(seconds);
        self
    }

    #[must_use]
    pub fn with_issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = issued_at;
        self
    }

    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(Secret::new(refresh_token.into()));
        self
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Raw token value (use carefully - exposes secret)
    pub fn token(&self) -> &str {
        self.token.expose_secret()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_ref().map(|t| t.expose_secret().as_str())
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_in
            .map(|secs| self.issued_at + ChronoDuration::seconds(secs as i64))
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at().is_some_and(|at| at <= Utc::now())
    }
}

impl<'de> Deserialize<'de> for AccessToken {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct AccessTokenHelper {
            access_token: String,
            refresh_token: Option<String>,
            expires_in: Option<u64>,
            #[serde(alias = "userid")]
            user_id: Option<String>,
        }

        let helper = AccessTokenHelper::deserialize(deserializer)?;
        Ok(Self {
            token: Secret::new(helper.access_token),
            refresh_token: helper.refresh_token.map(Secret::new),
            user_id: helper.user_id,
            expires_in: helper.expires_in,
            issued_at: Utc::now(),
        })
    }
}

/// Structured error object returned by the service for rejected requests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestError {
    pub status_code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// Value sent in the `Accept` header of one-shot requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AcceptType {
    #[default]
    Json,
    Xml,
    FormUrlEncoded,
}

impl AcceptType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Json => "application/JSON",
            Self::Xml => "application/XML",
            Self::FormUrlEncoded => "application/x-www-form-urlencoded",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BarIntervalUnit {
    Minute,
    Daily,
    Weekly,
    Monthly,
}

impl BarIntervalUnit {
    /// Daily and longer bars only accept an interval quantity of one.
    pub const fn requires_unit_quantity(self) -> bool {
        matches!(self, Self::Daily | Self::Weekly | Self::Monthly)
    }
}

impl fmt::Display for BarIntervalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self {
            Self::Minute => "Minute",
            Self::Daily => "Daily",
            Self::Weekly => "Weekly",
            Self::Monthly => "Monthly",
        };
        f.write_str(unit)
    }
}

/// One bar from the bar-chart stream.
///
/// Only the fields the client inspects are typed; everything else the
/// service sends is kept in `extra`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct IntradayBar {
    #[serde(default)]
    pub open: Option<Decimal>,
    #[serde(default)]
    pub high: Option<Decimal>,
    #[serde(default)]
    pub low: Option<Decimal>,
    #[serde(default)]
    pub close: Option<Decimal>,
    #[serde(default)]
    pub total_volume: Option<u64>,
    #[serde(default)]
    pub time_stamp: Option<String>,
    #[serde(default)]
    pub status: Option<u32>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// One quote from the snapshot or change stream
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Quote {
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub last: Option<Decimal>,
    #[serde(default)]
    pub bid: Option<Decimal>,
    #[serde(default)]
    pub ask: Option<Decimal>,
    #[serde(default)]
    pub volume: Option<u64>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenerStatus {
    #[default]
    Stopped,
    Running,
    Stopping,
}

/// Listener status plus the instant the current connection reached `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListenerState {
    pub status: ListenerStatus,
    pub connected_at: Option<DateTime<Utc>>,
}

impl ListenerState {
    pub fn is_running(&self) -> bool {
        self.status == ListenerStatus::Running
    }
}

// Never write the credential itself
impl Serialize for AccessToken {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("AccessToken", 4)?;
        state.serialize_field("access_token", "[REDACTED]")?;
        state.serialize_field("user_id", &self.user_id)?;
        state.serialize_field("expires_in", &self.expires_in)?;
        state.serialize_field("issued_at", &self.issued_at.to_rfc3339())?;
        state.end()
    }
}

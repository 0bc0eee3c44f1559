use reqwest::Url;
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::env;
use std::time::Duration;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_QUOTA_SLEEP: Duration = Duration::from_millis(5_000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_STREAM_CONNECT_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_STREAM_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Known deployments of the WebAPI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebApiEnvironment {
    Production,
    Simulation,
}

impl WebApiEnvironment {
    pub const fn api_root(self) -> &'static str {
        match self {
            Self::Production => "https://api.tradestation.com/",
            Self::Simulation => "https://sim.api.tradestation.com/",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_root: Url,
    pub client_id: Secret<String>,
    pub client_secret: Secret<String>,
    /// Per-request timeout for one-shot calls
    pub request_timeout: Duration,
    /// How long every caller backs off after a quota violation
    pub quota_sleep: Duration,
    /// Upper bound on attempts while a GET/POST keeps coming back empty
    pub max_attempts: u32,
    pub stream_connect_timeout: Duration,
    pub stream_read_timeout: Duration,
    pub user_agent: String,
}

// Custom Serialize implementation - never expose secrets in serialization
impl Serialize for ClientConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("ClientConfig", 9)?;
        state.serialize_field("api_root", self.api_root.as_str())?;
        state.serialize_field("client_id", "[REDACTED]")?;
        state.serialize_field("client_secret", "[REDACTED]")?;
        state.serialize_field("request_timeout_ms", &(self.request_timeout.as_millis() as u64))?;
        state.serialize_field("quota_sleep_ms", &(self.quota_sleep.as_millis() as u64))?;
        state.serialize_field("max_attempts", &self.max_attempts)?;
        state.serialize_field(
            "stream_connect_timeout_ms",
            &(self.stream_connect_timeout.as_millis() as u64),
        )?;
        state.serialize_field(
            "stream_read_timeout_ms",
            &(self.stream_read_timeout.as_millis() as u64),
        )?;
        state.serialize_field("user_agent", &self.user_agent)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for ClientConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct ClientConfigHelper {
            api_root: String,
            #[serde(default)]
            client_id: String,
            #[serde(default)]
            client_secret: String,
            request_timeout_ms: Option<u64>,
            quota_sleep_ms: Option<u64>,
            max_attempts: Option<u32>,
            stream_connect_timeout_ms: Option<u64>,
            stream_read_timeout_ms: Option<u64>,
            user_agent: Option<String>,
        }

        let helper = ClientConfigHelper::deserialize(deserializer)?;
        let api_root = Url::parse(&helper.api_root).map_err(serde::de::Error::custom)?;
        let defaults = Self::new(api_root);
        Ok(Self {
            client_id: Secret::new(helper.client_id),
            client_secret: Secret::new(helper.client_secret),
            request_timeout: helper
                .request_timeout_ms
                .map_or(defaults.request_timeout, Duration::from_millis),
            quota_sleep: helper
                .quota_sleep_ms
                .map_or(defaults.quota_sleep, Duration::from_millis),
            max_attempts: helper.max_attempts.unwrap_or(defaults.max_attempts),
            stream_connect_timeout: helper
                .stream_connect_timeout_ms
                .map_or(defaults.stream_connect_timeout, Duration::from_millis),
            stream_read_timeout: helper
                .stream_read_timeout_ms
                .map_or(defaults.stream_read_timeout, Duration::from_millis),
            user_agent: helper.user_agent.unwrap_or(defaults.user_agent),
            api_root: defaults.api_root,
        })
    }
}

impl ClientConfig {
    /// Create a configuration for the given API root with default timings
    #[must_use]
    pub fn new(api_root: Url) -> Self {
        Self {
            api_root,
            client_id: Secret::new(String::new()),
            client_secret: Secret::new(String::new()),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            quota_sleep: DEFAULT_QUOTA_SLEEP,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            stream_connect_timeout: DEFAULT_STREAM_CONNECT_TIMEOUT,
            stream_read_timeout: DEFAULT_STREAM_READ_TIMEOUT,
            user_agent: "WebApiClient/1.0".to_string(),
        }
    }

    pub fn for_environment(environment: WebApiEnvironment) -> Result<Self, ConfigError> {
        Ok(Self::new(parse_root(environment.api_root())?))
    }

    /// Create configuration from environment variables
    ///
    /// Expected environment variables:
    /// - `{PREFIX}_API_ROOT` (e.g., `WEBAPI_API_ROOT`)
    /// - `{PREFIX}_CLIENT_ID` and `{PREFIX}_CLIENT_SECRET` (optional)
    /// - `{PREFIX}_SLEEP_MS` (optional, quota back-off)
    /// - `{PREFIX}_TIMEOUT_MS` (optional, per-request timeout)
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.to_uppercase();
        let root_var = format!("{}_API_ROOT", prefix);

        let api_root = env::var(&root_var)
            .map_err(|_| ConfigError::MissingEnvironmentVariable(root_var))
            .and_then(|root| parse_root(&root))?;

        let mut config = Self::new(api_root);
        config.client_id = Secret::new(env::var(format!("{}_CLIENT_ID", prefix)).unwrap_or_default());
        config.client_secret =
            Secret::new(env::var(format!("{}_CLIENT_SECRET", prefix)).unwrap_or_default());

        if let Some(ms) = read_millis(&format!("{}_SLEEP_MS", prefix))? {
            config.quota_sleep = ms;
        }
        if let Some(ms) = read_millis(&format!("{}_TIMEOUT_MS", prefix))? {
            config.request_timeout = ms;
        }

        Ok(config)
    }

    /// Create configuration from a .env file and environment variables
    ///
    /// A missing .env file is not an error; the process environment is used as is.
    #[cfg(feature = "env-file")]
    pub fn from_env_file(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_env_file_with_path(prefix, ".env")
    }

    #[cfg(feature = "env-file")]
    pub fn from_env_file_with_path(prefix: &str, env_file_path: &str) -> Result<Self, ConfigError> {
        match dotenv::from_path(env_file_path) {
            Ok(()) => {}
            Err(dotenv::Error::Io(io_err)) if io_err.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(ConfigError::InvalidConfiguration(format!(
                    "Failed to load .env file '{}': {}",
                    env_file_path, e
                )));
            }
        }

        Self::from_env(prefix)
    }

    #[must_use]
    pub fn with_credentials(mut self, client_id: String, client_secret: String) -> Self {
        self.client_id = Secret::new(client_id);
        self.client_secret = Secret::new(client_secret);
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_quota_sleep(mut self, sleep: Duration) -> Self {
        self.quota_sleep = sleep;
        self
    }

    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    #[must_use]
    pub const fn with_stream_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.stream_connect_timeout = connect;
        self.stream_read_timeout = read;
        self
    }

    #[must_use]
    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn has_credentials(&self) -> bool {
        !self.client_id.expose_secret().is_empty() && !self.client_secret.expose_secret().is_empty()
    }

    /// Get client id (use carefully - exposes secret)
    pub fn client_id(&self) -> &str {
        self.client_id.expose_secret()
    }

    /// Get client secret (use carefully - exposes secret)
    pub fn client_secret(&self) -> &str {
        self.client_secret.expose_secret()
    }
}

fn parse_root(root: &str) -> Result<Url, ConfigError> {
    Url::parse(root)
        .map_err(|e| ConfigError::InvalidConfiguration(format!("Invalid API root '{}': {}", root, e)))
}

fn read_millis(var: &str) -> Result<Option<Duration>, ConfigError> {
    match env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| ConfigError::InvalidConfiguration(format!("{}: {}", var, e))),
        Err(_) => Ok(None),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvironmentVariable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

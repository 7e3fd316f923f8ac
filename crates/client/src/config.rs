/// Client configuration loaded from environment variables.
///
/// All fields have defaults suitable for a backend running locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Backend base URL (default: `http://localhost:8000`).
    pub api_url: String,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Job-list refetch interval while a job is active (default: `1000`).
    pub poll_interval_ms: u64,
    /// Capacity of each event-stream queue (default: `64`).
    pub stream_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8000".into(),
            request_timeout_secs: 30,
            poll_interval_ms: inspect_core::poll_policy::ACTIVE_REFETCH_INTERVAL_MS,
            stream_buffer: 64,
        }
    }
}

/// Errors raised while reading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("{0} must be set")]
    Missing(&'static str),
}

impl ClientConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default                 |
    /// |--------------------------------|-------------------------|
    /// | `INSPECT_API_URL`              | `http://localhost:8000` |
    /// | `INSPECT_REQUEST_TIMEOUT_SECS` | `30`                    |
    /// | `INSPECT_POLL_INTERVAL_MS`     | `1000`                  |
    /// | `INSPECT_STREAM_BUFFER`        | `64`                    |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) but reads values through
    /// `lookup`, so callers (and tests) can supply their own source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let api_url = lookup("INSPECT_API_URL")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.api_url);

        let request_timeout_secs = parse_var(
            &lookup,
            "INSPECT_REQUEST_TIMEOUT_SECS",
            "a positive integer",
            defaults.request_timeout_secs,
        )?;

        let poll_interval_ms = parse_var(
            &lookup,
            "INSPECT_POLL_INTERVAL_MS",
            "a positive integer",
            defaults.poll_interval_ms,
        )?;

        let stream_buffer = parse_var(
            &lookup,
            "INSPECT_STREAM_BUFFER",
            "a positive integer",
            defaults.stream_buffer,
        )?;

        Ok(Self {
            api_url,
            request_timeout_secs,
            poll_interval_ms,
            stream_buffer,
        })
    }
}

/// Parse a positive number from `var`, falling back to `default` when unset.
fn parse_var<F, T>(
    lookup: &F,
    var: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + PartialEq + Default,
{
    let Some(raw) = lookup(var) else {
        return Ok(default);
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value != T::default() => Ok(value),
        _ => Err(ConfigError::Invalid {
            var,
            expected,
            value: raw,
        }),
    }
}

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;
use tracelane_core::AgentConfig;

use crate::TracelaneError;

pub const DEFAULT_BASE_URL: &str = "https://cloud.tracelane.dev";
pub const DEFAULT_FLUSH_AT: usize = 512;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 2048;
pub const DEFAULT_MAX_CONCURRENT_UPLOADS: usize = 8;

pub const ENV_PUBLIC_KEY: &str = "TRACELANE_PUBLIC_KEY";
pub const ENV_SECRET_KEY: &str = "TRACELANE_SECRET_KEY";
pub const ENV_BASE_URL: &str = "TRACELANE_BASE_URL";
pub const ENV_FLUSH_AT: &str = "TRACELANE_FLUSH_AT";
pub const ENV_FLUSH_INTERVAL: &str = "TRACELANE_FLUSH_INTERVAL";
pub const ENV_TIMEOUT: &str = "TRACELANE_TIMEOUT";
pub const ENV_ADDITIONAL_HEADERS: &str = "TRACELANE_ADDITIONAL_HEADERS";
pub const ENV_EXPORT_MODE: &str = "TRACELANE_EXPORT_MODE";
pub const ENV_ENVIRONMENT: &str = "TRACELANE_TRACING_ENVIRONMENT";
pub const ENV_RELEASE: &str = "TRACELANE_RELEASE";
pub const ENV_PROJECT_ID: &str = "TRACELANE_PROJECT_ID";

/// How ended spans reach the backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExportMode {
    /// One export per span. Suited to short-lived processes.
    Immediate,
    /// Buffered by count and time. Suited to long-running processes.
    #[default]
    Batched,
}

impl FromStr for ExportMode {
    type Err = TracelaneError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(ExportMode::Immediate),
            "batched" => Ok(ExportMode::Batched),
            other => Err(TracelaneError::Config(format!(
                "unknown export mode '{other}', expected 'immediate' or 'batched'"
            ))),
        }
    }
}

#[derive(Clone)]
pub struct TracelaneConfig {
    pub public_key: Option<String>,
    pub secret_key: Option<SecretString>,
    pub base_url: String,
    pub flush_at: usize,
    pub flush_interval: Duration,
    pub timeout: Duration,
    pub additional_headers: BTreeMap<String, String>,
    pub export_mode: ExportMode,
    pub environment: Option<String>,
    pub release: Option<String>,
    pub agent: Option<AgentConfig>,
    /// Bypasses the project lookup during agent resolution.
    pub project_id: Option<String>,
    pub max_queue_size: usize,
    pub max_concurrent_uploads: usize,
}

impl fmt::Debug for TracelaneConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secret_key = if self.secret_key.is_some() {
            "<redacted>"
        } else {
            "<none>"
        };

        f.debug_struct("TracelaneConfig")
            .field("public_key", &self.public_key)
            .field("secret_key", &secret_key)
            .field("base_url", &self.base_url)
            .field("flush_at", &self.flush_at)
            .field("flush_interval", &self.flush_interval)
            .field("timeout", &self.timeout)
            .field("additional_headers", &self.additional_headers.keys())
            .field("export_mode", &self.export_mode)
            .field("environment", &self.environment)
            .field("release", &self.release)
            .field("agent", &self.agent)
            .field("project_id", &self.project_id)
            .finish()
    }
}

impl TracelaneConfig {
    pub fn builder() -> TracelaneConfigBuilder {
        TracelaneConfigBuilder::default()
    }

    /// Configuration taken from `TRACELANE_*` environment variables only.
    pub fn from_env() -> Result<Self, TracelaneError> {
        Self::builder().build()
    }

    pub fn has_credentials(&self) -> bool {
        self.public_key.is_some() && self.secret_key.is_some()
    }
}

#[derive(Default, Clone)]
pub struct TracelaneConfigBuilder {
    public_key: Option<String>,
    secret_key: Option<String>,
    base_url: Option<String>,
    flush_at: Option<usize>,
    flush_interval: Option<Duration>,
    timeout: Option<Duration>,
    additional_headers: Option<BTreeMap<String, String>>,
    export_mode: Option<ExportMode>,
    environment: Option<String>,
    release: Option<String>,
    agent: Option<AgentConfig>,
    project_id: Option<String>,
    max_queue_size: Option<usize>,
    max_concurrent_uploads: Option<usize>,
}

impl TracelaneConfigBuilder {
    pub fn public_key(mut self, value: impl Into<String>) -> Self {
        self.public_key = Some(value.into());
        self
    }

    pub fn secret_key(mut self, value: impl Into<String>) -> Self {
        self.secret_key = Some(value.into());
        self
    }

    pub fn base_url(mut self, value: impl Into<String>) -> Self {
        self.base_url = Some(value.into());
        self
    }

    pub fn flush_at(mut self, value: usize) -> Self {
        self.flush_at = Some(value);
        self
    }

    pub fn flush_interval(mut self, value: Duration) -> Self {
        self.flush_interval = Some(value);
        self
    }

    pub fn timeout(mut self, value: Duration) -> Self {
        self.timeout = Some(value);
        self
    }

    pub fn additional_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_headers
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn export_mode(mut self, value: ExportMode) -> Self {
        self.export_mode = Some(value);
        self
    }

    pub fn environment(mut self, value: impl Into<String>) -> Self {
        self.environment = Some(value.into());
        self
    }

    pub fn release(mut self, value: impl Into<String>) -> Self {
        self.release = Some(value.into());
        self
    }

    pub fn agent(mut self, value: AgentConfig) -> Self {
        self.agent = Some(value);
        self
    }

    pub fn project_id(mut self, value: impl Into<String>) -> Self {
        self.project_id = Some(value.into());
        self
    }

    pub fn max_queue_size(mut self, value: usize) -> Self {
        self.max_queue_size = Some(value);
        self
    }

    pub fn max_concurrent_uploads(mut self, value: usize) -> Self {
        self.max_concurrent_uploads = Some(value);
        self
    }

    /// Resolves against the process environment.
    pub fn build(self) -> Result<TracelaneConfig, TracelaneError> {
        self.build_with_lookup(|name| std::env::var(name).ok())
    }

    /// Resolves each field as builder value, then `lookup(ENV_NAME)`, then
    /// the default.
    pub fn build_with_lookup<F>(self, lookup: F) -> Result<TracelaneConfig, TracelaneError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let public_key = self.public_key.or_else(|| env(ENV_PUBLIC_KEY));
        let secret_key = self.secret_key.or_else(|| env(ENV_SECRET_KEY));
        let base_url = self
            .base_url
            .or_else(|| env(ENV_BASE_URL))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        reqwest::Url::parse(&base_url)
            .map_err(|err| TracelaneError::Config(format!("invalid base_url: {err}")))?;

        let flush_at = match self.flush_at {
            Some(value) => value,
            None => parse_env(env(ENV_FLUSH_AT), ENV_FLUSH_AT)?.unwrap_or(DEFAULT_FLUSH_AT),
        };
        if flush_at == 0 {
            return Err(TracelaneError::Config(
                "flush_at must be greater than 0".to_string(),
            ));
        }
        let flush_interval = match self.flush_interval {
            Some(value) => value,
            None => parse_seconds(env(ENV_FLUSH_INTERVAL), ENV_FLUSH_INTERVAL)?
                .unwrap_or(DEFAULT_FLUSH_INTERVAL),
        };
        let timeout = match self.timeout {
            Some(value) => value,
            None => parse_seconds(env(ENV_TIMEOUT), ENV_TIMEOUT)?.unwrap_or(DEFAULT_TIMEOUT),
        };
        let additional_headers = match self.additional_headers {
            Some(headers) => headers,
            None => env(ENV_ADDITIONAL_HEADERS)
                .map(|raw| parse_headers(&raw))
                .unwrap_or_default(),
        };
        let export_mode = match self.export_mode {
            Some(mode) => mode,
            None => env(ENV_EXPORT_MODE)
                .map(|raw| raw.parse())
                .transpose()?
                .unwrap_or_default(),
        };

        let config = TracelaneConfig {
            public_key,
            secret_key: secret_key.map(SecretString::new),
            base_url,
            flush_at,
            flush_interval,
            timeout,
            additional_headers,
            export_mode,
            environment: self.environment.or_else(|| env(ENV_ENVIRONMENT)),
            release: self.release.or_else(|| env(ENV_RELEASE)),
            agent: self.agent,
            project_id: self.project_id.or_else(|| env(ENV_PROJECT_ID)),
            max_queue_size: self.max_queue_size.unwrap_or(DEFAULT_MAX_QUEUE_SIZE),
            max_concurrent_uploads: self
                .max_concurrent_uploads
                .unwrap_or(DEFAULT_MAX_CONCURRENT_UPLOADS)
                .max(1),
        };

        if config.public_key.is_none() {
            tracing::warn!(
                env = ENV_PUBLIC_KEY,
                "no public key configured; spans will not be accepted by the backend"
            );
        }
        if config.secret_key.is_none() {
            tracing::warn!(
                env = ENV_SECRET_KEY,
                "no secret key configured; spans will not be accepted by the backend"
            );
        }

        Ok(config)
    }
}

fn parse_env<T: FromStr>(raw: Option<String>, name: &str) -> Result<Option<T>, TracelaneError> {
    raw.map(|value| {
        value
            .trim()
            .parse::<T>()
            .map_err(|_| TracelaneError::Config(format!("{name} has invalid value '{value}'")))
    })
    .transpose()
}

fn parse_seconds(raw: Option<String>, name: &str) -> Result<Option<Duration>, TracelaneError> {
    match parse_env::<f64>(raw, name)? {
        Some(seconds) if seconds.is_finite() && seconds >= 0.0 => {
            Ok(Some(Duration::from_secs_f64(seconds)))
        }
        Some(seconds) => Err(TracelaneError::Config(format!(
            "{name} must be a non-negative number of seconds, got {seconds}"
        ))),
        None => Ok(None),
    }
}

fn parse_headers(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_parse_from_comma_separated_pairs() {
        let headers = parse_headers("x-team=core, x-region = eu ,broken,=empty");
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("x-team").map(String::as_str), Some("core"));
        assert_eq!(headers.get("x-region").map(String::as_str), Some("eu"));
    }
}

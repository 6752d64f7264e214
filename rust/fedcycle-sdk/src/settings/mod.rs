//! Settings of a job, and loading of worker settings from a configuration file.
//!
//! [`JobSettings`] is all a [`Job`] needs, and can be built in code. [`Settings`] are the
//! settings of a worker process: they are loaded from a TOML file whose values can be
//! overridden by environment variables, then validated. An example configuration file can be
//! found in the `configs/` directory located in the repository root.
//!
//! [`Job`]: crate::Job

use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, ConfigError, Environment, File};
use serde::{
    de::{self, Deserializer, Visitor},
    Deserialize,
};
use serde_json::Value;
use thiserror::Error;
use tracing_subscriber::filter::EnvFilter;
use url::Url;
use validator::{Validate, ValidationError, ValidationErrors};

use fedcycle_core::{
    crypto::{self, Algorithm, Claims, CredentialError, SigningKey},
    AuthToken,
    ConnectionStats,
    JobDescriptor,
    PlanFormat,
};

use crate::retry::RetryPolicy;

/// How a worker proves its identity to the coordination service.
#[derive(Debug, Clone)]
pub enum Credentials {
    /// The service does not require authentication.
    None,
    /// A token issued beforehand.
    Token(AuthToken),
    /// Claims to sign when the job starts.
    Signed {
        algorithm: Algorithm,
        key: SigningKey,
        claims: Claims,
    },
}

impl Default for Credentials {
    fn default() -> Self {
        Credentials::None
    }
}

impl Credentials {
    /// Produce the token to authenticate with, signing it if needed.
    ///
    /// # Errors
    /// Fails if the claims cannot be signed with the given key and algorithm.
    pub fn resolve(&self) -> Result<Option<AuthToken>, CredentialError> {
        match self {
            Credentials::None => Ok(None),
            Credentials::Token(token) => Ok(Some(token.clone())),
            Credentials::Signed {
                algorithm,
                key,
                claims,
            } => crypto::sign(claims, key, *algorithm).map(Some),
        }
    }
}

/// Everything a job needs to know, besides the client it talks through.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub job: JobDescriptor,
    pub credentials: Credentials,
    pub retry: RetryPolicy,
    /// Connection characteristics reported with every cycle request.
    pub connection: ConnectionStats,
    /// Representation in which plans are downloaded.
    pub plan_format: PlanFormat,
}

impl JobSettings {
    /// Settings for joining `job` without credentials and with the default retry policy.
    pub fn new(job: JobDescriptor) -> Self {
        Self {
            job,
            credentials: Credentials::None,
            retry: RetryPolicy::default(),
            connection: ConnectionStats::default(),
            plan_format: PlanFormat::default(),
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_connection(mut self, connection: ConnectionStats) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_plan_format(mut self, plan_format: PlanFormat) -> Self {
        self.plan_format = plan_format;
        self
    }
}

#[derive(Error, Debug)]
/// An error related to loading and validation of settings.
pub enum SettingsError {
    #[error("configuration loading failed: {0}")]
    Loading(#[from] ConfigError),
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationErrors),
    #[error("invalid credentials: {0}")]
    Credentials(#[from] CredentialError),
}

#[derive(Debug, Validate, Deserialize)]
/// The combined settings of a worker.
///
/// Each section in the configuration file corresponds to the identically named settings field.
pub struct Settings {
    #[validate]
    pub api: ApiSettings,
    #[validate]
    pub job: JobSection,
    #[validate]
    pub retry: RetrySettings,
    #[serde(default)]
    pub connection: ConnectionStats,
    #[serde(default)]
    #[validate]
    pub credentials: CredentialSettings,
    #[serde(default)]
    pub log: LoggingSettings,
}

impl Settings {
    /// Loads and validates the settings via a configuration file.
    ///
    /// # Errors
    /// Fails when the loading of the configuration file or its validation failed.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let settings: Settings = Self::load(path)?;
        settings.validate()?;
        Ok(settings)
    }

    fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("FEDCYCLE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()
    }

    /// The settings of the jobs run by the worker. Signing keys are decoded here, but the
    /// claims are only signed when a job starts.
    ///
    /// # Errors
    /// Fails if the credentials cannot be decoded.
    pub fn job_settings(&self) -> Result<JobSettings, SettingsError> {
        Ok(JobSettings {
            job: JobDescriptor::new(&self.job.model_name, &self.job.model_version),
            credentials: self.credentials.to_credentials()?,
            retry: self.retry.policy(),
            connection: self.connection,
            plan_format: self.job.plan_format,
        })
    }
}

/// The coordination service settings.
#[derive(Debug, Validate, Deserialize)]
pub struct ApiSettings {
    /// The base URL of the coordination service. Only `http` and `https` are supported.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [api]
    /// url = "http://127.0.0.1:5000"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDCYCLE_API__URL=http://127.0.0.1:5000
    /// ```
    #[validate(custom = "validate_api_url")]
    pub url: String,

    /// Timeout of a single HTTP request, in seconds. No timeout if absent.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Trusted root certificates, in DER or PEM format. Only used with the `tls` feature.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [api]
    /// certificates = ["/etc/fedcycle/ca.pem"]
    /// ```
    #[serde(default)]
    pub certificates: Option<Vec<PathBuf>>,
}

impl ApiSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

fn validate_api_url(url: &str) -> Result<(), ValidationError> {
    match Url::parse(url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => Ok(()),
        _ => Err(ValidationError::new("invalid API URL")),
    }
}

/// The job the worker takes part in.
#[derive(Debug, Validate, Deserialize)]
pub struct JobSection {
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [job]
    /// model_name = "mnist"
    /// model_version = "1.0.0"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDCYCLE_JOB__MODEL_NAME=mnist
    /// FEDCYCLE_JOB__MODEL_VERSION=1.0.0
    /// ```
    #[validate(length(min = 1))]
    pub model_name: String,
    #[validate(length(min = 1))]
    pub model_version: String,
    /// One of `list`, `torchscript` or `tfjs`. Defaults to `list`.
    #[serde(default)]
    pub plan_format: PlanFormat,
}

/// Retry policy for transient failures. Delays are in milliseconds.
#[derive(Debug, Validate, Deserialize, Clone, Copy)]
pub struct RetrySettings {
    /// Total number of attempts per call, the first one included.
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [retry]
    /// max_attempts = 5
    /// base_delay_ms = 500
    /// multiplier = 2.0
    /// max_delay_ms = 30000
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDCYCLE_RETRY__MAX_ATTEMPTS=5
    /// ```
    #[validate(range(min = 1))]
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Use `1.0` for a fixed delay.
    #[validate(range(min = 1.0))]
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

/// Authentication settings. Either a pre-issued `token`, or an `algorithm` and a base64
/// encoded `key` to sign `claims` with. Without either, the worker does not authenticate.
///
/// # Examples
///
/// **TOML**
/// ```text
/// [credentials]
/// algorithm = "HS256"
/// key = "c2VjcmV0"
///
/// [credentials.claims]
/// sub = "worker-1"
/// ```
///
/// **Environment variable**
/// ```text
/// FEDCYCLE_CREDENTIALS__TOKEN=eyJhbGciOiJIUzI1NiJ9.e30.c2lnbmF0dXJl
/// ```
#[derive(Debug, Default, Validate, Deserialize)]
#[validate(schema(function = "validate_credentials"))]
pub struct CredentialSettings {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub claims: BTreeMap<String, Value>,
}

fn validate_credentials(s: &CredentialSettings) -> Result<(), ValidationError> {
    match (&s.token, &s.algorithm, &s.key) {
        (Some(_), None, None) | (None, None, None) | (None, Some(_), Some(_)) => Ok(()),
        _ => Err(ValidationError::new(
            "credentials need either a token or both an algorithm and a key",
        )),
    }
}

impl CredentialSettings {
    /// Decode the credentials.
    ///
    /// # Errors
    /// Fails if the algorithm is unknown or the key cannot be decoded for it.
    pub fn to_credentials(&self) -> Result<Credentials, CredentialError> {
        if let Some(token) = &self.token {
            return Ok(Credentials::Token(AuthToken::new(token.as_str())));
        }
        match (&self.algorithm, &self.key) {
            (Some(algorithm), Some(key)) => {
                let algorithm: Algorithm = algorithm.parse()?;
                Ok(Credentials::Signed {
                    algorithm,
                    key: SigningKey::from_base64(algorithm, key)?,
                    claims: Claims::from(self.claims.clone()),
                })
            }
            _ => Ok(Credentials::None),
        }
    }
}

#[derive(Debug, Deserialize)]
/// The logging settings.
pub struct LoggingSettings {
    /// A comma-separated list of logging directives. More information about logging directives
    /// can be found [here].
    ///
    /// # Examples
    ///
    /// **TOML**
    /// ```text
    /// [log]
    /// filter = "info"
    /// ```
    ///
    /// **Environment variable**
    /// ```text
    /// FEDCYCLE_LOG__FILTER=info
    /// ```
    ///
    /// [here]: https://docs.rs/tracing-subscriber/0.3/tracing_subscriber/filter/struct.EnvFilter.html#directives
    #[serde(deserialize_with = "deserialize_env_filter")]
    pub filter: EnvFilter,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: EnvFilter::new("info"),
        }
    }
}

fn deserialize_env_filter<'de, D>(deserializer: D) -> Result<EnvFilter, D::Error>
where
    D: Deserializer<'de>,
{
    struct EnvFilterVisitor;

    impl<'de> Visitor<'de> for EnvFilterVisitor {
        type Value = EnvFilter;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            write!(formatter, "a valid tracing filter directive: https://docs.rs/tracing-subscriber/0.3/tracing_subscriber/filter/struct.EnvFilter.html#directives")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            EnvFilter::try_new(value)
                .map_err(|_| de::Error::invalid_value(serde::de::Unexpected::Str(value), &self))
        }
    }

    deserializer.deserialize_str(EnvFilterVisitor)
}

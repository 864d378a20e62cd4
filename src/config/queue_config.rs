/// Configuration for the job queue: broker credentials, naming and retries.
use std::{env, path::PathBuf};

use crate::{
    config::ConfigError,
    constants::{
        DEFAULT_MAX_RETRIES, DEFAULT_PUBSUB_API_ENDPOINT, DEFAULT_RETRY_BASE_DELAY_MS,
        DEFAULT_RETRY_MAX_DELAY_MS,
    },
    models::ServiceAccountCredentials,
    utils::ensure_env_value,
};

pub const TOPIC_SUFFIX_ENV: &str = "GOOGLE_PUBSUB_TOPIC_SUFFIX";
pub const SUBSCRIPTION_SUFFIX_ENV: &str = "GOOGLE_PUBSUB_SUBSCRIPTION_NAME";

#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig {
    /// Service account used to authenticate. Required by producers and workers.
    pub credentials: Option<ServiceAccountCredentials>,
    /// The Google Cloud project that owns the topics and subscriptions.
    pub project_id: String,
    /// Appended to job names to build topic names: `<job>-<topic_suffix>`.
    pub topic_suffix: String,
    /// Appended to job names to build subscription names: `<job>-<subscription_suffix>`.
    pub subscription_suffix: String,
    /// Base URL of the Pub/Sub REST API.
    pub api_endpoint: String,
    /// `host:port` of a Pub/Sub emulator. Requests are sent unauthenticated when set.
    pub emulator_host: Option<String>,
    /// Retries after the first failed attempt of publish, ack and nack.
    pub max_retries: usize,
    /// Base delay for exponential backoff between retries. Zero disables delays.
    pub retry_base_delay_ms: u64,
    /// Upper bound for a single backoff delay.
    pub retry_max_delay_ms: u64,
    /// Logs job data and payload bytes on every publish and delivery.
    pub debug: bool,
}

impl QueueConfig {
    pub fn new(
        project_id: impl Into<String>,
        topic_suffix: impl Into<String>,
        subscription_suffix: impl Into<String>,
    ) -> Self {
        Self {
            credentials: None,
            project_id: project_id.into(),
            topic_suffix: topic_suffix.into(),
            subscription_suffix: subscription_suffix.into(),
            api_endpoint: DEFAULT_PUBSUB_API_ENDPOINT.to_string(),
            emulator_host: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            debug: false,
        }
    }

    pub fn with_credentials(mut self, credentials: ServiceAccountCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_emulator_host(mut self, host: impl Into<String>) -> Self {
        self.emulator_host = Some(host.into());
        self
    }

    pub fn with_api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.api_endpoint = endpoint.into();
        self
    }

    pub fn with_retries(mut self, max_retries: usize, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_base_delay_ms = base_delay_ms;
        self.retry_max_delay_ms = max_delay_ms;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Creates a new `QueueConfig` instance from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` when `GOOGLE_CLOUD_PROJECT` is not set.
    /// Missing credentials are not an error here; they are rejected when a
    /// producer or worker is constructed.
    ///
    /// # Defaults
    ///
    /// - `GOOGLE_PUBSUB_TOPIC_SUFFIX` / `GOOGLE_PUBSUB_SUBSCRIPTION_NAME` are
    ///   generated and appended to `ENV_FILE_PATH` (default `.env`) when unset.
    /// - `PUBSUB_API_ENDPOINT` defaults to `https://pubsub.googleapis.com`.
    /// - `PUBSUB_MAX_RETRIES` defaults to `200`.
    /// - `PUBSUB_RETRY_BASE_DELAY_MS` defaults to `100`.
    /// - `PUBSUB_RETRY_MAX_DELAY_MS` defaults to `5000`.
    /// - `PUBSUB_DEBUG` defaults to `false`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let project_id = env::var("GOOGLE_CLOUD_PROJECT")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("GOOGLE_CLOUD_PROJECT".to_string()))?;

        let env_file =
            PathBuf::from(env::var("ENV_FILE_PATH").unwrap_or_else(|_| ".env".to_string()));
        let topic_suffix = ensure_env_value(TOPIC_SUFFIX_ENV, &env_file)?;
        let subscription_suffix = ensure_env_value(SUBSCRIPTION_SUFFIX_ENV, &env_file)?;

        let credentials = match (
            env::var("GOOGLE_CREDENTIAL_CLIENT_EMAIL"),
            env::var("GOOGLE_CREDENTIAL_PRIVATE_KEY"),
        ) {
            (Ok(client_email), Ok(private_key)) => {
                // Keys exported through .env files usually carry literal `\n`.
                let private_key = private_key.replace("\\n", "\n");
                let creds = ServiceAccountCredentials::new(&client_email, &private_key);
                Some(match env::var("GOOGLE_CREDENTIAL_PRIVATE_KEY_ID") {
                    Ok(id) => creds.with_private_key_id(&id),
                    Err(_) => creds,
                })
            }
            _ => None,
        };

        Ok(Self {
            credentials,
            project_id,
            topic_suffix,
            subscription_suffix,
            api_endpoint: env::var("PUBSUB_API_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_PUBSUB_API_ENDPOINT.to_string()),
            emulator_host: env::var("PUBSUB_EMULATOR_HOST")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            max_retries: env::var("PUBSUB_MAX_RETRIES")
                .unwrap_or_else(|_| DEFAULT_MAX_RETRIES.to_string())
                .parse()
                .unwrap_or(DEFAULT_MAX_RETRIES),
            retry_base_delay_ms: env::var("PUBSUB_RETRY_BASE_DELAY_MS")
                .unwrap_or_else(|_| DEFAULT_RETRY_BASE_DELAY_MS.to_string())
                .parse()
                .unwrap_or(DEFAULT_RETRY_BASE_DELAY_MS),
            retry_max_delay_ms: env::var("PUBSUB_RETRY_MAX_DELAY_MS")
                .unwrap_or_else(|_| DEFAULT_RETRY_MAX_DELAY_MS.to_string())
                .parse()
                .unwrap_or(DEFAULT_RETRY_MAX_DELAY_MS),
            debug: env::var("PUBSUB_DEBUG")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(false),
        })
    }

    /// Checks everything a producer or worker needs before it touches the broker.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let credentials = self.credentials.as_ref().ok_or_else(|| {
            ConfigError::MissingCredentials(
                "`credentials` is required for setting up Google Cloud Pub/Sub".to_string(),
            )
        })?;
        credentials.validate()?;

        if self.project_id.trim().is_empty() {
            return Err(ConfigError::MissingField("project_id".to_string()));
        }
        if self.topic_suffix.trim().is_empty() {
            return Err(ConfigError::MissingField("topic_suffix".to_string()));
        }
        if self.subscription_suffix.trim().is_empty() {
            return Err(ConfigError::MissingField("subscription_suffix".to_string()));
        }
        Ok(())
    }

    pub fn topic_name(&self, job_name: &str) -> String {
        format!("{}-{}", job_name, self.topic_suffix)
    }

    pub fn subscription_name(&self, job_name: &str) -> String {
        format!("{}-{}", job_name, self.subscription_suffix)
    }

    /// Base URL requests are sent to, honouring the emulator host.
    pub fn base_url(&self) -> String {
        match &self.emulator_host {
            Some(host) if host.starts_with("http") => host.trim_end_matches('/').to_string(),
            Some(host) => format!("http://{}", host.trim_end_matches('/')),
            None => self.api_endpoint.trim_end_matches('/').to_string(),
        }
    }
}

//! Construction parameters for transports, consumers and producers.
//!
//! Every config can be built in code, parsed from JSON (durations are given
//! in milliseconds) or, for the transport, read from the environment.

use std::{env, time::Duration};

use serde::de::DeserializeOwned;
use serde_derive::Deserialize;

use crate::{
    error::{Error, Result},
    DEFAULT_CLIENT_ID,
};

const URL_VAR: &str = "SLUICE_URL";
const CLIENT_ID_VAR: &str = "SLUICE_CLIENT_ID";

const DEFAULT_COMMIT_INTERVAL_MS: u64 = 2800;
const DEFAULT_MAX_POLL_RECORDS: usize = 500;
const DEFAULT_FETCH_MAX_WAIT_MS: u64 = 200;
const DEFAULT_BUFFER_CAPACITY: usize = 1000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5000;

const DEFAULT_MAX_BATCH_SIZE: usize = 100;
const DEFAULT_LINGER_MS: u64 = 5;
const DEFAULT_PRODUCE_TIMEOUT_MS: u64 = 1000;
const DEFAULT_DELIVERY_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// Parse any config type from a JSON document.
pub fn from_json<T: DeserializeOwned>(json: &str) -> Result<T> {
    Ok(serde_json::from_str(json)?)
}

/// Where the broker lives and who we are.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Broker endpoint, the scheme selects the backend (`memory://orders`).
    pub url: String,
    pub client_id: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            client_id: DEFAULT_CLIENT_ID.to_owned(),
        }
    }
}

impl TransportConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Read `SLUICE_URL` and, optionally, `SLUICE_CLIENT_ID`.
    pub fn from_env() -> Result<Self> {
        let url = env::var(URL_VAR)
            .map_err(|_| Error::Configuration(format!("{} is not set", URL_VAR)))?;
        let client_id = env::var(CLIENT_ID_VAR).unwrap_or_else(|_| DEFAULT_CLIENT_ID.to_owned());
        Ok(Self { url, client_id })
    }

    /// Split the url into its scheme and the remainder.
    pub fn scheme(&self) -> Result<(&str, &str)> {
        self.url
            .split_once("://")
            .filter(|(scheme, _)| !scheme.is_empty())
            .ok_or_else(|| Error::Configuration(format!("malformed transport url {:?}", self.url)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(Error::Configuration("transport url is required".into()));
        }
        if self.client_id.is_empty() {
            return Err(Error::Configuration("client id must not be empty".into()));
        }
        self.scheme()?;
        Ok(())
    }
}

/// Where a consumer starts when its group has no committed offset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoOffsetReset {
    Earliest,
    Latest,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub group_id: String,
    pub client_id: String,
    /// Acknowledge each message once the callback returns successfully.
    pub autoack: bool,
    /// Period of the automatic commit cycle, `None` disables it.
    #[serde(rename = "commit_interval_ms", with = "optional_millis")]
    pub commit_interval: Option<Duration>,
    pub auto_offset_reset: AutoOffsetReset,
    pub max_poll_records: usize,
    #[serde(rename = "fetch_max_wait_ms", with = "millis")]
    pub fetch_max_wait: Duration,
    /// Messages buffered between the fetch task and the callback.
    pub buffer_capacity: usize,
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,
    #[serde(rename = "retry_backoff_ms", with = "millis")]
    pub retry_backoff: Duration,
    pub max_retries: u32,
    pub commit_on_close: bool,
    #[serde(rename = "shutdown_timeout_ms", with = "millis")]
    pub shutdown_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: String::new(),
            client_id: DEFAULT_CLIENT_ID.to_owned(),
            autoack: true,
            commit_interval: Some(Duration::from_millis(DEFAULT_COMMIT_INTERVAL_MS)),
            auto_offset_reset: AutoOffsetReset::Earliest,
            max_poll_records: DEFAULT_MAX_POLL_RECORDS,
            fetch_max_wait: Duration::from_millis(DEFAULT_FETCH_MAX_WAIT_MS),
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            commit_on_close: true,
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
        }
    }
}

impl ConsumerConfig {
    pub fn new(group_id: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.group_id.is_empty() {
            return Err(Error::Configuration("consumer group id is required".into()));
        }
        if self.max_poll_records == 0 {
            return Err(Error::Configuration("max_poll_records must be positive".into()));
        }
        if self.buffer_capacity == 0 {
            return Err(Error::Configuration("buffer_capacity must be positive".into()));
        }
        if self.commit_interval == Some(Duration::ZERO) {
            return Err(Error::Configuration(
                "commit_interval must be positive, use None to disable".into(),
            ));
        }
        Ok(())
    }
}

/// How many replicas must have a record before the broker acknowledges it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Acks {
    None,
    Leader,
    All,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    pub client_id: String,
    pub acks: Acks,
    /// Records per batch before the queue is flushed.
    pub max_batch_size: usize,
    /// Longest a record waits in the queue for its batch to fill.
    #[serde(rename = "linger_ms", with = "millis")]
    pub linger: Duration,
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,
    /// Bound used by `send_and_wait`.
    #[serde(rename = "delivery_timeout_ms", with = "millis")]
    pub delivery_timeout: Duration,
    pub max_retries: u32,
    #[serde(rename = "retry_backoff_ms", with = "millis")]
    pub retry_backoff: Duration,
    pub queue_capacity: usize,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            client_id: DEFAULT_CLIENT_ID.to_owned(),
            acks: Acks::Leader,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            linger: Duration::from_millis(DEFAULT_LINGER_MS),
            request_timeout: Duration::from_millis(DEFAULT_PRODUCE_TIMEOUT_MS),
            delivery_timeout: Duration::from_millis(DEFAULT_DELIVERY_TIMEOUT_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ProducerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(Error::Configuration("max_batch_size must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Configuration("queue_capacity must be positive".into()));
        }
        if self.linger.is_zero() {
            return Err(Error::Configuration("linger must be positive".into()));
        }
        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}

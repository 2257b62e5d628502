//! Settings read from the environment. Everything a run needs beyond its command line lives here.

use std::collections::HashMap;
use std::time::Duration;

use kgrep_core::tail::DEFAULT_POLL_INTERVAL;
use kgrep_core::{Error, Result};

const ENV_LOG_FORMAT: &str = "KGREP_LOG_FORMAT";
const ENV_POLL_INTERVAL_MS: &str = "KGREP_POLL_INTERVAL_MS";
const ENV_REQUEST_TIMEOUT_MS: &str = "KGREP_REQUEST_TIMEOUT_MS";

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub log_format: LogFormat,
    /// How long a single tail poll waits for a message, which bounds the cancellation latency.
    pub poll_interval: Duration,
    /// Timeout of broker requests other than reads.
    pub request_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_format: LogFormat::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

impl Settings {
    pub fn load(
        env_vars: impl IntoIterator<Item = (impl Into<String>, impl Into<String>)>,
    ) -> Result<Self> {
        let env_vars: HashMap<String, String> = env_vars
            .into_iter()
            .map(|(key, val)| (key.into(), val.into()))
            .filter(|(key, _val)| {
                [ENV_LOG_FORMAT, ENV_POLL_INTERVAL_MS, ENV_REQUEST_TIMEOUT_MS]
                    .contains(&key.as_str())
            })
            .collect();

        let mut settings = Settings::default();

        if let Some(format) = env_vars.get(ENV_LOG_FORMAT) {
            settings.log_format = match format.to_lowercase().as_str() {
                "json" => LogFormat::Json,
                "text" | "" => LogFormat::Text,
                other => {
                    return Err(Error::Config(format!(
                        "{ENV_LOG_FORMAT} must be 'text' or 'json', got '{other}'"
                    )));
                }
            };
        }
        if let Some(ms) = env_vars.get(ENV_POLL_INTERVAL_MS) {
            settings.poll_interval = positive_millis(ENV_POLL_INTERVAL_MS, ms)?;
        }
        if let Some(ms) = env_vars.get(ENV_REQUEST_TIMEOUT_MS) {
            settings.request_timeout = positive_millis(ENV_REQUEST_TIMEOUT_MS, ms)?;
        }

        Ok(settings)
    }
}

fn positive_millis(var: &str, value: &str) -> Result<Duration> {
    let ms: u64 = value
        .parse()
        .map_err(|e| Error::Config(format!("{var} is not a number of milliseconds: {e:?}")))?;
    if ms == 0 {
        return Err(Error::Config(format!("{var} must be greater than zero")));
    }
    Ok(Duration::from_millis(ms))
}

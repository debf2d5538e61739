use serde::{Deserialize, Deserializer};
use serde_aux::field_attributes::deserialize_number_from_string;
use std::time::Duration;

const DEFAULT_RECONNECT_ATTEMPTS: u32 = 20;
const DEFAULT_RECONNECT_WAIT: Duration = Duration::from_secs(2);
const DEFAULT_LIVENESS_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
/// How a [`Connector`](super::Connector) (re)establishes its connection.
///
/// The wait between attempts is fixed: no exponential backoff, no jitter.
pub struct ConnectorConfig {
    /// Dial attempts before giving up. The budget is restored after every successful dial.
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub reconnect_attempts: u32,
    /// Wait between two consecutive dial attempts.
    #[serde(rename = "reconnect_wait_ms", deserialize_with = "millis")]
    pub reconnect_wait: Duration,
    /// How often a live connection is checked for closure, on top of the errors
    /// notified by the broker.
    #[serde(rename = "liveness_check_interval_ms", deserialize_with = "millis")]
    pub liveness_check_interval: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_wait: DEFAULT_RECONNECT_WAIT,
            liveness_check_interval: DEFAULT_LIVENESS_CHECK_INTERVAL,
        }
    }
}

impl ConnectorConfig {
    #[must_use]
    pub fn with_reconnect_attempts(mut self, reconnect_attempts: u32) -> Self {
        self.reconnect_attempts = reconnect_attempts;
        self
    }

    #[must_use]
    pub fn with_reconnect_wait(mut self, reconnect_wait: Duration) -> Self {
        self.reconnect_wait = reconnect_wait;
        self
    }

    #[must_use]
    pub fn with_liveness_check_interval(mut self, liveness_check_interval: Duration) -> Self {
        self.liveness_check_interval = liveness_check_interval;
        self
    }
}

fn millis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    deserialize_number_from_string::<u64, D>(deserializer).map(Duration::from_millis)
}

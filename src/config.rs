use crate::error::SessionError;
use std::time::Duration;

pub(crate) const MIN_INTERVAL: Duration = Duration::from_secs(1);
pub(crate) const MAX_INTERVAL: Duration = Duration::from_secs(3600);
pub(crate) const MIN_PAYLOAD_SIZE: usize = 4;
pub(crate) const MAX_PAYLOAD_SIZE: usize = 256;
pub(crate) const MIN_TIMEOUT: Duration = Duration::from_secs(1);
pub(crate) const MAX_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-session configuration. Validated before any socket is opened.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Number of rounds, 0 = unbounded until stopped.
    pub count: u32,
    /// Pause between round starts, 1s..=3600s.
    pub interval: Duration,
    /// Filler bytes appended after the embedded send timestamp, 4..=256.
    pub payload_size: usize,
    /// Per-round reply deadline, 1s..=30s.
    pub timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            count: 4,
            interval: Duration::from_secs(1),
            payload_size: 56,
            timeout: Duration::from_secs(1),
        }
    }
}

impl SessionConfig {
    pub(crate) fn validate(&self) -> Result<(), SessionError> {
        if self.interval < MIN_INTERVAL || self.interval > MAX_INTERVAL {
            return Err(SessionError::Argument(format!(
                "interval must be within [{}s, {}s], got {:?}",
                MIN_INTERVAL.as_secs(),
                MAX_INTERVAL.as_secs(),
                self.interval
            )));
        }
        if self.payload_size < MIN_PAYLOAD_SIZE || self.payload_size > MAX_PAYLOAD_SIZE {
            return Err(SessionError::Argument(format!(
                "payload size must be within [{MIN_PAYLOAD_SIZE}, {MAX_PAYLOAD_SIZE}], got {}",
                self.payload_size
            )));
        }
        if self.timeout < MIN_TIMEOUT || self.timeout > MAX_TIMEOUT {
            return Err(SessionError::Argument(format!(
                "timeout must be within [{}s, {}s], got {:?}",
                MIN_TIMEOUT.as_secs(),
                MAX_TIMEOUT.as_secs(),
                self.timeout
            )));
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn interval_micros(&self) -> u64 {
        self.interval.as_micros() as u64
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn timeout_micros(&self) -> u64 {
        self.timeout.as_micros() as u64
    }
}

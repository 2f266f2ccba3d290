use std::time::Duration;

use crate::icmp::packet::process_identifier;
use crate::icmp::probe::{MalformedReplyPolicy, ProbeOptions};
use crate::tiebreaker::errors::ConfigError;

pub const MIN_TOKEN_TIMEOUT: Duration = Duration::from_secs(2);
pub const MIN_PING_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TiebreakerConfig {
    /// host name or IPv4 literal of the tiebreaker, typically the default gateway
    pub target: String,

    /// the cluster's failure detection window; thresholds are derived from it so that the
    ///  tiebreaker's vote changes only after the cluster has noticed a partition
    pub token_timeout: Duration,
    /// base for the ping cadence; the actual interval is a third longer
    pub ping_interval: Duration,
    pub probe_timeout: Duration,
    pub malformed_reply: MalformedReplyPolicy,

    /// allows a lone surviving member to become quorate if it can reach the tiebreaker
    pub allow_soft_quorum: bool,

    pub device_name: String,
    pub device_votes: u32,
}

impl TiebreakerConfig {
    pub fn new(target: impl Into<String>) -> TiebreakerConfig {
        TiebreakerConfig {
            target: target.into(),
            token_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(1),
            malformed_reply: MalformedReplyPolicy::SkipAndContinue,
            allow_soft_quorum: false,
            device_name: "QNet".to_string(),
            device_votes: 1,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target.is_empty() {
            return Err(ConfigError::MissingTarget);
        }
        if self.token_timeout < MIN_TOKEN_TIMEOUT {
            return Err(ConfigError::TokenTimeoutTooShort { actual: self.token_timeout, minimum: MIN_TOKEN_TIMEOUT });
        }
        if self.ping_interval.is_zero() {
            return Err(ConfigError::ZeroPingInterval);
        }
        if self.ping_interval < MIN_PING_INTERVAL {
            return Err(ConfigError::PingIntervalTooShort { actual: self.ping_interval, minimum: MIN_PING_INTERVAL });
        }
        if self.probe_timeout.is_zero() {
            return Err(ConfigError::ZeroProbeTimeout);
        }
        self.token_timeout_micros()?;
        self.ping_interval_micros()?;
        Ok(())
    }

    pub fn token_timeout_micros(&self) -> Result<u64, ConfigError> {
        u64::try_from(self.token_timeout.as_micros())
            .map_err(|_| ConfigError::OutOfRange("token timeout"))
    }

    pub fn ping_interval_micros(&self) -> Result<u64, ConfigError> {
        u64::try_from(self.ping_interval.as_micros())
            .map_err(|_| ConfigError::OutOfRange("ping interval"))
    }

    pub fn probe_options(&self) -> ProbeOptions {
        ProbeOptions {
            timeout: Some(self.probe_timeout),
            malformed_reply: self.malformed_reply,
            identifier: process_identifier(),
        }
    }
}

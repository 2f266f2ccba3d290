use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ConfigError {
    #[error("failover time of {token_timeout_micros}µs is too fast for an IP based tiebreaker (minimum {minimum_micros}µs)")]
    FailoverTooFast { token_timeout_micros: u64, minimum_micros: u64 },
    #[error("token timeout {actual:?} is below the minimum of {minimum:?}")]
    TokenTimeoutTooShort { actual: Duration, minimum: Duration },
    #[error("ping interval {actual:?} is below the minimum of {minimum:?}")]
    PingIntervalTooShort { actual: Duration, minimum: Duration },
    #[error("ping interval must not be zero")]
    ZeroPingInterval,
    #[error("probe timeout must not be zero")]
    ZeroProbeTimeout,
    #[error("no tiebreaker address configured")]
    MissingTarget,
    #[error("{0} is out of range")]
    OutOfRange(&'static str),
}

#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum StartError {
    #[error("the liveness monitor has no target - configure it before starting")]
    NotConfigured,
}

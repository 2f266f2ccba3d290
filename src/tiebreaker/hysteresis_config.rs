use std::time::Duration;

use tracing::{error, info};

use crate::tiebreaker::errors::ConfigError;

/// Token timeouts below this are too fast to be tracked by pinging
pub const MIN_TOKEN_TIMEOUT_MICROS: u64 = 2_000_000;

/// Probe cadence and hysteresis thresholds of the liveness monitor, derived from the cluster's
///  token timeout (its failure detection window).
///
/// The tiebreaker must never look 'alive' before the cluster itself has timed out a partition
///  event, so the number of consecutive successful pings for declaring it alive adds up to more
///  than the token timeout. Conversely, declaring it dead must happen well within the token
///  timeout, so that the vote is available by the time the cluster needs it.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct HysteresisConfig {
    pub ping_interval_micros: u64,
    /// consecutive successful pings needed to go from 'dead' to 'alive'
    pub rising_threshold: u32,
    /// consecutive failed pings needed to go from 'alive' to 'dead'
    pub falling_threshold: u32,
}

impl HysteresisConfig {
    pub fn derive(token_timeout_micros: u64, base_interval_micros: u64) -> Result<HysteresisConfig, ConfigError> {
        if token_timeout_micros < MIN_TOKEN_TIMEOUT_MICROS {
            error!("IPv4 tiebreaker: failover time too fast for IP based tiebreaker");
            return Err(ConfigError::FailoverTooFast {
                token_timeout_micros,
                minimum_micros: MIN_TOKEN_TIMEOUT_MICROS,
            });
        }
        if base_interval_micros == 0 {
            return Err(ConfigError::ZeroPingInterval);
        }

        // signed arithmetic: the 'down time' term goes through -1 for very small ratios and
        //  must truncate toward zero
        let token = i64::try_from(token_timeout_micros).map_err(|_| ConfigError::OutOfRange("token timeout"))?;
        let base = i64::try_from(base_interval_micros).map_err(|_| ConfigError::OutOfRange("ping interval"))?;

        let tko = token / base;

        // declaring 'up' must take *longer* than the failover time
        let up_time = base.checked_mul(3)
            .ok_or(ConfigError::OutOfRange("ping interval"))?
            .checked_add(token)
            .ok_or(ConfigError::OutOfRange("token timeout"))?;

        // declaring 'down' must take *less* than the failover time, leaving room for ping lag
        let down_time = base * (((tko & !1) - 1) / 2);

        // ping a little less often than the base interval
        let interval = base.checked_mul(4)
            .ok_or(ConfigError::OutOfRange("ping interval"))? / 3;

        let result = HysteresisConfig {
            ping_interval_micros: interval as u64,
            rising_threshold: u32::try_from(up_time / interval).map_err(|_| ConfigError::OutOfRange("rising threshold"))?,
            falling_threshold: u32::try_from(down_time / interval).map_err(|_| ConfigError::OutOfRange("falling threshold"))?,
        };

        info!("IPv4 tiebreaker: interval {} microseconds, on:{} off:{}", result.ping_interval_micros, result.rising_threshold, result.falling_threshold);
        Ok(result)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_micros(self.ping_interval_micros)
    }
}

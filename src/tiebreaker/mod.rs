//! The quorum tiebreaker: a liveness monitor that pings an address and turns the results into a
//!  stable vote, and the daemon loop that feeds that vote into a cluster manager's quorum
//!  decision.

pub mod daemon;
pub mod errors;
pub mod hysteresis_config;
pub mod liveness_monitor;
pub mod quorum_device;
pub mod tiebreaker_config;
pub mod vote_tracker;

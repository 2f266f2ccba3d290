use crate::tiebreaker::hysteresis_config::HysteresisConfig;

/// What a single probe result did to the vote
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum VoteTransition {
    Unchanged,
    /// alive, but this was a miss; the vote stays 'alive' until `threshold` consecutive misses
    MissTolerated { misses: u32, threshold: u32 },
    /// dead, but this was a hit; the vote stays 'dead' until `threshold` consecutive hits
    HitPending { hits: u32, threshold: u32 },
    CameOnline,
    WentOffline,
}

/// Turns a stream of noisy probe results into a stable vote by requiring a number of
///  *consecutive* confirming results before the vote flips.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct VoteTracker {
    vote: bool,
    consecutive_hits: u32,
    consecutive_misses: u32,
}

impl VoteTracker {
    pub fn vote(&self) -> bool {
        self.vote
    }

    pub fn consecutive_hits(&self) -> u32 {
        self.consecutive_hits
    }

    pub fn consecutive_misses(&self) -> u32 {
        self.consecutive_misses
    }

    pub fn on_probe(&mut self, succeeded: bool, config: &HysteresisConfig) -> VoteTransition {
        match (self.vote, succeeded) {
            (true, false) => {
                self.consecutive_hits = 0;
                self.consecutive_misses = self.consecutive_misses.saturating_add(1);
                if self.consecutive_misses < config.falling_threshold {
                    VoteTransition::MissTolerated {
                        misses: self.consecutive_misses,
                        threshold: config.falling_threshold,
                    }
                }
                else {
                    self.vote = false;
                    self.reset_counters();
                    VoteTransition::WentOffline
                }
            }
            (false, true) => {
                self.consecutive_misses = 0;
                self.consecutive_hits = self.consecutive_hits.saturating_add(1);
                if self.consecutive_hits < config.rising_threshold {
                    VoteTransition::HitPending {
                        hits: self.consecutive_hits,
                        threshold: config.rising_threshold,
                    }
                }
                else {
                    self.vote = true;
                    self.reset_counters();
                    VoteTransition::CameOnline
                }
            }
            (true, true) => {
                self.consecutive_misses = 0;
                VoteTransition::Unchanged
            }
            (false, false) => {
                self.consecutive_hits = 0;
                VoteTransition::Unchanged
            }
        }
    }

    /// Counters refer to one target; the vote is kept as the best estimate across a change
    pub fn reset_counters(&mut self) {
        self.consecutive_hits = 0;
        self.consecutive_misses = 0;
    }

    pub fn reset(&mut self) {
        self.vote = false;
        self.reset_counters();
    }
}

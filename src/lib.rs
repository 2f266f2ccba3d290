pub mod icmp;
pub mod tiebreaker;
pub mod test_util;

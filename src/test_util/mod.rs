//! Utilities for testing code that sits on top of the liveness monitor. They are used for
//!  testing the monitor itself, but they are also exported so that quorum device integrations
//!  can drive a monitor without raw sockets or a network.

pub mod prober;

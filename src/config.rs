//! Tunable protocol parameters.
//!
//! The wire format and the sequence comparators are fixed by the protocol
//! (changing them breaks interoperability). The three knobs below are not:
//! [`crate::packet::WINDOW`], [`crate::packet::MAX_RETRANS`], and
//! [`crate::packet::TIMEOUT_MS`] are simply the defaults, so embedders (and
//! tests) can dial them without touching wire compatibility.

use std::time::Duration;

use crate::packet::{MAX_RETRANS, TIMEOUT_MS, WINDOW};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolConfig {
    pub window: usize,
    pub max_retrans: u32,
    pub timeout: Duration,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        ProtocolConfig {
            window: WINDOW,
            max_retrans: MAX_RETRANS,
            timeout: Duration::from_millis(TIMEOUT_MS),
        }
    }
}

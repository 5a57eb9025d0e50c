//! Tunable parameters for the operation multiplexer.
//!
//! The C source this core is modeled on expresses these as compile-time
//! `#define`s. Here they are plain `Config` fields so tests can exercise
//! small-frame overflow paths without recompiling anything.

use std::time::Duration;

/// Size of the on-wire frame header, in bytes.
pub const HEADER_SIZE: usize = 8;

/// Top bit of the header's `type_` byte; set on responses, clear on requests.
pub const RESPONSE_BIT: u8 = 0x80;

/// Runtime-tunable limits for one multiplexer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Maximum total frame size (header + payload) accepted for allocation.
    pub max_frame_size: usize,
    /// Default per-operation timeout armed at submit time.
    pub default_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_frame_size: 4096,
            default_timeout: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Largest payload this config allows in a single frame.
    pub fn max_payload_size(&self) -> usize {
        self.max_frame_size.saturating_sub(HEADER_SIZE)
    }
}

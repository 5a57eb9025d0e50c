//! Error taxonomy.
//!
//! `OpError` is returned synchronously to a submitter and never completes an
//! Operation; `ResultCode` is the wire-mirrored completion result recorded on
//! an Operation and delivered through the normal completion path. Keeping
//! these as two types (rather than one "error or status" enum) is what lets
//! submit-time failures and post-submit completions follow the different
//! propagation rules the design calls for.

use thiserror::Error;

/// Opaque error surfaced by the host-device transport.
#[derive(Debug, Clone, Error)]
#[error("transport error (code {0})")]
pub struct TransportError(pub i32);

/// Synchronous, submit-time errors. An `OpError` means the Operation was
/// never completed by the core; the caller owns the decision to cancel or
/// release it.
#[derive(Debug, Clone, Error)]
pub enum OpError {
    #[error("connection is not enabled")]
    NotConnected,

    #[error("payload of {0} bytes exceeds the maximum frame size")]
    TooLarge(usize),

    #[error("host device buffer allocation failed")]
    OutOfMemory,

    #[error("transport send failed: {0}")]
    Transport(#[from] TransportError),
}

/// Completion result mirrored from (or synthesized to look like) the wire
/// `result` byte. `Copy` because it is plain data recorded on an Operation,
/// not an error type propagated with `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    /// Completed normally with a response, or an incoming request was
    /// handled successfully.
    Success,
    /// The per-operation timeout fired before a response arrived.
    Timeout,
    /// An incoming response did not fit the operation's response buffer.
    Overflow,
    /// An incoming request had no registered protocol handler.
    ProtocolBad,
    /// The waiting task was cancelled before completion.
    Interrupted,
    /// A protocol-defined non-zero result byte, passed through unchanged.
    Protocol(u8),
}

impl ResultCode {
    /// Reconstruct a `ResultCode` from the wire `result` byte of a response.
    pub fn from_wire(byte: u8) -> Self {
        if byte == 0 {
            ResultCode::Success
        } else {
            ResultCode::Protocol(byte)
        }
    }

    /// The wire `result` byte this code would produce, for a locally
    /// synthesized response. Used by [`crate::operation::Operation::set_response_result`]
    /// so a Protocol handler can set a response's result byte from the
    /// `ResultCode` it computed, rather than picking the wire byte itself.
    pub fn to_wire(self) -> u8 {
        match self {
            ResultCode::Success => 0,
            ResultCode::Protocol(b) => b,
            // Timeout/Overflow/ProtocolBad/Interrupted never appear on the
            // wire; they are local-only outcomes.
            ResultCode::Timeout | ResultCode::Overflow | ResultCode::ProtocolBad => 0xff,
            ResultCode::Interrupted => 0xfe,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, ResultCode::Success)
    }
}

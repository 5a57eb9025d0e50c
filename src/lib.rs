//! # opmux-core
//!
//! An operation multiplexer for a framed, bidirectional message transport.
//!
//! This crate turns a raw per-connection byte stream of fixed-header
//! messages into a set of tracked, in-flight [`Operation`]s, each with
//! request/response correlation, a per-operation timeout, asynchronous or
//! synchronous completion delivery, and cancellation.
//!
//! A submitter calls [`engine::create_outgoing`] to build a request/response
//! pair of buffers, then [`engine::operation_request_send`] to assign a
//! correlation id and hand the request to a [`HostDevice`] transport. The
//! caller either supplies a completion callback or calls [`Operation::wait`].
//! Inbound bytes from the transport are fed to [`dispatch::recv`], which
//! matches responses against the pending table or allocates a new incoming
//! `Operation` and routes it to a [`Protocol`] handler — always through the
//! Deferred Runner's queue, never directly from the receive path.
//!
//! The physical transport and the per-connection protocol are external
//! collaborators, expressed here only as the [`HostDevice`] and [`Protocol`]
//! traits; `transport::LoopbackHostDevice` is an in-memory implementation
//! used by this crate's own tests and available to embedders that want a
//! dependency-free transport for local testing.

pub mod buffer;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod frame;
pub mod logging;
pub mod operation;
pub mod protocol;
pub mod transport;

mod pending;
mod runtime;

pub use buffer::{Cookie, HostDevice, MessageBuffer};
pub use config::Config;
pub use connection::Connection;
pub use engine::{attach_response, create_incoming, create_outgoing, operation_request_send, operation_response_send};
pub use error::{OpError, ResultCode, TransportError};
pub use frame::Header;
pub use operation::{Callback, Direction, Operation};
pub use protocol::{NoHandlerProtocol, Protocol};
pub use transport::{loopback_pair, LoopbackHostDevice};

/// The current version of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

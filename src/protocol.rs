//! The per-connection collaborator that interprets the `type_` byte of an
//! inbound request and produces a response.

use std::sync::Arc;

use async_trait::async_trait;

use crate::operation::Operation;

/// Handles inbound requests for one connection.
///
/// `request_recv` is `async` because a real handler typically needs to
/// allocate a response buffer (`Engine::attach_response`) and possibly send
/// it (`Engine::operation_response_send`), both of which go through the
/// async `HostDevice`. Returning `false` means "no handler registered for
/// this opcode" — the Deferred Runner turns that into
/// `ResultCode::ProtocolBad` and completes the operation.
#[async_trait]
pub trait Protocol: Send + Sync {
    async fn request_recv(&self, type_: u8, operation: &Arc<Operation>) -> bool;
}

/// A `Protocol` with no registered handlers.
pub struct NoHandlerProtocol;

#[async_trait]
impl Protocol for NoHandlerProtocol {
    async fn request_recv(&self, _type_: u8, _operation: &Arc<Operation>) -> bool {
        false
    }
}

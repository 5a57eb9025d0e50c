//! The Receive Dispatcher: parses an incoming framed buffer from the
//! transport and routes it. Never invokes user code directly — every path
//! that would touch a Protocol handler or a completion callback instead
//! enqueues a job for the Deferred Runner.

use std::sync::Arc;

use crate::buffer::MessageBuffer;
use crate::config::HEADER_SIZE;
use crate::connection::Connection;
use crate::error::ResultCode;
use crate::frame::Header;
use crate::operation::{Direction, Operation};
use crate::runtime::Job;

/// Entry point from the transport's read loop: one call per received frame.
pub async fn recv(connection: &Arc<Connection>, bytes: &[u8]) {
    if !connection.is_enabled() {
        tracing::warn!("dropping frame: connection not enabled");
        return;
    }
    if bytes.len() < HEADER_SIZE {
        tracing::warn!(len = bytes.len(), "dropping frame shorter than header");
        return;
    }
    let Some(header) = Header::decode(bytes) else {
        tracing::warn!("dropping unparseable frame");
        return;
    };
    if header.size as usize > bytes.len() {
        tracing::warn!(
            declared = header.size,
            actual = bytes.len(),
            "dropping incomplete frame"
        );
        return;
    }
    let frame = &bytes[..header.size as usize];

    if header.is_response() {
        handle_response(connection, &header, frame);
    } else {
        handle_request(connection, &header, frame).await;
    }
}

/// Locate the pending Operation, disarm its timeout, and either copy the
/// response in or flag an overflow — then enqueue completion. The payload
/// is copied into the response buffer *before* `result` is read, from the
/// copy, not from the still-incoming bytes.
fn handle_response(connection: &Arc<Connection>, header: &Header, frame: &[u8]) {
    let op = {
        let mut table = connection.pending().lock().unwrap();
        table.remove_pending(header.operation_id)
    };
    let Some(op) = op else {
        tracing::warn!(
            operation_id = header.operation_id,
            "dropping response with no matching pending operation"
        );
        return;
    };
    op.disarm_timeout();

    let mut response = op
        .take_response()
        .expect("outgoing operation always carries a response buffer");
    if frame.len() > response.capacity() {
        tracing::warn!(
            operation_id = header.operation_id,
            capacity = response.capacity(),
            frame_len = frame.len(),
            "response overflowed buffer capacity"
        );
        op.set_result(ResultCode::Overflow);
        op.put_response(response);
    } else {
        response.copy_in(frame);
        let result_byte = response.frame().get(5).copied().unwrap_or(0);
        op.set_result(ResultCode::from_wire(result_byte));
        op.put_response(response);
    }
    connection.runner().enqueue(Job::Complete(op));
}

/// Allocate an incoming Operation sized to the frame and enqueue it for the
/// Deferred Runner to hand to the Protocol. Allocation always uses the
/// non-blocking policy: this path is the transport's read loop, never a
/// caller's own submit.
async fn handle_request(connection: &Arc<Connection>, header: &Header, frame: &[u8]) {
    let payload_size = frame.len().saturating_sub(HEADER_SIZE);
    let mut request = match MessageBuffer::allocate(
        connection.host_device().as_ref(),
        &connection.config,
        header.operation_id,
        payload_size,
        header.opcode(),
        false,
        false,
    )
    .await
    {
        Ok(buf) => buf,
        Err(err) => {
            tracing::warn!(error = %err, "failed to allocate buffer for incoming request");
            return;
        }
    };
    request.copy_in(frame);

    let op = Arc::new(Operation::new(
        Arc::downgrade(connection),
        Direction::Incoming,
        header.opcode(),
        request,
        None,
    ));
    op.set_id(header.operation_id);
    connection.pending().lock().unwrap().track(op.clone());
    connection.runner().enqueue(Job::Inbound(op));
}

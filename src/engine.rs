//! The Submit / Complete Engine: operation creation, the outgoing submit
//! sequence, and the single completion choke-point.

use std::sync::Arc;

use crate::buffer::MessageBuffer;
use crate::connection::Connection;
use crate::error::{OpError, ResultCode};
use crate::operation::{Callback, Direction, Operation};
use crate::runtime::Job;

/// Create an outgoing operation: allocate both the request and response
/// buffers. `response_payload_size` must be non-zero — a response always
/// carries at least a status byte.
pub async fn create_outgoing(
    connection: &Arc<Connection>,
    opcode: u8,
    request_payload_size: usize,
    response_payload_size: usize,
) -> Result<Arc<Operation>, OpError> {
    debug_assert!(
        response_payload_size > 0,
        "create_outgoing requires a non-zero response_payload_size"
    );
    let host_device = connection.host_device();
    let mut request = MessageBuffer::allocate(
        host_device.as_ref(),
        &connection.config,
        0,
        request_payload_size,
        opcode,
        false,
        true,
    )
    .await?;
    let response = match MessageBuffer::allocate(
        host_device.as_ref(),
        &connection.config,
        0,
        response_payload_size,
        opcode,
        true,
        true,
    )
    .await
    {
        Ok(response) => response,
        Err(err) => {
            // The request buffer already came back from the host device;
            // failing to pair it with a response must not leak it.
            request.release(host_device.as_ref());
            return Err(err);
        }
    };

    let op = Arc::new(Operation::new(
        Arc::downgrade(connection),
        Direction::Outgoing,
        opcode,
        request,
        Some(response),
    ));
    connection.pending().lock().unwrap().track(op.clone());
    Ok(op)
}

/// Create an incoming operation sized for `request_size` bytes of payload.
/// The Protocol handler is responsible for attaching a response via
/// [`attach_response`]. Used internally by the receive dispatcher; exposed
/// publicly for tests and alternate dispatch implementations.
pub async fn create_incoming(
    connection: &Arc<Connection>,
    opcode: u8,
    request_size: usize,
    may_block: bool,
) -> Result<Arc<Operation>, OpError> {
    let host_device = connection.host_device();
    let request = MessageBuffer::allocate(
        host_device.as_ref(),
        &connection.config,
        0,
        request_size,
        opcode,
        false,
        may_block,
    )
    .await?;
    let op = Arc::new(Operation::new(
        Arc::downgrade(connection),
        Direction::Incoming,
        opcode,
        request,
        None,
    ));
    connection.pending().lock().unwrap().track(op.clone());
    Ok(op)
}

/// Allocate and attach a response buffer to an incoming Operation. Called by
/// Protocol handlers from within `request_recv`.
pub async fn attach_response(
    connection: &Arc<Connection>,
    op: &Arc<Operation>,
    response_payload_size: usize,
) -> Result<(), OpError> {
    let host_device = connection.host_device();
    let response = MessageBuffer::allocate(
        host_device.as_ref(),
        &connection.config,
        op.id(),
        response_payload_size,
        op.opcode,
        true,
        true,
    )
    .await?;
    op.put_response(response);
    Ok(())
}

/// Submit an outgoing request: assign its id, arm its timeout, hand the
/// request buffer to the transport.
///
/// On a transport send failure the Operation is removed from `pending`
/// before the error is returned — the core never completes an Operation
/// whose submit itself failed; the caller decides whether to cancel or
/// drop it.
pub async fn operation_request_send(
    connection: &Arc<Connection>,
    op: &Arc<Operation>,
    callback: Option<Callback>,
) -> Result<(), OpError> {
    if !connection.is_enabled() {
        return Err(OpError::NotConnected);
    }
    if let Some(cb) = callback {
        op.set_callback(cb);
    }

    let id = {
        let mut table = connection.pending().lock().unwrap();
        table.insert_pending(op.clone())
    };
    tracing::debug!(operation_id = id, opcode = op.opcode, "submitting operation");

    let host_device = connection.host_device();
    let mut request = op
        .take_request()
        .expect("outgoing operation always carries a request buffer");
    let send_result = request
        .send(host_device.as_ref(), connection.remote_cport_id, true)
        .await;
    op.put_request(request);

    if let Err(err) = send_result {
        let mut table = connection.pending().lock().unwrap();
        table.remove_pending(id);
        drop(table);
        tracing::warn!(operation_id = id, error = %err, "submit failed, removed from pending");
        return Err(err);
    }

    arm_timeout(connection, op, id);
    Ok(())
}

/// Send a response for an incoming Operation that a Protocol handler has
/// already attached via [`attach_response`]. This actually transmits the
/// response through the host device; the Operation's own destruction is
/// left to its last `Arc` being dropped once the handler's job finishes,
/// rather than being forced here.
pub async fn operation_response_send(
    connection: &Arc<Connection>,
    op: &Arc<Operation>,
) -> Result<(), OpError> {
    let host_device = connection.host_device();
    let mut response = op
        .take_response()
        .expect("operation_response_send called without an attached response buffer");
    let result = response
        .send(host_device.as_ref(), connection.remote_cport_id, true)
        .await;
    op.put_response(response);
    result
}

fn arm_timeout(connection: &Arc<Connection>, op: &Arc<Operation>, id: u16) {
    let connection = connection.clone();
    let op_for_timer = op.clone();
    let duration = connection.config.default_timeout;
    let join = tokio::spawn(async move {
        tokio::time::sleep(duration).await;
        let still_pending = {
            let mut table = connection.pending().lock().unwrap();
            table.remove_pending(id).is_some()
        };
        if still_pending {
            op_for_timer.set_result(ResultCode::Timeout);
            connection.runner().enqueue(Job::Complete(op_for_timer));
        }
    });
    op.set_timeout_handle(join.abort_handle());
}

/// The single completion choke-point. Invoked only from the Deferred
/// Runner's job loop (both for inbound-handler completions and for
/// resolved-operation completions queued by the timeout task and the
/// receive dispatcher), enforcing exactly-once delivery via `Operation`'s
/// completed latch.
pub(crate) fn complete(op: &Arc<Operation>) {
    if !op.mark_completed() {
        return;
    }
    if let Some(connection) = op.connection.upgrade() {
        connection.pending().lock().unwrap().forget(op);
    }
    if let Some(callback) = op.take_callback() {
        callback(op.clone());
    } else {
        op.notify_complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::protocol::NoHandlerProtocol;
    use crate::transport::LoopbackHostDevice;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn complete_fires_exactly_once() {
        let device = Arc::new(LoopbackHostDevice::new());
        let connection = Connection::new(device, Arc::new(NoHandlerProtocol), 1, Config::default());
        let op = create_outgoing(&connection, 0x01, 0, 4).await.unwrap();

        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        op.set_callback(Box::new(move |_op| {
            assert!(!fired_clone.swap(true, Ordering::SeqCst), "callback invoked twice");
        }));

        complete(&op);
        complete(&op);
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn send_failure_removes_operation_from_pending() {
        struct AlwaysFails;
        #[async_trait::async_trait]
        impl crate::buffer::HostDevice for AlwaysFails {
            async fn buffer_alloc(&self, size: usize, _may_block: bool) -> Option<Vec<u8>> {
                Some(vec![0u8; size])
            }
            fn buffer_free(&self, _buffer: Vec<u8>) {}
            async fn buffer_send(
                &self,
                _cport_id: u16,
                _buffer: &[u8],
                _may_block: bool,
            ) -> Result<crate::buffer::Cookie, crate::error::TransportError> {
                Err(crate::error::TransportError(-1))
            }
            fn buffer_cancel(&self, _cookie: crate::buffer::Cookie) {}
        }

        let connection = Connection::new(Arc::new(AlwaysFails), Arc::new(NoHandlerProtocol), 1, Config::default());
        let op = create_outgoing(&connection, 0x01, 0, 4).await.unwrap();
        let err = operation_request_send(&connection, &op, None).await.unwrap_err();
        assert!(matches!(err, OpError::Transport(_)));
        assert_eq!(connection.pending_count(), 0);
    }

    #[tokio::test]
    async fn response_allocate_failure_releases_request_buffer() {
        let device = Arc::new(LoopbackHostDevice::new());
        let config = Config {
            max_frame_size: 16,
            ..Config::default()
        };
        let connection = Connection::new(device.clone(), Arc::new(NoHandlerProtocol), 1, config);

        // The request (0 payload bytes) fits; the response (100 payload
        // bytes) does not, so create_outgoing must fail without leaking the
        // request buffer it already allocated.
        let err = create_outgoing(&connection, 0x01, 0, 100).await.unwrap_err();
        assert!(matches!(err, OpError::TooLarge(100)));
        assert_eq!(device.alloc_count(), 1);
        assert_eq!(device.free_count(), 1);
    }
}

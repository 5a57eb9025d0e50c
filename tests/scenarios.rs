//! End-to-end scenario tests exercising the full submit/dispatch/complete
//! cycle over the in-memory loopback transport.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use opmux_core::config::HEADER_SIZE;
use opmux_core::frame::Header;
use opmux_core::{
    attach_response, create_outgoing, dispatch, loopback_pair, operation_request_send,
    operation_response_send, Config, NoHandlerProtocol, Operation, Protocol, ResultCode,
};

/// A protocol that attaches a 4-byte success response to every inbound
/// request and sends it back, matching S1/S4's "handler runs and replies".
struct EchoProtocol;

#[async_trait]
impl Protocol for EchoProtocol {
    async fn request_recv(&self, _type_: u8, operation: &Arc<Operation>) -> bool {
        let connection = operation.connection().expect("connection still alive");
        attach_response(&connection, operation, 4)
            .await
            .expect("attach response");
        operation.fill_response_payload(&[0, 0, 0, 0]);
        operation.set_response_result(ResultCode::Success);
        operation_response_send(&connection, operation)
            .await
            .expect("send response");
        true
    }
}

/// A protocol that accepts inbound requests but never responds, used to
/// exercise the client-side timeout path without a handler ever replying.
struct BlackHoleProtocol;

#[async_trait]
impl Protocol for BlackHoleProtocol {
    async fn request_recv(&self, _type_: u8, _operation: &Arc<Operation>) -> bool {
        true
    }
}

/// A protocol that records the Arc it was handed and always reports "no
/// handler", so a test can inspect the Operation's final state afterward.
struct CapturingNoHandlerProtocol {
    captured: Arc<Mutex<Option<Arc<Operation>>>>,
}

#[async_trait]
impl Protocol for CapturingNoHandlerProtocol {
    async fn request_recv(&self, _type_: u8, operation: &Arc<Operation>) -> bool {
        *self.captured.lock().unwrap() = Some(operation.clone());
        false
    }
}

// S1 — happy path, synchronous: submit, the peer echoes a success response,
// `wait()` returns `Success`.
#[tokio::test]
async fn s1_happy_path_synchronous() {
    let (client, _server) = loopback_pair(
        Arc::new(NoHandlerProtocol),
        Arc::new(EchoProtocol),
        Config::default(),
    );

    let op = create_outgoing(&client, 0x01, 2, 4).await.unwrap();
    op.fill_request_payload(&[0xAA, 0xBB]);
    operation_request_send(&client, &op, None).await.unwrap();

    let result = op.clone().wait().await;
    assert_eq!(result, ResultCode::Success);
    assert_eq!(op.response_payload().as_deref(), Some(&[0u8, 0, 0, 0][..]));
    assert_eq!(client.pending_count(), 0);
}

// S2 — timeout: the peer never responds, so the armed timeout completes the
// Operation with `Timeout`; a late response with the same id is then dropped
// without changing the already-delivered result.
#[tokio::test]
async fn s2_timeout_then_late_response_is_dropped() {
    let config = Config {
        default_timeout: Duration::from_millis(30),
        ..Config::default()
    };
    let (client, _server) = loopback_pair(
        Arc::new(NoHandlerProtocol),
        Arc::new(BlackHoleProtocol),
        config,
    );

    let op = create_outgoing(&client, 0x02, 0, 4).await.unwrap();
    operation_request_send(&client, &op, None).await.unwrap();

    let result = op.clone().wait().await;
    assert_eq!(result, ResultCode::Timeout);
    assert_eq!(client.pending_count(), 0);

    let mut late = vec![0u8; HEADER_SIZE + 4];
    let header = Header {
        size: late.len() as u16,
        operation_id: op.id(),
        type_: Header::encode_type(0x02, true),
        result: 0,
    };
    header.encode(&mut late);

    dispatch::recv(&client, &late).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(op.result(), ResultCode::Timeout);
}

// S3 — overflow: the response buffer was declared with capacity for 4 bytes
// of payload; a larger incoming response sets `Overflow` without copying.
#[tokio::test]
async fn s3_overflowing_response_sets_overflow() {
    let (client, _server) = loopback_pair(
        Arc::new(NoHandlerProtocol),
        Arc::new(NoHandlerProtocol),
        Config::default(),
    );

    let op = create_outgoing(&client, 0x01, 0, 4).await.unwrap();
    operation_request_send(&client, &op, None).await.unwrap();

    let mut oversized = vec![0u8; HEADER_SIZE + 100];
    let header = Header {
        size: oversized.len() as u16,
        operation_id: op.id(),
        type_: Header::encode_type(0x01, true),
        result: 0,
    };
    header.encode(&mut oversized);

    dispatch::recv(&client, &oversized).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(op.result(), ResultCode::Overflow);
    assert!(op.is_completed());
}

// S4 — incoming request handled: the server's Protocol handler runs on the
// Deferred Runner (not inline in dispatch), attaches and sends a response,
// and the server's own Operation settles back out of its tracked lists.
#[tokio::test]
async fn s4_incoming_request_handled_by_protocol() {
    let (client, server) = loopback_pair(
        Arc::new(NoHandlerProtocol),
        Arc::new(EchoProtocol),
        Config::default(),
    );

    let op = create_outgoing(&client, 0x03, 2, 4).await.unwrap();
    op.fill_request_payload(&[0x01, 0x02]);
    operation_request_send(&client, &op, None).await.unwrap();

    let result = op.wait().await;
    assert_eq!(result, ResultCode::Success);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(server.operation_count(), 0);
    assert_eq!(server.pending_count(), 0);
}

// S5 — incoming request, no handler: the incoming Operation completes with
// `ProtocolBad` on the receiving side; the submitter on the other end never
// hears back (and would eventually time out, which this test doesn't wait
// for).
#[tokio::test]
async fn s5_incoming_request_without_handler_sets_protocol_bad() {
    let captured: Arc<Mutex<Option<Arc<Operation>>>> = Arc::new(Mutex::new(None));
    let protocol = Arc::new(CapturingNoHandlerProtocol {
        captured: captured.clone(),
    });
    let (client, _server) = loopback_pair(Arc::new(NoHandlerProtocol), protocol, Config::default());

    let op = create_outgoing(&client, 0x03, 2, 4).await.unwrap();
    op.fill_request_payload(&[0x01, 0x02]);
    operation_request_send(&client, &op, None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let incoming = captured.lock().unwrap().take().expect("handler was invoked");
    assert!(incoming.is_completed());
    assert_eq!(incoming.result(), ResultCode::ProtocolBad);
}

// S6 — interrupted wait: the caller's `wait()` is interrupted by a
// concurrent `cancel()` before a response arrives. `wait()` itself returns
// `ResultCode::Interrupted`, the request buffer's cancel is invoked on the
// transport, and a response that genuinely arrives afterwards still
// completes the Operation exactly once (a duplicate/late response after that
// has no further effect).
#[tokio::test]
async fn s6_interrupted_wait_then_single_completion_on_late_response() {
    let (client, _server) = loopback_pair(
        Arc::new(NoHandlerProtocol),
        Arc::new(NoHandlerProtocol),
        Config::default(),
    );

    let op = create_outgoing(&client, 0x04, 0, 4).await.unwrap();
    operation_request_send(&client, &op, None).await.unwrap();

    let waiter = op.clone();
    let wait_task = tokio::spawn(async move { waiter.wait().await });
    tokio::time::sleep(Duration::from_millis(5)).await;
    op.clone().cancel();

    let result = wait_task.await.expect("wait task did not panic");
    assert_eq!(result, ResultCode::Interrupted);
    assert!(op.is_cancelled());
    assert!(!op.is_completed());

    let mut frame = vec![0u8; HEADER_SIZE + 4];
    let header = Header {
        size: frame.len() as u16,
        operation_id: op.id(),
        type_: Header::encode_type(0x04, true),
        result: 0,
    };
    header.encode(&mut frame);

    dispatch::recv(&client, &frame).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(op.is_completed());
    assert_eq!(op.result(), ResultCode::Success);

    // A duplicate of the same response now finds nothing pending.
    dispatch::recv(&client, &frame).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(op.result(), ResultCode::Success);
}

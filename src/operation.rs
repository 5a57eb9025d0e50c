//! Operation: one logical request/response exchange (or one incoming
//! request being handled).
//!
//! Reference counting is `Arc<Operation>`'s strong count; there is no
//! hand-rolled `retain`/`release` pair. The mutable fields that the
//! synchronous receive-dispatch path must be able to touch without ever
//! awaiting (request/response buffers, the registered callback, the result
//! code, the timeout's abort handle) live behind a `std::sync::Mutex`. Any
//! code that needs to perform an `async` operation on a buffer (allocate,
//! send) takes the buffer out of the lock first, operates on it unlocked,
//! then puts it back — the lock is never held across an `.await`.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Mutex, Weak};

use tokio::sync::Notify;
use tokio::task::AbortHandle;

use crate::buffer::MessageBuffer;
use crate::connection::Connection;
use crate::error::ResultCode;

/// Outgoing operations wait for a matching response; incoming operations
/// are handed to the Protocol for handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// A completion callback, invoked on the Deferred Runner with the Operation
/// that just completed. Mutually exclusive with calling `Operation::wait`.
pub type Callback = Box<dyn FnOnce(std::sync::Arc<Operation>) + Send>;

pub(crate) struct OperationInner {
    pub request: Option<MessageBuffer>,
    pub response: Option<MessageBuffer>,
    pub callback: Option<Callback>,
    pub result: ResultCode,
    pub timeout_handle: Option<AbortHandle>,
}

pub struct Operation {
    pub(crate) connection: Weak<Connection>,
    pub direction: Direction,
    pub opcode: u8,
    id: AtomicU16,
    cancelled: AtomicBool,
    completed: AtomicBool,
    has_callback: AtomicBool,
    notify: Notify,
    pub(crate) inner: Mutex<OperationInner>,
}

impl Operation {
    pub(crate) fn new(
        connection: Weak<Connection>,
        direction: Direction,
        opcode: u8,
        request: MessageBuffer,
        response: Option<MessageBuffer>,
    ) -> Self {
        Operation {
            connection,
            direction,
            opcode,
            id: AtomicU16::new(0),
            cancelled: AtomicBool::new(false),
            completed: AtomicBool::new(false),
            has_callback: AtomicBool::new(false),
            notify: Notify::new(),
            inner: Mutex::new(OperationInner {
                request: Some(request),
                response,
                callback: None,
                result: ResultCode::Success,
                timeout_handle: None,
            }),
        }
    }

    pub fn id(&self) -> u16 {
        self.id.load(Ordering::Acquire)
    }

    /// The Connection this Operation belongs to, if it has not been dropped.
    /// Protocol handlers use this to reach [`crate::engine::attach_response`]
    /// and [`crate::engine::operation_response_send`], neither of which take
    /// an implicit connection from the Operation itself.
    pub fn connection(&self) -> Option<std::sync::Arc<Connection>> {
        self.connection.upgrade()
    }

    pub(crate) fn set_id(&self, id: u16) {
        self.id.store(id, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Set the cancel flag. Returns `true` the first time it is set, `false`
    /// on subsequent calls — callers use this to keep `cancel()` idempotent.
    pub(crate) fn mark_cancelled(&self) -> bool {
        self.cancelled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Latch that enforces exactly-once completion. Returns `true` the first
    /// time it is set.
    pub(crate) fn mark_completed(&self) -> bool {
        self.completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    pub fn result(&self) -> ResultCode {
        self.inner.lock().unwrap().result
    }

    pub(crate) fn set_result(&self, result: ResultCode) {
        self.inner.lock().unwrap().result = result;
    }

    pub(crate) fn set_callback(&self, callback: Callback) {
        self.has_callback.store(true, Ordering::Release);
        self.inner.lock().unwrap().callback = Some(callback);
    }

    pub(crate) fn take_callback(&self) -> Option<Callback> {
        self.inner.lock().unwrap().callback.take()
    }

    pub fn has_callback(&self) -> bool {
        self.has_callback.load(Ordering::Acquire)
    }

    pub(crate) fn take_request(&self) -> Option<MessageBuffer> {
        self.inner.lock().unwrap().request.take()
    }

    pub(crate) fn put_request(&self, buf: MessageBuffer) {
        self.inner.lock().unwrap().request = Some(buf);
    }

    pub(crate) fn take_response(&self) -> Option<MessageBuffer> {
        self.inner.lock().unwrap().response.take()
    }

    pub(crate) fn put_response(&self, buf: MessageBuffer) {
        self.inner.lock().unwrap().response = Some(buf);
    }

    pub fn has_response(&self) -> bool {
        self.inner.lock().unwrap().response.is_some()
    }

    /// Overwrite the request buffer's payload bytes, truncated/zero-padded
    /// to the buffer's declared capacity. Submitters call this after
    /// `create_outgoing` and before `operation_request_send`.
    pub fn fill_request_payload(&self, bytes: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(req) = inner.request.as_mut() {
            let payload = req.payload_mut();
            let n = payload.len().min(bytes.len());
            payload[..n].copy_from_slice(&bytes[..n]);
        }
    }

    /// Read back the request buffer's current payload bytes.
    pub fn request_payload(&self) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .request
            .as_ref()
            .map(|req| req.payload().to_vec())
    }

    /// Overwrite the response buffer's payload bytes, truncated/zero-padded
    /// to the buffer's declared capacity. Protocol handlers call this after
    /// `attach_response` and before `operation_response_send`.
    pub fn fill_response_payload(&self, bytes: &[u8]) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(resp) = inner.response.as_mut() {
            let payload = resp.payload_mut();
            let n = payload.len().min(bytes.len());
            payload[..n].copy_from_slice(&bytes[..n]);
        }
    }

    /// Overwrite the response buffer's wire `result` byte (0 = success).
    pub fn set_response_result_byte(&self, result: u8) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(resp) = inner.response.as_mut() {
            resp.set_result_byte(result);
        }
    }

    /// Overwrite the response buffer's wire `result` byte from a [`ResultCode`],
    /// using [`ResultCode::to_wire`] to pick the byte a Protocol handler
    /// should send back for a local result (`Success` or a pass-through
    /// protocol-defined `Protocol(n)` value).
    pub fn set_response_result(&self, code: ResultCode) {
        self.set_response_result_byte(code.to_wire());
    }

    /// Read back the response buffer's current payload bytes.
    pub fn response_payload(&self) -> Option<Vec<u8>> {
        self.inner
            .lock()
            .unwrap()
            .response
            .as_ref()
            .map(|resp| resp.payload().to_vec())
    }

    pub(crate) fn set_timeout_handle(&self, handle: AbortHandle) {
        self.inner.lock().unwrap().timeout_handle = Some(handle);
    }

    /// Abort the armed timeout, if any. A best-effort, non-waiting
    /// try-cancel: if the timer's task has already started running, this
    /// does not stop it — the race is resolved by the completed-latch, not
    /// by this call.
    pub(crate) fn disarm_timeout(&self) {
        if let Some(handle) = self.inner.lock().unwrap().timeout_handle.take() {
            handle.abort();
        }
    }

    /// Wake any task blocked in `wait()`, whether it is waking up for a
    /// normal completion or because `cancel()` just set the cancel flag.
    pub(crate) fn notify_complete(&self) {
        self.notify.notify_one();
    }

    /// Block until this Operation completes. Must not be called when a
    /// callback was registered via `submit`.
    ///
    /// Two paths can interrupt a wait still in progress:
    /// - Another task calls `cancel()` on this `Operation` (or its own
    ///   `Arc` clone) while this task is blocked here: the cancel flag wakes
    ///   the loop below, and `wait` returns `ResultCode::Interrupted` without
    ///   waiting for the normal response/timeout path to resolve.
    /// - This `wait()` future is itself dropped before resolving (the
    ///   caller wrapped it in `tokio::time::timeout`, or aborted its own
    ///   task): a dropped future has no return value to give back, so the
    ///   `CancelOnDrop` guard below best-effort cancels the request buffer
    ///   on the way out instead.
    pub async fn wait(self: std::sync::Arc<Self>) -> ResultCode {
        debug_assert!(
            !self.has_callback(),
            "wait() must not be called on an Operation submitted with a callback"
        );

        struct CancelOnDrop(std::sync::Arc<Operation>);
        impl Drop for CancelOnDrop {
            fn drop(&mut self) {
                if !self.0.is_completed() {
                    self.0.clone().cancel();
                }
            }
        }
        let guard = CancelOnDrop(self.clone());

        let result = loop {
            if self.is_completed() {
                break self.result();
            }
            if self.is_cancelled() {
                break ResultCode::Interrupted;
            }
            self.notify.notified().await;
        };
        drop(guard);
        result
    }

    /// Mark cancelled and ask the host device to recall both buffers.
    /// Idempotent; does not itself complete the Operation. Also wakes any
    /// task blocked in `wait()` so it can observe the cancel flag and return
    /// `ResultCode::Interrupted` instead of waiting for a normal resolution
    /// that may never come.
    pub fn cancel(self: std::sync::Arc<Self>) {
        if !self.mark_cancelled() {
            return;
        }
        self.notify_complete();
        let Some(connection) = self.connection.upgrade() else {
            return;
        };
        let host_device = connection.host_device();
        let mut inner = self.inner.lock().unwrap();
        if let Some(req) = inner.request.as_mut() {
            req.cancel(host_device.as_ref());
        }
        if let Some(resp) = inner.response.as_mut() {
            resp.cancel(host_device.as_ref());
        }
    }
}

impl Drop for Operation {
    /// Once the last `Arc<Operation>` goes away, return both buffers to the
    /// host device.
    /// If the owning Connection (and with it the host device) is already
    /// gone, there is nothing left to free through — the buffers' own `Drop`
    /// logs that case rather than silently leaking it.
    fn drop(&mut self) {
        let Some(connection) = self.connection.upgrade() else {
            return;
        };
        let host_device = connection.host_device();
        let mut inner = self.inner.lock().unwrap();
        if let Some(mut req) = inner.request.take() {
            req.release(host_device.as_ref());
        }
        if let Some(mut resp) = inner.response.take() {
            resp.release(host_device.as_ref());
        }
    }
}

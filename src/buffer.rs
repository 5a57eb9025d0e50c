//! Message buffers and the host-device transport interface.
//!
//! A `MessageBuffer` owns one contiguous frame (header + payload) allocated
//! through a [`HostDevice`]. Frame memory is never copied once handed to the
//! transport except via explicit cancel; the transport's cookie is the only
//! thing identifying an in-flight send.

use async_trait::async_trait;

use crate::config::{Config, HEADER_SIZE};
use crate::error::{OpError, TransportError};
use crate::frame::Header;

/// Opaque handle returned by a successful `buffer_send`, valid until the
/// transport signals completion or accepts a cancel for that send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cookie(pub u64);

/// The physical transport this core submits framed buffers to and receives
/// framed buffers from. Out of scope for this crate's own logic — provided
/// here only as a trait plus the in-memory loopback in `transport.rs` used
/// by tests.
#[async_trait]
pub trait HostDevice: Send + Sync {
    /// Allocate `size` bytes of frame memory. `may_block` is true when called
    /// from a submitter's task, false when called from the receive dispatch
    /// path (which must never block).
    async fn buffer_alloc(&self, size: usize, may_block: bool) -> Option<Vec<u8>>;

    /// Return frame memory to the host device. Idempotent per `MessageBuffer`
    /// by construction: each `MessageBuffer` is released at most once.
    fn buffer_free(&self, buffer: Vec<u8>);

    /// Hand a filled frame to the transport for the given remote cport.
    async fn buffer_send(
        &self,
        cport_id: u16,
        buffer: &[u8],
        may_block: bool,
    ) -> Result<Cookie, TransportError>;

    /// Ask the transport to recall an in-flight send. A no-op if the cookie
    /// is already complete.
    fn buffer_cancel(&self, cookie: Cookie);
}

/// One contiguous frame, plus whatever the host device needs to track it
/// while in flight.
pub struct MessageBuffer {
    frame: Option<Vec<u8>>,
    cookie: Option<Cookie>,
}

impl MessageBuffer {
    /// Allocate a frame sized for `payload_size` bytes of payload and fill in
    /// its header. `operation_id` is `0` for a request under construction
    /// (submit later assigns it); responses are built with the real id
    /// already known.
    pub async fn allocate(
        host_device: &dyn HostDevice,
        config: &Config,
        operation_id: u16,
        payload_size: usize,
        opcode: u8,
        is_response: bool,
        may_block: bool,
    ) -> Result<Self, OpError> {
        if payload_size > config.max_payload_size() {
            return Err(OpError::TooLarge(payload_size));
        }
        let frame_size = HEADER_SIZE + payload_size;
        let mut frame = host_device
            .buffer_alloc(frame_size, may_block)
            .await
            .ok_or(OpError::OutOfMemory)?;
        frame.resize(frame_size, 0);

        let header = Header {
            size: frame_size as u16,
            operation_id,
            type_: Header::encode_type(opcode, is_response),
            result: 0,
        };
        header.encode(&mut frame);

        Ok(MessageBuffer {
            frame: Some(frame),
            cookie: None,
        })
    }

    pub fn frame(&self) -> &[u8] {
        self.frame.as_deref().unwrap_or(&[])
    }

    pub fn frame_mut(&mut self) -> &mut [u8] {
        self.frame.as_deref_mut().unwrap_or(&mut [])
    }

    pub fn payload(&self) -> &[u8] {
        crate::frame::payload(self.frame())
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        crate::frame::payload_mut(self.frame.as_deref_mut().unwrap_or(&mut []))
    }

    pub fn capacity(&self) -> usize {
        self.frame.as_ref().map_or(0, |f| f.len())
    }

    pub fn cookie(&self) -> Option<Cookie> {
        self.cookie
    }

    /// Stamp the correlation id into this buffer's header (used when a
    /// request's id is assigned at submit time).
    pub fn set_operation_id(&mut self, operation_id: u16) {
        if let Some(frame) = self.frame.as_mut() {
            if frame.len() >= 4 {
                frame[2..4].copy_from_slice(&operation_id.to_le_bytes());
            }
        }
    }

    /// Overwrite the wire `result` byte (used when attaching a response).
    pub fn set_result_byte(&mut self, result: u8) {
        if let Some(frame) = self.frame.as_mut() {
            if frame.len() > 5 {
                frame[5] = result;
            }
        }
    }

    /// Replace this buffer's payload bytes with freshly received data,
    /// truncating or extending the frame to match. Used by the response path
    /// to copy an incoming frame into a pre-allocated response buffer.
    pub fn copy_in(&mut self, bytes: &[u8]) {
        self.frame = Some(bytes.to_vec());
    }

    pub async fn send(
        &mut self,
        host_device: &dyn HostDevice,
        cport_id: u16,
        may_block: bool,
    ) -> Result<(), OpError> {
        let cookie = host_device
            .buffer_send(cport_id, self.frame(), may_block)
            .await?;
        self.cookie = Some(cookie);
        Ok(())
    }

    /// Ask the transport to recall this buffer if it is in flight. A no-op
    /// otherwise.
    pub fn cancel(&mut self, host_device: &dyn HostDevice) {
        if let Some(cookie) = self.cookie.take() {
            host_device.buffer_cancel(cookie);
        }
    }

    /// Return this buffer's memory to the host device. Idempotent: calling
    /// it twice on the same `MessageBuffer` is a no-op the second time.
    pub fn release(&mut self, host_device: &dyn HostDevice) {
        if let Some(frame) = self.frame.take() {
            host_device.buffer_free(frame);
        }
    }
}

impl Drop for MessageBuffer {
    fn drop(&mut self) {
        if self.frame.is_some() {
            tracing::warn!("MessageBuffer dropped without explicit release; leaking frame memory");
        }
    }
}

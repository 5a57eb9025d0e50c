//! An in-memory loopback `HostDevice`, used by this crate's own tests and by
//! embedding applications that want a dependency-free transport for local
//! testing. Plays the same role among "real" transports that shared memory
//! plays in a multi-transport IPC suite: a local, kernel-socket-free
//! backend exercising the same trait every other transport implements.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::buffer::{Cookie, HostDevice};
use crate::config::Config;
use crate::connection::Connection;
use crate::dispatch;
use crate::protocol::Protocol;

pub struct LoopbackHostDevice {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    next_cookie: AtomicU64,
    alloc_count: AtomicUsize,
    free_count: AtomicUsize,
}

impl LoopbackHostDevice {
    /// A standalone device with nothing listening on the other end — sends
    /// are accepted but go nowhere. Useful for unit tests that only exercise
    /// allocation/release bookkeeping.
    pub fn new() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self::with_sender(tx)
    }

    fn with_sender(tx: mpsc::UnboundedSender<Vec<u8>>) -> Self {
        LoopbackHostDevice {
            tx,
            next_cookie: AtomicU64::new(1),
            alloc_count: AtomicUsize::new(0),
            free_count: AtomicUsize::new(0),
        }
    }

    pub fn alloc_count(&self) -> usize {
        self.alloc_count.load(Ordering::Relaxed)
    }

    pub fn free_count(&self) -> usize {
        self.free_count.load(Ordering::Relaxed)
    }
}

impl Default for LoopbackHostDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostDevice for LoopbackHostDevice {
    async fn buffer_alloc(&self, size: usize, _may_block: bool) -> Option<Vec<u8>> {
        self.alloc_count.fetch_add(1, Ordering::Relaxed);
        Some(vec![0u8; size])
    }

    fn buffer_free(&self, _buffer: Vec<u8>) {
        self.free_count.fetch_add(1, Ordering::Relaxed);
    }

    async fn buffer_send(
        &self,
        _cport_id: u16,
        buffer: &[u8],
        _may_block: bool,
    ) -> Result<Cookie, crate::error::TransportError> {
        let cookie = Cookie(self.next_cookie.fetch_add(1, Ordering::Relaxed));
        // A closed receiver means nothing is wired up on the other end,
        // which is a valid configuration for a standalone device; the send
        // still "succeeds" from this connection's point of view.
        let _ = self.tx.send(buffer.to_vec());
        Ok(cookie)
    }

    fn buffer_cancel(&self, _cookie: Cookie) {}
}

/// Wire two connections back-to-back over in-memory channels: bytes sent on
/// one arrive at the other's `Dispatcher::recv`. The two background tasks
/// this spawns run for the lifetime of the pair; dropping both `Connection`s
/// lets them exit once their channels close.
pub fn loopback_pair(
    protocol_a: Arc<dyn Protocol>,
    protocol_b: Arc<dyn Protocol>,
    config: Config,
) -> (Arc<Connection>, Arc<Connection>) {
    let (tx_a_to_b, mut rx_a_to_b) = mpsc::unbounded_channel::<Vec<u8>>();
    let (tx_b_to_a, mut rx_b_to_a) = mpsc::unbounded_channel::<Vec<u8>>();

    let device_a = Arc::new(LoopbackHostDevice::with_sender(tx_a_to_b));
    let device_b = Arc::new(LoopbackHostDevice::with_sender(tx_b_to_a));

    let conn_a = Connection::new(device_a, protocol_a, 2, config);
    let conn_b = Connection::new(device_b, protocol_b, 1, config);

    let conn_b_for_task = conn_b.clone();
    tokio::spawn(async move {
        while let Some(bytes) = rx_a_to_b.recv().await {
            dispatch::recv(&conn_b_for_task, &bytes).await;
        }
    });
    let conn_a_for_task = conn_a.clone();
    tokio::spawn(async move {
        while let Some(bytes) = rx_b_to_a.recv().await {
            dispatch::recv(&conn_a_for_task, &bytes).await;
        }
    });

    (conn_a, conn_b)
}

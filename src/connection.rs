//! A logical channel between the host and a remote endpoint: the fields the
//! core reads and writes. Everything else about a real connection (the
//! physical socket, the remote's identity beyond its cport id) belongs to
//! the host-device transport, not to this crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer::HostDevice;
use crate::config::Config;
use crate::pending::PendingTable;
use crate::protocol::Protocol;
use crate::runtime::Runner;

pub struct Connection {
    state: Mutex<PendingTable>,
    enabled: AtomicBool,
    host_device: Arc<dyn HostDevice>,
    protocol: Arc<dyn Protocol>,
    runner: Runner,
    pub remote_cport_id: u16,
    pub config: Config,
}

impl Connection {
    pub fn new(
        host_device: Arc<dyn HostDevice>,
        protocol: Arc<dyn Protocol>,
        remote_cport_id: u16,
        config: Config,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Connection {
            state: Mutex::new(PendingTable::default()),
            enabled: AtomicBool::new(true),
            host_device,
            protocol,
            runner: Runner::spawn(weak.clone()),
            remote_cport_id,
            config,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn host_device(&self) -> Arc<dyn HostDevice> {
        self.host_device.clone()
    }

    pub fn protocol(&self) -> Arc<dyn Protocol> {
        self.protocol.clone()
    }

    pub(crate) fn runner(&self) -> &Runner {
        &self.runner
    }

    pub(crate) fn pending(&self) -> &Mutex<PendingTable> {
        &self.state
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().unwrap().pending_count()
    }

    pub fn operation_count(&self) -> usize {
        self.state.lock().unwrap().operation_count()
    }

    /// Stop the Deferred Runner. Queued-but-unrun completions are dropped.
    pub async fn shutdown(&self) {
        self.runner.shutdown().await;
    }
}

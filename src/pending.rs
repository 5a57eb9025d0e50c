//! Per-connection operation tracking: the `operations` list (live Operations
//! not currently awaiting a response) and the `pending` table (Operations
//! with a correlation id in flight), plus the monotonic id counter that
//! feeds it.
//!
//! This type is always accessed through `Connection`'s `std::sync::Mutex`,
//! including from the receive-dispatch path, so every method here is plain
//! synchronous code — no `.await` anywhere in this module.

use std::collections::HashMap;
use std::sync::Arc;

use crate::operation::Operation;

#[derive(Default)]
pub(crate) struct PendingTable {
    operations: Vec<Arc<Operation>>,
    pending: HashMap<u16, Arc<Operation>>,
    next_id: u16,
}

impl PendingTable {
    /// Register a newly created Operation as live-but-not-pending.
    pub fn track(&mut self, op: Arc<Operation>) {
        self.operations.push(op);
    }

    /// Assign the next correlation id, skipping 0 on wrap and skipping any
    /// id currently present in `pending` (wrap-collision is negligible in
    /// practice since the pending set is bounded by transport concurrency,
    /// but the check is cheap here so there is no reason to skip it).
    fn next_operation_id(&mut self) -> u16 {
        loop {
            self.next_id = self.next_id.wrapping_add(1);
            if self.next_id == 0 {
                continue;
            }
            if !self.pending.contains_key(&self.next_id) {
                return self.next_id;
            }
        }
    }

    /// Move `op` from `operations` into `pending`, assigning its id and
    /// stamping it into the request header. Returns the assigned id.
    pub fn insert_pending(&mut self, op: Arc<Operation>) -> u16 {
        let id = self.next_operation_id();
        op.set_id(id);
        if let Some(mut req) = op.take_request() {
            req.set_operation_id(id);
            op.put_request(req);
        }
        self.operations.retain(|o| !Arc::ptr_eq(o, &op));
        self.pending.insert(id, op);
        id
    }

    /// Move the Operation with this id back out of `pending`, if present.
    pub fn remove_pending(&mut self, id: u16) -> Option<Arc<Operation>> {
        let op = self.pending.remove(&id)?;
        self.operations.push(op.clone());
        Some(op)
    }

    /// Look up a pending Operation by correlation id without removing it.
    pub fn find_pending(&self, id: u16) -> Option<Arc<Operation>> {
        self.pending.get(&id).cloned()
    }

    pub fn is_pending(&self, id: u16) -> bool {
        self.pending.contains_key(&id)
    }

    /// Drop an Operation from the live-operations list entirely. The
    /// Operation itself is destroyed only once every `Arc` clone is dropped;
    /// this just stops the Connection from tracking it.
    pub fn forget(&mut self, op: &Arc<Operation>) {
        self.operations.retain(|o| !Arc::ptr_eq(o, op));
        if op.id() != 0 {
            self.pending.remove(&op.id());
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn operation_count(&self) -> usize {
        self.operations.len()
    }
}

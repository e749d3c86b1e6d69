//! The registry's record of one connected tunnel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tunnel_shared::TunnelResponse;
use uuid::Uuid;

/// A message queued for the tunnel's single writer task.
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    Text(String),
    Close(u16),
}

/// A response never arrives for a waiter because the owning tunnel was
/// removed from the registry before it completed.
#[derive(Debug, Clone, Copy)]
pub struct Disconnected;

pub type Waiter = oneshot::Sender<Result<TunnelResponse, Disconnected>>;

/// The pending-request table, plus whether the tunnel has been torn down.
/// `None` means "torn down": no further waiter may be inserted. Using one
/// lock for both the map and this flag is what makes `insert_waiter` and
/// `fail_all_pending` atomic with respect to each other — whichever runs
/// first under the lock decides the fate of a racing caller on the other
/// side.
type PendingTable = Mutex<Option<HashMap<Uuid, Waiter>>>;

pub struct Tunnel {
    pub id: Uuid,
    pub subdomain: String,
    pub local_port: u16,
    pub connected_at: DateTime<Utc>,
    pub tx: mpsc::Sender<OutboundMessage>,
    request_count: AtomicU64,
    pending: PendingTable,
}

impl Tunnel {
    pub fn new(subdomain: String, local_port: u16, tx: mpsc::Sender<OutboundMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            subdomain,
            local_port,
            connected_at: Utc::now(),
            tx,
            request_count: AtomicU64::new(0),
            pending: Mutex::new(Some(HashMap::new())),
        }
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, HashMap::len)
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Registers a waiter before the matching request is transmitted.
    /// Returns `false` if the tunnel has already been torn down by
    /// `fail_all_pending` — the caller must fail the request itself rather
    /// than park a waiter nobody will ever resolve.
    pub fn insert_waiter(&self, id: Uuid, waiter: Waiter) -> bool {
        match self.pending.lock().unwrap().as_mut() {
            Some(pending) => {
                pending.insert(id, waiter);
                true
            }
            None => false,
        }
    }

    pub fn remove_waiter(&self, id: &Uuid) -> Option<Waiter> {
        self.pending.lock().unwrap().as_mut().and_then(|p| p.remove(id))
    }

    pub fn note_request_sent(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Completes a response frame against this tunnel's own pending table.
    /// A response naming an unknown id is dropped silently.
    pub fn complete(&self, response: TunnelResponse) {
        let waiter = self
            .pending
            .lock()
            .unwrap()
            .as_mut()
            .and_then(|p| p.remove(&response.id));
        if let Some(waiter) = waiter {
            let _ = waiter.send(Ok(response));
        }
    }

    /// Fails every outstanding waiter as disconnected and marks the tunnel
    /// torn down, so any `insert_waiter` racing with this call either lands
    /// before the drain (and gets failed along with everything else) or
    /// after it (and is told to fail immediately instead of inserting into
    /// a table nothing will ever drain again). Called once, as part of
    /// removing this tunnel from the registry.
    pub fn fail_all_pending(&self) {
        let drained = self.pending.lock().unwrap().take().unwrap_or_default();
        for (_, waiter) in drained {
            let _ = waiter.send(Err(Disconnected));
        }
    }
}

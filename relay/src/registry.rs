//! The subdomain -> tunnel registry and the request/response correlator.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use tunnel_shared::{ForwardError, ServerFrame, TunnelRequest, TunnelResponse};
use uuid::Uuid;

use crate::subdomain;
use crate::tunnel::{OutboundMessage, Tunnel};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Default)]
pub struct Registry {
    tunnels: DashMap<String, Arc<Tunnel>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStats {
    pub subdomain: String,
    pub local_port: u16,
    pub connected_at: DateTime<Utc>,
    pub request_count: u64,
    pub pending_count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub active_tunnels: usize,
    pub tunnels: Vec<TunnelStats>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Picks a subdomain for a new connection: the requested label if it
    /// sanitizes to something non-empty, otherwise a generated one. Either
    /// way, evicts whatever tunnel currently holds the chosen label
    /// (invariant: at most one tunnel per subdomain, and re-registration
    /// evicts the previous holder).
    pub async fn register(
        &self,
        requested_subdomain: Option<&str>,
        local_port: u16,
        tx: mpsc::Sender<OutboundMessage>,
    ) -> Arc<Tunnel> {
        let sanitized = requested_subdomain.map(subdomain::sanitize).unwrap_or_default();

        let chosen = if sanitized.is_empty() {
            subdomain::generate(|candidate| self.tunnels.contains_key(candidate))
        } else {
            sanitized
        };

        self.remove(&chosen).await;

        let tunnel = Arc::new(Tunnel::new(chosen.clone(), local_port, tx));
        self.tunnels.insert(chosen, tunnel.clone());
        tunnel
    }

    pub fn get(&self, subdomain: &str) -> Option<Arc<Tunnel>> {
        self.tunnels.get(subdomain).map(|e| e.clone())
    }

    /// Unconditionally evicts whatever tunnel currently holds `subdomain`,
    /// failing its pending waiters and closing its channel.
    pub async fn remove(&self, subdomain: &str) {
        if let Some((_, tunnel)) = self.tunnels.remove(subdomain) {
            Self::tear_down(&tunnel, 1000).await;
        }
    }

    /// Evicts `subdomain` only if its current holder is still the tunnel
    /// identified by `tunnel_id`. A session's disconnect cleanup uses this
    /// so a late cleanup never deletes a newer tunnel that has since
    /// replaced it under the same label.
    pub async fn remove_by_channel(&self, subdomain: &str, tunnel_id: Uuid, close_code: u16) {
        let still_current = self
            .tunnels
            .get(subdomain)
            .map(|e| e.id == tunnel_id)
            .unwrap_or(false);

        if !still_current {
            return;
        }

        if let Some((_, tunnel)) = self.tunnels.remove(subdomain) {
            if tunnel.id == tunnel_id {
                Self::tear_down(&tunnel, close_code).await;
            } else {
                // Lost a race with a concurrent re-registration; put it
                // back, it is not ours to remove.
                self.tunnels.insert(subdomain.to_string(), tunnel);
            }
        }
    }

    async fn tear_down(tunnel: &Arc<Tunnel>, close_code: u16) {
        tunnel.fail_all_pending();
        let _ = tunnel.tx.send(OutboundMessage::Close(close_code)).await;
        info!(subdomain = %tunnel.subdomain, "tunnel removed");
    }

    /// The correlator: forwards a request to the tunnel owning `subdomain`
    /// and awaits its response under `timeout`.
    pub async fn forward(
        &self,
        subdomain: &str,
        request: TunnelRequest,
        timeout: Duration,
    ) -> Result<TunnelResponse, ForwardError> {
        let tunnel = self.get(subdomain).ok_or(ForwardError::NotFound)?;

        if !tunnel.is_open() {
            self.remove_by_channel(subdomain, tunnel.id, 1000).await;
            return Err(ForwardError::NotOpen);
        }

        let id = request.id;
        let (waiter_tx, waiter_rx) = oneshot::channel();
        // Invariant: the waiter must exist before the frame is sent, or a
        // fast response could arrive before anyone is listening for it.
        // `insert_waiter` and `Tunnel::fail_all_pending` share one lock, so
        // if a concurrent `Remove`/`RemoveByChannel` tears this tunnel down
        // between `self.get` above and this call, we either land in its
        // drain (and get failed below via `waiter_rx`) or get turned away
        // here and fail immediately — either way the waiter is never
        // silently orphaned to its own 30s timeout.
        if !tunnel.insert_waiter(id, waiter_tx) {
            return Err(ForwardError::Disconnected);
        }

        let frame = ServerFrame::Request { data: request };
        let text = match serde_json::to_string(&frame) {
            Ok(t) => t,
            Err(err) => {
                tunnel.remove_waiter(&id);
                warn!(%err, "failed to serialize tunnel request");
                return Err(ForwardError::NotOpen);
            }
        };

        if tunnel.tx.send(OutboundMessage::Text(text)).await.is_err() {
            tunnel.remove_waiter(&id);
            return Err(ForwardError::NotOpen);
        }
        tunnel.note_request_sent();

        match tokio::time::timeout(timeout, waiter_rx).await {
            Ok(Ok(Ok(response))) => Ok(response),
            Ok(Ok(Err(_disconnected))) => Err(ForwardError::Disconnected),
            Ok(Err(_recv_error)) => Err(ForwardError::Disconnected),
            Err(_elapsed) => {
                tunnel.remove_waiter(&id);
                Err(ForwardError::Timeout)
            }
        }
    }

    /// Dispatches a response frame read from `tunnel`'s own socket against
    /// that tunnel's pending table. Scoping to the session's own tunnel
    /// handle (rather than a registry-wide lookup) is what guarantees a
    /// response only ever completes a waiter registered on the same
    /// tunnel.
    pub fn handle_response(&self, tunnel: &Tunnel, response: TunnelResponse) {
        tunnel.complete(response);
    }

    pub fn stats(&self) -> RegistryStats {
        let tunnels: Vec<TunnelStats> = self
            .tunnels
            .iter()
            .map(|entry| {
                let t = entry.value();
                TunnelStats {
                    subdomain: t.subdomain.clone(),
                    local_port: t.local_port,
                    connected_at: t.connected_at,
                    request_count: t.request_count(),
                    pending_count: t.pending_count(),
                }
            })
            .collect();

        RegistryStats {
            active_tunnels: tunnels.len(),
            tunnels,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(id: Uuid) -> TunnelRequest {
        TunnelRequest {
            id,
            method: "GET".into(),
            path: "/".into(),
            headers: vec![],
            body: None,
        }
    }

    #[tokio::test]
    async fn register_get_roundtrip() {
        let registry = Registry::new();
        let (tx, _rx) = mpsc::channel(8);
        let tunnel = registry.register(Some("foo"), 3000, tx).await;
        assert_eq!(tunnel.subdomain, "foo");
        assert!(registry.get("foo").is_some());
    }

    #[tokio::test]
    async fn register_sanitizes_requested_label() {
        let registry = Registry::new();
        let (tx, _rx) = mpsc::channel(8);
        let tunnel = registry.register(Some("My App!"), 3000, tx).await;
        assert_eq!(tunnel.subdomain, "my-app");
    }

    #[tokio::test]
    async fn register_generates_when_label_sanitizes_to_empty() {
        let registry = Registry::new();
        let (tx, _rx) = mpsc::channel(8);
        let tunnel = registry.register(Some("!!!"), 3000, tx).await;
        assert!(!tunnel.subdomain.is_empty());
    }

    #[tokio::test]
    async fn re_registration_evicts_previous_holder() {
        let registry = Registry::new();
        let (tx1, _rx1) = mpsc::channel(8);
        let first = registry.register(Some("foo"), 3000, tx1).await;

        let id = Uuid::new_v4();
        let (waiter_tx, waiter_rx) = oneshot::channel();
        first.insert_waiter(id, waiter_tx);

        let (tx2, _rx2) = mpsc::channel(8);
        let second = registry.register(Some("foo"), 4000, tx2).await;

        assert_ne!(first.id, second.id);
        assert_eq!(registry.get("foo").unwrap().id, second.id);
        assert!(waiter_rx.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn forward_without_tunnel_is_not_found() {
        let registry = Registry::new();
        let err = registry
            .forward("missing", request(Uuid::new_v4()), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err, ForwardError::NotFound);
    }

    #[tokio::test]
    async fn forward_times_out_and_clears_pending() {
        let registry = Registry::new();
        let (tx, mut rx) = mpsc::channel(8);
        let tunnel = registry.register(Some("foo"), 3000, tx).await;

        let id = Uuid::new_v4();
        let err = registry
            .forward("foo", request(id), Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(err, ForwardError::Timeout);
        assert_eq!(tunnel.pending_count(), 0);

        // the frame was still sent on the wire before the timeout fired
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn forward_completes_on_response() {
        let registry = Registry::new();
        let (tx, mut rx) = mpsc::channel(8);
        let tunnel = registry.register(Some("foo"), 3000, tx).await;

        let id = Uuid::new_v4();
        let forward_fut = registry.forward("foo", request(id), Duration::from_secs(5));

        let sent = rx.recv().await.unwrap();
        assert!(matches!(sent, OutboundMessage::Text(_)));

        registry.handle_response(
            &tunnel,
            TunnelResponse {
                id,
                status_code: 204,
                headers: vec![],
                body: None,
            },
        );

        let response = forward_fut.await.unwrap();
        assert_eq!(response.status_code, 204);
    }

    #[tokio::test]
    async fn remove_by_channel_ignores_stale_tunnel_id() {
        let registry = Registry::new();
        let (tx1, _rx1) = mpsc::channel(8);
        let first = registry.register(Some("foo"), 3000, tx1).await;

        let (tx2, _rx2) = mpsc::channel(8);
        let second = registry.register(Some("foo"), 4000, tx2).await;

        // first's own disconnect cleanup runs after it has already been
        // evicted by the second registration
        registry.remove_by_channel("foo", first.id, 1001).await;

        assert_eq!(registry.get("foo").unwrap().id, second.id);
    }

    #[tokio::test]
    async fn forward_on_closed_channel_self_heals_to_not_found_next_time() {
        let registry = Registry::new();
        let (tx, rx) = mpsc::channel(8);
        registry.register(Some("foo"), 3000, tx).await;
        drop(rx);

        let err = registry
            .forward("foo", request(Uuid::new_v4()), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err, ForwardError::NotOpen);
        assert!(registry.get("foo").is_none());
    }

    #[tokio::test]
    async fn stats_reports_active_tunnels() {
        let registry = Registry::new();
        let (tx, _rx) = mpsc::channel(8);
        registry.register(Some("foo"), 3000, tx).await;

        let stats = registry.stats();
        assert_eq!(stats.active_tunnels, 1);
        assert_eq!(stats.tunnels[0].subdomain, "foo");
    }
}

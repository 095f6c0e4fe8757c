//! Reconnect engine: exponential backoff with ICE-restart-first recovery.
//!
//! A transport dropping to disconnected/failed first sits out a short grace
//! window (flap absorption), then tries an ICE restart on that transport
//! alone; only when neither brings it back does the session tear down and
//! re-join from scratch.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

use crate::client::socket::SignalingSocket;
use crate::ids::TransportId;
use crate::protocol::{ClientRequest, TransportRole};
use crate::sfu::IceParameters;

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        ReconnectConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(800),
        }
    }
}

/// Attempt counter with `base * 2^(n-1)` delays.
pub struct ReconnectEngine {
    config: ReconnectConfig,
    attempts: u32,
}

impl ReconnectEngine {
    pub fn new(config: ReconnectConfig) -> Self {
        ReconnectEngine {
            config,
            attempts: 0,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Registers the next attempt and returns its backoff delay, or `None`
    /// once the budget is spent. `immediate` (first attempt while
    /// foregrounded) bypasses the delay without consuming extra attempts.
    pub fn next_delay(&mut self, immediate: bool) -> Option<Duration> {
        if self.attempts >= self.config.max_attempts {
            return None;
        }
        self.attempts += 1;
        if immediate {
            return Some(Duration::ZERO);
        }
        let factor = 1u32 << (self.attempts - 1).min(16);
        Some(self.config.base_delay * factor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportConnState {
    New,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Client-side view of one send or receive transport. State transitions
/// come from the media stack; recovery logic only observes them.
pub struct ClientTransport {
    pub id: TransportId,
    pub role: TransportRole,
    state_tx: watch::Sender<TransportConnState>,
    last_ice: Mutex<Option<IceParameters>>,
}

impl ClientTransport {
    pub fn new(id: TransportId, role: TransportRole) -> Arc<Self> {
        let (state_tx, _) = watch::channel(TransportConnState::New);
        Arc::new(ClientTransport {
            id,
            role,
            state_tx,
            last_ice: Mutex::new(None),
        })
    }

    pub fn set_state(&self, state: TransportConnState) {
        let _ = self.state_tx.send(state);
    }

    pub fn state(&self) -> TransportConnState {
        *self.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<TransportConnState> {
        self.state_tx.subscribe()
    }

    pub async fn apply_ice(&self, params: IceParameters) {
        *self.last_ice.lock().await = Some(params);
    }

    pub async fn last_applied_ice(&self) -> Option<IceParameters> {
        self.last_ice.lock().await.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The flap healed inside the grace window; nothing was done.
    Absorbed,
    /// Fresh ICE brought the transport back; no reconnect recorded.
    RecoveredByIceRestart,
    /// Tear down and re-auth, re-join.
    NeedsReconnect,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IceRestartAck {
    ice_parameters: IceParameters,
}

/// Runs the recovery ladder for one interrupted transport.
pub async fn recover_transport(
    socket: &Arc<dyn SignalingSocket>,
    transport: &Arc<ClientTransport>,
    disconnect_grace: Duration,
    ice_restart_grace: Duration,
) -> RecoveryOutcome {
    // 1. Absorb brief flaps: a return to connected cancels everything.
    if wait_for_connected(transport, disconnect_grace).await {
        debug!(transport = %transport.id, "Transport flap absorbed");
        return RecoveryOutcome::Absorbed;
    }

    // 2. ICE restart on just this transport.
    let ack = socket
        .request(ClientRequest::RestartIce {
            transport: transport.role,
        })
        .await;
    if let Ok(value) = ack {
        if let Ok(restart) = serde_json::from_value::<IceRestartAck>(value) {
            transport.apply_ice(restart.ice_parameters).await;
            if wait_for_connected(transport, ice_restart_grace).await {
                info!(transport = %transport.id, "Transport recovered via ICE restart");
                return RecoveryOutcome::RecoveredByIceRestart;
            }
        }
    }

    RecoveryOutcome::NeedsReconnect
}

async fn wait_for_connected(transport: &Arc<ClientTransport>, window: Duration) -> bool {
    let mut rx = transport.subscribe();
    if *rx.borrow() == TransportConnState::Connected {
        return true;
    }
    let wait = async {
        while rx.changed().await.is_ok() {
            if *rx.borrow() == TransportConnState::Connected {
                return true;
            }
        }
        false
    };
    tokio::time::timeout(window, wait).await.unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let mut engine = ReconnectEngine::new(ReconnectConfig {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
        });
        assert_eq!(engine.next_delay(false), Some(Duration::from_millis(100)));
        assert_eq!(engine.next_delay(false), Some(Duration::from_millis(200)));
        assert_eq!(engine.next_delay(false), Some(Duration::from_millis(400)));
        assert_eq!(engine.next_delay(false), Some(Duration::from_millis(800)));
        assert_eq!(engine.next_delay(false), None);

        engine.reset();
        assert_eq!(engine.next_delay(true), Some(Duration::ZERO));
    }

    #[tokio::test]
    async fn test_flap_absorbed_inside_grace() {
        let transport = ClientTransport::new(
            TransportId::from("t1"),
            TransportRole::Producer,
        );
        transport.set_state(TransportConnState::Disconnected);

        let waiter = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                wait_for_connected(&transport, Duration::from_millis(200)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.set_state(TransportConnState::Connected);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_grace_window_expires() {
        let transport = ClientTransport::new(
            TransportId::from("t1"),
            TransportRole::Consumer,
        );
        transport.set_state(TransportConnState::Failed);
        assert!(!wait_for_connected(&transport, Duration::from_millis(30)).await);
    }
}

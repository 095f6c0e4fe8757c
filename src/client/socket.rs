//! The signaling socket seam.
//!
//! Production sessions speak JSON over WebSocket; tests and the load
//! simulator use [`InProcessSocket`], which dispatches into a server core
//! directly and observes identical ordering (events queued before acks).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::SignalingError;
use crate::handlers::{ConnectionContext, DisconnectReason, SignalingCore};
use crate::protocol::{ClientRequest, RequestFrame};
use crate::types::{outbox_channel, EventReceiver};

#[async_trait]
pub trait SignalingSocket: Send + Sync {
    /// Sends one request and waits for its ack.
    async fn request(&self, request: ClientRequest) -> Result<serde_json::Value, SignalingError>;

    /// Hands out the event stream. Yields once; later calls return `None`.
    async fn take_events(&self) -> Option<EventReceiver>;

    /// Clean close (client namespace disconnect — no server-side grace).
    async fn close(&self);
}

/// A socket wired straight into an in-process [`SignalingCore`].
pub struct InProcessSocket {
    ctx: Mutex<ConnectionContext>,
    events: Mutex<Option<EventReceiver>>,
    seq: AtomicU64,
    closed: AtomicBool,
}

impl InProcessSocket {
    pub fn connect(core: &Arc<SignalingCore>) -> Arc<Self> {
        let (outbox, inbox) = outbox_channel();
        Arc::new(InProcessSocket {
            ctx: Mutex::new(ConnectionContext::new(Arc::clone(core), outbox)),
            events: Mutex::new(Some(inbox)),
            seq: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Simulates losing the socket for `reason` (e.g. a transport error
    /// that should leave the server waiting out the disconnect grace).
    pub async fn drop_connection(&self, reason: DisconnectReason) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.ctx.lock().await.handle_disconnect(reason).await;
    }
}

#[async_trait]
impl SignalingSocket for InProcessSocket {
    async fn request(&self, request: ClientRequest) -> Result<serde_json::Value, SignalingError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SignalingError::ConnectionFailed(
                "socket is closed".to_string(),
            ));
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let ack = self
            .ctx
            .lock()
            .await
            .dispatch(RequestFrame { seq, request })
            .await;
        match ack.error {
            Some(message) => Err(SignalingError::from_wire(ack.code.as_deref(), &message)),
            None => Ok(ack.result.unwrap_or(serde_json::Value::Null)),
        }
    }

    async fn take_events(&self) -> Option<EventReceiver> {
        self.events.lock().await.take()
    }

    async fn close(&self) {
        self.drop_connection(DisconnectReason::ClientNamespaceDisconnect)
            .await;
    }
}

//! WebSocket front door.
//!
//! Each accepted socket gets a `ConnectionContext` and a bounded outbox.
//! The read half handles frames to completion in arrival order; the write
//! half drains the outbox, so room events queued during a mutation always
//! precede the mutation's own ack on the wire.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};
use warp::ws::{Message, WebSocket};
use warp::Filter;

use crate::handlers::{ConnectionContext, DisconnectReason, SignalingCore};
use crate::health::HealthReporter;
use crate::protocol::{RequestFrame, ServerFrame};
use crate::types::outbox_channel;

/// `GET /ws` (upgrade) + `GET /healthz`.
pub fn routes(
    core: Arc<SignalingCore>,
    health: &HealthReporter,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let ws = warp::path("ws")
        .and(warp::ws())
        .and(warp::any().map(move || Arc::clone(&core)))
        .map(|upgrade: warp::ws::Ws, core: Arc<SignalingCore>| {
            upgrade.on_upgrade(move |socket| handle_socket(socket, core))
        });
    ws.or(health.route())
}

async fn handle_socket(socket: WebSocket, core: Arc<SignalingCore>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbox, mut inbox) = outbox_channel();

    // Write half: drains acks and room events in queue order.
    let writer = tokio::spawn(async move {
        while let Some(frame) = inbox.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(error) => {
                    warn!(error = %error, "Failed to encode outbound frame");
                    continue;
                }
            };
            if ws_tx.send(Message::text(text)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let mut ctx = ConnectionContext::new(core, outbox.clone());
    info!(socket = %ctx.socket_id, "Socket connected");

    let mut reason = DisconnectReason::TransportError;
    while let Some(incoming) = ws_rx.next().await {
        let message = match incoming {
            Ok(message) => message,
            Err(error) => {
                debug!(socket = %ctx.socket_id, error = %error, "Socket read error");
                break;
            }
        };
        if message.is_close() {
            reason = DisconnectReason::ClientNamespaceDisconnect;
            break;
        }
        let Ok(text) = message.to_str() else {
            continue;
        };
        match serde_json::from_str::<RequestFrame>(text) {
            Ok(frame) => {
                let ack = ctx.dispatch(frame).await;
                if outbox.send(ServerFrame::Ack(ack)).await.is_err() {
                    break;
                }
            }
            Err(error) => {
                debug!(socket = %ctx.socket_id, error = %error, "Unparseable frame dropped");
            }
        }
    }

    info!(socket = %ctx.socket_id, ?reason, "Socket closed");
    ctx.handle_disconnect(reason).await;
    // The writer drains whatever the room already queued, then exits when
    // the last outbox clone (held by the room until finalization) drops.
    drop(outbox);
    drop(writer);
}

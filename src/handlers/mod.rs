//! Signaling request handlers, bound per connected socket.
//!
//! Each socket owns a `ConnectionContext`; inbound messages are handled to
//! completion in arrival order. Every handler validates room membership
//! before acting, and failures ride the ack envelope — they never tear the
//! socket down.

pub mod admin;
pub mod chat;
pub mod join;
pub mod media;

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::auth::TokenKeys;
use crate::config::Config;
use crate::error::SignalingError;
use crate::ids::{SocketId, UserId, UserKey};
use crate::metrics::SIGNAL_ERRORS_TOTAL;
use crate::protocol::{Ack, ClientRequest, RequestFrame};
use crate::room::registry::Registry;
use crate::room::{LeaveKind, Room};
use crate::types::EventSender;

/// Process-wide signaling state shared by every connection.
pub struct SignalingCore {
    pub registry: Arc<Registry>,
    pub keys: Arc<TokenKeys>,
    pub config: Arc<Config>,
}

impl SignalingCore {
    pub fn new(config: Arc<Config>) -> Arc<Self> {
        let keys = Arc::new(TokenKeys::new(&config.token_secret));
        let registry = Registry::new(Arc::clone(&config));
        Arc::new(SignalingCore {
            registry,
            keys,
            config,
        })
    }
}

/// The room this socket is joined to.
pub struct Membership {
    pub room: Arc<Room>,
    pub user_id: UserId,
    pub user_key: UserKey,
    pub policy: crate::identity::Policy,
}

/// The room this socket is parked in the waiting room of.
pub struct PendingMembership {
    pub room: Arc<Room>,
    pub user_key: UserKey,
}

/// Why a socket went away; decides between immediate finalization and the
/// disconnect grace window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Transport-level loss (page refresh, network blip). Gets grace.
    TransportError,
    ClientNamespaceDisconnect,
    ServerNamespaceDisconnect,
    ForcedClose,
    ServerShutdown,
}

impl DisconnectReason {
    pub fn immediate(&self) -> bool {
        !matches!(self, DisconnectReason::TransportError)
    }
}

/// Per-socket handler state: `(currentRoom, currentClient, pendingRoom)`.
pub struct ConnectionContext {
    pub core: Arc<SignalingCore>,
    pub socket_id: SocketId,
    pub outbox: EventSender,
    pub membership: Option<Membership>,
    pub pending: Option<PendingMembership>,
}

impl ConnectionContext {
    pub fn new(core: Arc<SignalingCore>, outbox: EventSender) -> Self {
        ConnectionContext {
            core,
            socket_id: SocketId::from(Uuid::new_v4().to_string()),
            outbox,
            membership: None,
            pending: None,
        }
    }

    /// Handles one inbound frame and builds its ack. Room events emitted by
    /// the handler are already queued on subscriber outboxes by the time the
    /// ack is produced.
    pub async fn dispatch(&mut self, frame: RequestFrame) -> Ack {
        let name = frame.request.name();
        debug!(socket = %self.socket_id, request = name, seq = frame.seq, "Handling request");
        match self.handle(frame.request).await {
            Ok(result) => Ack {
                seq: frame.seq,
                result: Some(result),
                error: None,
                code: None,
            },
            Err(error) => {
                SIGNAL_ERRORS_TOTAL
                    .with_label_values(&[error.error_code()])
                    .inc();
                warn!(socket = %self.socket_id, request = name, error = %error, "Request failed");
                Ack {
                    seq: frame.seq,
                    result: None,
                    error: Some(error.display_message()),
                    code: Some(error.error_code().to_string()),
                }
            }
        }
    }

    async fn handle(&mut self, request: ClientRequest) -> Result<serde_json::Value, SignalingError> {
        match request {
            ClientRequest::JoinRoom {
                room_id,
                session_id,
                token,
                display_name,
                ghost,
                webinar_invite_code,
                meeting_invite_code,
            } => {
                join::join_room(
                    self,
                    join::JoinRequest {
                        room_id,
                        session_id,
                        token,
                        display_name,
                        ghost,
                        webinar_invite_code,
                        meeting_invite_code,
                    },
                )
                .await
            }
            ClientRequest::LeaveRoom => join::leave_room(self).await,
            ClientRequest::CreateProducerTransport => {
                media::create_transport(self, crate::protocol::TransportRole::Producer).await
            }
            ClientRequest::CreateConsumerTransport => {
                media::create_transport(self, crate::protocol::TransportRole::Consumer).await
            }
            ClientRequest::ConnectProducerTransport {
                transport_id,
                dtls_parameters,
            } => {
                media::connect_transport(
                    self,
                    crate::protocol::TransportRole::Producer,
                    transport_id,
                    dtls_parameters,
                )
                .await
            }
            ClientRequest::ConnectConsumerTransport {
                transport_id,
                dtls_parameters,
            } => {
                media::connect_transport(
                    self,
                    crate::protocol::TransportRole::Consumer,
                    transport_id,
                    dtls_parameters,
                )
                .await
            }
            ClientRequest::Produce {
                transport_id,
                kind,
                rtp_parameters,
                app_data,
            } => media::produce(self, transport_id, kind, rtp_parameters, app_data).await,
            ClientRequest::Consume {
                producer_id,
                rtp_capabilities,
            } => media::consume(self, producer_id, rtp_capabilities).await,
            ClientRequest::ResumeConsumer { consumer_id } => {
                media::resume_consumer(self, consumer_id).await
            }
            ClientRequest::RestartIce { transport } => media::restart_ice(self, transport).await,
            ClientRequest::CloseProducer { producer_id } => {
                media::close_producer(self, producer_id).await
            }
            ClientRequest::ToggleMute { producer_id, paused } => {
                media::toggle_producer_paused(self, producer_id, paused).await
            }
            ClientRequest::ToggleCamera { producer_id, paused } => {
                media::toggle_producer_paused(self, producer_id, paused).await
            }
            ClientRequest::GetProducers => media::get_producers(self).await,
            ClientRequest::UpdateDisplayName { display_name } => {
                chat::update_display_name(self, display_name).await
            }
            ClientRequest::SendReaction { kind, value, label } => {
                chat::send_reaction(self, kind, value, label).await
            }
            ClientRequest::SendChat { text } => chat::send_chat(self, text).await,
            ClientRequest::HandRaised { raised } => chat::hand_raised(self, raised).await,
            ClientRequest::LockRoom { locked } => admin::lock_room(self, locked).await,
            ClientRequest::LockChat { locked } => admin::lock_chat(self, locked).await,
            ClientRequest::SetNoGuests { no_guests } => admin::set_no_guests(self, no_guests).await,
            ClientRequest::SetTtsDisabled { disabled } => {
                admin::set_tts_disabled(self, disabled).await
            }
            ClientRequest::SetMeetingInviteCode { code } => {
                admin::set_meeting_invite_code(self, code).await
            }
            ClientRequest::AdmitUser { user_id } => admin::admit_user(self, user_id).await,
            ClientRequest::RejectUser { user_id } => admin::reject_user(self, user_id).await,
            ClientRequest::KickUser { user_id } => admin::kick_user(self, user_id).await,
            ClientRequest::WebinarGetConfig => admin::webinar_get_config(self).await,
            ClientRequest::WebinarUpdateConfig {
                enabled,
                public_access,
                locked,
                max_attendees,
                invite_code,
            } => {
                admin::webinar_update_config(
                    self,
                    admin::WebinarUpdate {
                        enabled,
                        public_access,
                        locked,
                        max_attendees,
                        invite_code,
                    },
                )
                .await
            }
            ClientRequest::WebinarGenerateLink => admin::webinar_generate_link(self, false).await,
            ClientRequest::WebinarRotateLink => admin::webinar_generate_link(self, true).await,
            ClientRequest::AppsSetActive { app_id } => admin::apps_set_active(self, app_id).await,
            ClientRequest::AppsSetLocked { locked } => admin::apps_set_locked(self, locked).await,
        }
    }

    /// Socket teardown. Immediate reasons finalize right away; everything
    /// else arms the disconnect grace timer so a racing reconnect can win.
    pub async fn handle_disconnect(&mut self, reason: DisconnectReason) {
        if let Some(pending) = self.pending.take() {
            let mut state = pending.room.state.lock().await;
            if let Some(entry) = state.pending(&pending.user_key) {
                // a second tab may have replaced this socket's entry
                if entry.socket_id == self.socket_id {
                    state.remove_pending(&pending.user_key);
                    state.broadcast_admins(&crate::protocol::ServerEvent::PendingUserLeft {
                        room_id: pending.room.room_id.clone(),
                        user_key: pending.user_key.clone(),
                    });
                }
            }
            let empty = state.is_empty();
            drop(state);
            if empty {
                self.core.registry.cleanup(&pending.room.channel_id).await;
            }
        }

        if let Some(membership) = self.membership.take() {
            debug!(socket = %self.socket_id, user_id = %membership.user_id, ?reason, "Socket disconnected");
            if reason.immediate() {
                membership
                    .room
                    .remove_and_finalize(
                        &self.core.registry,
                        &membership.user_id,
                        LeaveKind::Disconnected,
                        None,
                    )
                    .await;
            } else {
                membership
                    .room
                    .schedule_disconnect(
                        &self.core.registry,
                        membership.user_id.clone(),
                        self.socket_id.clone(),
                    )
                    .await;
            }
        }
    }

    pub(crate) fn membership(&self) -> Result<&Membership, SignalingError> {
        self.membership.as_ref().ok_or(SignalingError::NotInRoom)
    }
}

/// `{ "success": true }` — the ack body for side-effect-only requests.
pub(crate) fn success() -> serde_json::Value {
    serde_json::json!({ "success": true })
}

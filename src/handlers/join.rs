//! `joinRoom` / `leaveRoom`: identity resolution, admission, waiting-room
//! placement, and reconnect classing.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::error::SignalingError;
use crate::identity::{self, UserIdentity};
use crate::ids::{ChannelId, RoomId};
use crate::metrics::{SIGNAL_JOINS_TOTAL, SIGNAL_RECONNECTIONS_TOTAL};
use crate::protocol::{
    ClientMode, IceServerEntry, JoinResult, JoinStatus, ServerEvent,
};
use crate::room::admission::{self, AdmissionDecision, JoinContext};
use crate::room::{Client, LeaveKind, PendingClient, Role};

use super::{success, ConnectionContext, Membership, PendingMembership};

pub struct JoinRequest {
    pub room_id: RoomId,
    pub session_id: String,
    pub token: String,
    pub display_name: Option<String>,
    pub ghost: bool,
    pub webinar_invite_code: Option<String>,
    pub meeting_invite_code: Option<String>,
}

pub async fn join_room(
    ctx: &mut ConnectionContext,
    req: JoinRequest,
) -> Result<serde_json::Value, SignalingError> {
    if ctx.membership.is_some() {
        return Err(SignalingError::Unknown("already in a room".to_string()));
    }
    abandon_waiting(ctx).await;

    let core = Arc::clone(&ctx.core);
    let payload = core
        .keys
        .verify_auth_token(&req.token)
        .ok_or_else(|| SignalingError::ConnectionFailed("invalid auth token".to_string()))?;
    // The session is server-trusted through the token; a client presenting
    // someone else's token is turned away here.
    if payload.session_id != req.session_id {
        return Err(SignalingError::ConnectionFailed(
            "session does not match auth token".to_string(),
        ));
    }
    let identity = identity::build_user_identity(&payload, &req.session_id, &ctx.socket_id)
        .ok_or_else(|| {
            SignalingError::ConnectionFailed("auth payload missing required fields".to_string())
        })?;
    let policy = identity::resolve_policy(&core.config.policies, &payload.client_id);

    let host_requested = payload.is_host;
    if core.registry.is_draining() && !(host_requested && policy.allow_host_join) {
        SIGNAL_JOINS_TOTAL.with_label_values(&["rejected"]).inc();
        return Err(SignalingError::Unknown("server is draining".to_string()));
    }
    let channel_id = ChannelId::compose(&payload.client_id, &req.room_id);
    if core.registry.get(&channel_id).is_none()
        && !host_requested
        && !policy.allow_non_host_room_creation
    {
        SIGNAL_JOINS_TOTAL.with_label_values(&["rejected"]).inc();
        return Err(SignalingError::PermissionDenied(
            "only a host may start this room".to_string(),
        ));
    }

    let room = core.registry.get_or_create(&payload.client_id, &req.room_id);
    let display_name = choose_display_name(&policy, req.display_name.as_deref(), &identity);

    let mut state = room.state.lock().await;
    let decision = admission::decide(
        &state,
        &JoinContext {
            identity: &identity,
            policy: &policy,
            join_mode: payload.join_mode,
            host_requested,
            ghost_requested: req.ghost,
            webinar_token: payload.webinar_token.as_deref(),
            meeting_invite_code: req.meeting_invite_code.as_deref(),
            webinar_invite_code: req.webinar_invite_code.as_deref(),
            keys: core.keys.as_ref(),
            room_id: &req.room_id,
            client_id: &payload.client_id,
        },
    );

    match decision {
        AdmissionDecision::Reject(error) => {
            SIGNAL_JOINS_TOTAL.with_label_values(&["rejected"]).inc();
            let empty = state.is_empty();
            drop(state);
            if empty {
                core.registry.cleanup(&room.channel_id).await;
            }
            Err(error)
        }

        AdmissionDecision::Wait { reason } => {
            state.insert_pending(PendingClient {
                user_key: identity.user_key.clone(),
                display_name: display_name.clone(),
                socket_id: ctx.socket_id.clone(),
                outbox: ctx.outbox.clone(),
            });
            state.broadcast_admins(&ServerEvent::UserRequestedJoin {
                room_id: room.room_id.clone(),
                user_key: identity.user_key.clone(),
                display_name: display_name.clone(),
            });
            let host_present = state.has_admin();
            // with no admin online there is no one to let them in
            state.send_to_pending(
                &identity.user_key,
                &ServerEvent::WaitingRoomStatus {
                    room_id: room.room_id.clone(),
                    reason: reason.as_str().to_string(),
                    host_present,
                },
            );

            let result = JoinResult {
                room_id: room.room_id.clone(),
                status: JoinStatus::Waiting,
                user_id: identity.user_id.clone(),
                host_user_id: state.host_user_id(),
                rtp_capabilities: room.router.rtp_capabilities(),
                existing_producers: Vec::new(),
                is_locked: state.is_locked,
                is_chat_locked: state.is_chat_locked,
                is_tts_disabled: state.is_tts_disabled,
                video_quality: state.current_quality,
                ice_servers: ice_servers(ctx),
                webinar_role: None,
                webinar_attendee_count: None,
            };
            drop(state);
            ctx.pending = Some(PendingMembership {
                room: Arc::clone(&room),
                user_key: identity.user_key.clone(),
            });
            SIGNAL_JOINS_TOTAL.with_label_values(&["waiting"]).inc();
            info!(user_key = %identity.user_key, room = %room.channel_id, "Placed in waiting room");
            Ok(serde_json::to_value(result).expect("join result serializes"))
        }

        AdmissionDecision::Join {
            role,
            mode,
            reconnecting,
            assign_host,
        } => {
            if reconnecting {
                // the racing reconnect wins: cancel finalization and retire
                // the old session silently
                if let Some(old_user_id) = state.clear_pending_disconnect(&identity.user_key) {
                    if let Some(removed) = state.remove_client(&old_user_id) {
                        room.close_media_for_removed(&mut state, &removed).await;
                    }
                }
                SIGNAL_RECONNECTIONS_TOTAL.inc();
            }

            if role == Role::Admin && state.host_user_key.as_ref() == Some(&identity.user_key) {
                state.cancel_cleanup_timer();
            }
            if assign_host {
                state.host_user_key = Some(identity.user_key.clone());
            }
            if state.is_locked {
                state.locked_allow_list.insert(identity.user_key.clone());
            }

            state.insert_client(Client {
                user_id: identity.user_id.clone(),
                user_key: identity.user_key.clone(),
                socket_id: ctx.socket_id.clone(),
                display_name: display_name.clone(),
                role,
                mode,
                outbox: ctx.outbox.clone(),
                send_transport: None,
                recv_transport: None,
                consumers: HashMap::new(),
            });

            if !reconnecting {
                let joined = ServerEvent::UserJoined {
                    room_id: room.room_id.clone(),
                    user_id: identity.user_id.clone(),
                    user_key: identity.user_key.clone(),
                    display_name: display_name.clone(),
                    mode,
                };
                match mode {
                    ClientMode::Participant => {
                        state.broadcast_except(&identity.user_id, &joined);
                    }
                    ClientMode::Ghost => {
                        state.broadcast_filtered(
                            |c| {
                                c.user_id != identity.user_id
                                    && (c.mode == ClientMode::Ghost || c.is_admin())
                            },
                            &joined,
                        );
                    }
                    ClientMode::WebinarAttendee => {}
                }
            }
            if mode == ClientMode::WebinarAttendee {
                state.broadcast_admins(&ServerEvent::WebinarAttendeeCountChanged {
                    room_id: room.room_id.clone(),
                    count: state.attendee_count(),
                });
            }

            // state snapshots for the joiner land before the ack
            state.send_to_user(
                &identity.user_id,
                &ServerEvent::DisplayNameSnapshot {
                    room_id: room.room_id.clone(),
                    names: state.display_name_snapshot(),
                },
            );
            state.send_to_user(
                &identity.user_id,
                &ServerEvent::HandRaisedSnapshot {
                    room_id: room.room_id.clone(),
                    user_ids: state.hand_raised.iter().cloned().collect(),
                },
            );
            if role == Role::Admin {
                state.send_to_user(
                    &identity.user_id,
                    &ServerEvent::PendingUsersSnapshot {
                        room_id: room.room_id.clone(),
                        pending: state.pending_snapshot(),
                    },
                );
            }

            state.apply_quality(core.config.quality_cliff);

            let result = JoinResult {
                room_id: room.room_id.clone(),
                status: JoinStatus::Joined,
                user_id: identity.user_id.clone(),
                host_user_id: state.host_user_id(),
                rtp_capabilities: room.router.rtp_capabilities(),
                existing_producers: state.producers_snapshot_for(&identity.user_id),
                is_locked: state.is_locked,
                is_chat_locked: state.is_chat_locked,
                is_tts_disabled: state.is_tts_disabled,
                video_quality: state.current_quality,
                ice_servers: ice_servers(ctx),
                webinar_role: (mode == ClientMode::WebinarAttendee).then_some(mode),
                webinar_attendee_count: state.webinar.enabled.then(|| state.attendee_count()),
            };
            drop(state);

            ctx.membership = Some(Membership {
                room: Arc::clone(&room),
                user_id: identity.user_id.clone(),
                user_key: identity.user_key.clone(),
                policy,
            });
            let outcome = if reconnecting { "reconnected" } else { "joined" };
            SIGNAL_JOINS_TOTAL.with_label_values(&[outcome]).inc();
            info!(user_id = %identity.user_id, room = %room.channel_id, reconnecting, "Joined room");
            Ok(serde_json::to_value(result).expect("join result serializes"))
        }
    }
}

pub async fn leave_room(ctx: &mut ConnectionContext) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership.take().ok_or(SignalingError::NotInRoom)?;
    membership
        .room
        .remove_and_finalize(
            &ctx.core.registry,
            &membership.user_id,
            LeaveKind::Left,
            None,
        )
        .await;
    Ok(success())
}

/// Leaves the waiting room of whatever room this socket was parked in.
async fn abandon_waiting(ctx: &mut ConnectionContext) {
    let Some(pending) = ctx.pending.take() else {
        return;
    };
    let mut state = pending.room.state.lock().await;
    if let Some(entry) = state.pending(&pending.user_key) {
        if entry.socket_id == ctx.socket_id {
            state.remove_pending(&pending.user_key);
            state.broadcast_admins(&ServerEvent::PendingUserLeft {
                room_id: pending.room.room_id.clone(),
                user_key: pending.user_key.clone(),
            });
        }
    }
    let empty = state.is_empty();
    drop(state);
    if empty {
        ctx.core.registry.cleanup(&pending.room.channel_id).await;
    }
}

/// The requested name wins only when policy allows overrides and it
/// survives sanitization; otherwise the identity-derived name stands.
fn choose_display_name(
    policy: &crate::identity::Policy,
    requested: Option<&str>,
    identity: &UserIdentity,
) -> String {
    if policy.allow_display_name_update {
        if let Some(raw) = requested {
            let sanitized = identity::sanitize_display_name(raw);
            if !sanitized.is_empty() {
                return sanitized;
            }
        }
    }
    identity.display_name.clone()
}

fn ice_servers(ctx: &ConnectionContext) -> Vec<IceServerEntry> {
    ctx.core
        .config
        .ice_servers
        .iter()
        .map(IceServerEntry::from)
        .collect()
}

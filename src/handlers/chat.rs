//! Display names, reactions, hand raising, and chat.

use std::sync::Arc;

use crate::chat::{parse_command, validate_reaction, ChatCommand};
use crate::error::SignalingError;
use crate::identity::sanitize_display_name;
use crate::protocol::{ClientMode, ReactionKind, ServerEvent};
use crate::types::now_ms;

use super::{success, ConnectionContext};

pub async fn update_display_name(
    ctx: &mut ConnectionContext,
    display_name: String,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    if !membership.policy.allow_display_name_update {
        return Err(SignalingError::PermissionDenied(
            "display name changes are not allowed".to_string(),
        ));
    }
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();
    let user_key = membership.user_key.clone();

    let sanitized = sanitize_display_name(&display_name);
    if sanitized.is_empty() {
        return Err(SignalingError::Unknown("display name is empty".to_string()));
    }

    let mut state = room.state.lock().await;
    state.client(&user_id).ok_or(SignalingError::NotInRoom)?;
    if let Some(client) = state.client_mut(&user_id) {
        client.display_name = sanitized.clone();
    }
    state
        .display_names
        .insert(user_key.clone(), sanitized.clone());
    state.broadcast(&ServerEvent::DisplayNameUpdated {
        room_id: room.room_id.clone(),
        user_key,
        display_name: sanitized,
    });
    Ok(success())
}

pub async fn send_reaction(
    ctx: &mut ConnectionContext,
    kind: ReactionKind,
    value: String,
    label: Option<String>,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();

    let state = room.state.lock().await;
    let client = state.client(&user_id).ok_or(SignalingError::NotInRoom)?;
    if client.mode == ClientMode::WebinarAttendee {
        return Err(SignalingError::PermissionDenied(
            "observers cannot send reactions".to_string(),
        ));
    }
    if !validate_reaction(kind, &value) {
        return Err(SignalingError::PermissionDenied(
            "reaction is not on the allowlist".to_string(),
        ));
    }
    state.broadcast(&ServerEvent::Reaction {
        room_id: room.room_id.clone(),
        user_id,
        kind,
        value,
        label,
        timestamp_ms: now_ms(),
    });
    Ok(success())
}

pub async fn hand_raised(
    ctx: &mut ConnectionContext,
    raised: bool,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();

    let mut state = room.state.lock().await;
    state.client(&user_id).ok_or(SignalingError::NotInRoom)?;
    if raised {
        state.hand_raised.insert(user_id.clone());
    } else {
        state.hand_raised.remove(&user_id);
    }
    state.broadcast(&ServerEvent::HandRaised {
        room_id: room.room_id.clone(),
        user_id,
        raised,
    });
    Ok(success())
}

/// Chat ingress. The message is scanned for a leading slash-command before
/// broadcast: `/tts` fans out as speech, the other recognized commands are
/// bounced back to the sender's local toggle, everything else is delivered
/// verbatim.
pub async fn send_chat(
    ctx: &mut ConnectionContext,
    text: String,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();

    let state = room.state.lock().await;
    let client = state.client(&user_id).ok_or(SignalingError::NotInRoom)?;
    if state.is_chat_locked && !client.is_admin() {
        return Err(SignalingError::PermissionDenied(
            "chat is locked".to_string(),
        ));
    }
    let display_name = client.display_name.clone();

    match parse_command(&text) {
        Some(ChatCommand::Tts(tts_text)) => {
            if state.is_tts_disabled {
                return Err(SignalingError::PermissionDenied(
                    "text-to-speech is disabled".to_string(),
                ));
            }
            state.broadcast(&ServerEvent::TtsMessage {
                room_id: room.room_id.clone(),
                user_id,
                text: tts_text,
            });
            Ok(success())
        }
        Some(ChatCommand::ToggleMute) => Ok(serde_json::json!({ "success": true, "command": "mute" })),
        Some(ChatCommand::ToggleCamera) => Ok(serde_json::json!({ "success": true, "command": "cam" })),
        Some(ChatCommand::ToggleHand) => Ok(serde_json::json!({ "success": true, "command": "hand" })),
        None => {
            state.broadcast(&ServerEvent::ChatMessage {
                room_id: room.room_id.clone(),
                user_id,
                display_name,
                text,
                timestamp_ms: now_ms(),
            });
            Ok(success())
        }
    }
}

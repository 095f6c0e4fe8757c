//! Admin-only requests: room policies, waiting-room verdicts, kicks,
//! webinar configuration and links, apps state.

use std::sync::Arc;

use tracing::info;

use crate::error::SignalingError;
use crate::ids::{UserId, UserKey};
use crate::protocol::{ServerEvent, WebinarLinkResult};
use crate::room::webinar;
use crate::room::{LeaveKind, RoomState};

use super::{success, ConnectionContext};

fn require_admin(state: &RoomState, user_id: &UserId) -> Result<(), SignalingError> {
    match state.client(user_id) {
        Some(client) if client.is_admin() => Ok(()),
        Some(_) => Err(SignalingError::NotAdmin),
        None => Err(SignalingError::NotInRoom),
    }
}

pub async fn lock_room(
    ctx: &mut ConnectionContext,
    locked: bool,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();

    let mut state = room.state.lock().await;
    require_admin(&state, &user_id)?;
    state.is_locked = locked;
    state.broadcast(&ServerEvent::RoomLockChanged {
        room_id: room.room_id.clone(),
        locked,
    });
    info!(room = %room.channel_id, locked, "Room lock changed");
    Ok(serde_json::json!({ "success": true, "locked": locked }))
}

pub async fn lock_chat(
    ctx: &mut ConnectionContext,
    locked: bool,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();

    let mut state = room.state.lock().await;
    require_admin(&state, &user_id)?;
    state.is_chat_locked = locked;
    state.broadcast(&ServerEvent::ChatLockChanged {
        room_id: room.room_id.clone(),
        locked,
    });
    Ok(serde_json::json!({ "success": true, "locked": locked }))
}

pub async fn set_no_guests(
    ctx: &mut ConnectionContext,
    no_guests: bool,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();

    let mut state = room.state.lock().await;
    require_admin(&state, &user_id)?;
    state.no_guests = no_guests;
    state.broadcast(&ServerEvent::NoGuestsChanged {
        room_id: room.room_id.clone(),
        no_guests,
    });
    Ok(serde_json::json!({ "success": true, "noGuests": no_guests }))
}

pub async fn set_tts_disabled(
    ctx: &mut ConnectionContext,
    disabled: bool,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();

    let mut state = room.state.lock().await;
    require_admin(&state, &user_id)?;
    state.is_tts_disabled = disabled;
    state.broadcast(&ServerEvent::TtsDisabledChanged {
        room_id: room.room_id.clone(),
        disabled,
    });
    Ok(serde_json::json!({ "success": true, "disabled": disabled }))
}

pub async fn set_meeting_invite_code(
    ctx: &mut ConnectionContext,
    code: Option<String>,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();
    let keys = Arc::clone(&ctx.core.keys);

    let mut state = room.state.lock().await;
    require_admin(&state, &user_id)?;
    state.invite_code_hash = code
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|c| keys.hash_invite_code(c));
    Ok(serde_json::json!({
        "success": true,
        "hasCode": state.invite_code_hash.is_some()
    }))
}

pub async fn admit_user(
    ctx: &mut ConnectionContext,
    user_key: UserKey,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();

    let mut state = room.state.lock().await;
    require_admin(&state, &user_id)?;
    let pending = state
        .remove_pending(&user_key)
        .ok_or_else(|| SignalingError::Unknown("no such pending user".to_string()))?;
    // admitted once, the principal re-joins without another verdict
    state.locked_allow_list.insert(user_key.clone());
    RoomState::deliver(
        &pending.outbox,
        &ServerEvent::JoinApproved {
            room_id: room.room_id.clone(),
        },
    );
    state.broadcast_admins(&ServerEvent::UserAdmitted {
        room_id: room.room_id.clone(),
        user_key: user_key.clone(),
    });
    info!(user_key = %user_key, room = %room.channel_id, "Pending user admitted");
    Ok(success())
}

pub async fn reject_user(
    ctx: &mut ConnectionContext,
    user_key: UserKey,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();

    let mut state = room.state.lock().await;
    require_admin(&state, &user_id)?;
    let pending = state
        .remove_pending(&user_key)
        .ok_or_else(|| SignalingError::Unknown("no such pending user".to_string()))?;
    RoomState::deliver(
        &pending.outbox,
        &ServerEvent::JoinRejected {
            room_id: room.room_id.clone(),
            reason: "rejected by host".to_string(),
        },
    );
    state.broadcast_admins(&ServerEvent::UserRejected {
        room_id: room.room_id.clone(),
        user_key,
    });
    Ok(success())
}

pub async fn kick_user(
    ctx: &mut ConnectionContext,
    target: UserId,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();

    {
        let state = room.state.lock().await;
        require_admin(&state, &user_id)?;
        if state.client(&target).is_none() {
            return Err(SignalingError::Unknown("no such user".to_string()));
        }
    }
    room.remove_and_finalize(&ctx.core.registry, &target, LeaveKind::Kicked, None)
        .await;
    info!(target = %target, room = %room.channel_id, "User kicked");
    Ok(success())
}

pub struct WebinarUpdate {
    pub enabled: Option<bool>,
    pub public_access: Option<bool>,
    pub locked: Option<bool>,
    pub max_attendees: Option<usize>,
    pub invite_code: Option<String>,
}

pub async fn webinar_get_config(
    ctx: &mut ConnectionContext,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();

    let state = room.state.lock().await;
    require_admin(&state, &user_id)?;
    let snapshot = state.webinar.snapshot(state.attendee_count());
    Ok(serde_json::to_value(snapshot).expect("webinar snapshot serializes"))
}

pub async fn webinar_update_config(
    ctx: &mut ConnectionContext,
    update: WebinarUpdate,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();
    let keys = Arc::clone(&ctx.core.keys);

    let mut state = room.state.lock().await;
    require_admin(&state, &user_id)?;
    if let Some(enabled) = update.enabled {
        state.webinar.enabled = enabled;
    }
    if let Some(public_access) = update.public_access {
        state.webinar.public_access = public_access;
    }
    if let Some(locked) = update.locked {
        state.webinar.locked = locked;
    }
    if let Some(max_attendees) = update.max_attendees {
        state.webinar.max_attendees = max_attendees;
    }
    if let Some(code) = update.invite_code {
        let trimmed = code.trim();
        state.webinar.invite_code_hash = if trimmed.is_empty() {
            None
        } else {
            Some(keys.hash_invite_code(trimmed))
        };
    }
    let snapshot = state.webinar.snapshot(state.attendee_count());
    state.broadcast_admins(&ServerEvent::WebinarConfigChanged {
        room_id: room.room_id.clone(),
        config: snapshot.clone(),
    });
    Ok(serde_json::to_value(snapshot).expect("webinar snapshot serializes"))
}

/// `webinar:generateLink` mints against the current link version;
/// `webinar:rotateLink` bumps the version first, invalidating every token
/// minted before it.
pub async fn webinar_generate_link(
    ctx: &mut ConnectionContext,
    rotate: bool,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();
    let keys = Arc::clone(&ctx.core.keys);
    let base_url = ctx.core.config.public_base_url.clone();

    let mut state = room.state.lock().await;
    require_admin(&state, &user_id)?;
    if rotate {
        state.webinar.link_version += 1;
        let snapshot = state.webinar.snapshot(state.attendee_count());
        state.broadcast_admins(&ServerEvent::WebinarConfigChanged {
            room_id: room.room_id.clone(),
            config: snapshot,
        });
        info!(room = %room.channel_id, link_version = state.webinar.link_version, "Webinar link rotated");
    }
    let token = keys.mint_webinar_token(&room.room_id, &room.client_id, state.webinar.link_version);
    let result = WebinarLinkResult {
        url: webinar::build_link(&base_url, &room.room_id, &token),
        link_version: state.webinar.link_version,
    };
    Ok(serde_json::to_value(result).expect("link result serializes"))
}

pub async fn apps_set_active(
    ctx: &mut ConnectionContext,
    app_id: Option<String>,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();

    let mut state = room.state.lock().await;
    let is_admin = state
        .client(&user_id)
        .ok_or(SignalingError::NotInRoom)?
        .is_admin();
    if state.apps.locked && !is_admin {
        return Err(SignalingError::PermissionDenied(
            "apps are locked by the host".to_string(),
        ));
    }
    state.apps.active_app_id = app_id;
    state.broadcast(&ServerEvent::AppsStateChanged {
        room_id: room.room_id.clone(),
        active_app_id: state.apps.active_app_id.clone(),
        locked: state.apps.locked,
    });
    Ok(success())
}

pub async fn apps_set_locked(
    ctx: &mut ConnectionContext,
    locked: bool,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();

    let mut state = room.state.lock().await;
    require_admin(&state, &user_id)?;
    state.apps.locked = locked;
    state.broadcast(&ServerEvent::AppsStateChanged {
        room_id: room.room_id.clone(),
        active_app_id: state.apps.active_app_id.clone(),
        locked,
    });
    Ok(success())
}

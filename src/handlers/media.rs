//! Transport, producer, and consumer requests.
//!
//! SFU calls run while the room lock is held, keeping media bookkeeping
//! serialized with admission and fan-out for the room.

use std::sync::Arc;

use tracing::warn;

use crate::error::SignalingError;
use crate::ids::{ConsumerId, ProducerId, TransportId};
use crate::protocol::{ClientMode, ProducerAppData, TransportRole};
use crate::routing;
use crate::sfu::{DtlsParameters, MediaKind, RtpCapabilities, RtpParameters, SfuError};

use super::{success, ConnectionContext};

fn transport_err(error: SfuError) -> SignalingError {
    SignalingError::TransportError(error.to_string())
}

pub async fn create_transport(
    ctx: &mut ConnectionContext,
    role: TransportRole,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();

    let mut state = room.state.lock().await;
    state.client(&user_id).ok_or(SignalingError::NotInRoom)?;
    let params = room.router.create_transport().await.map_err(transport_err)?;
    {
        let client = state
            .client_mut(&user_id)
            .ok_or(SignalingError::NotInRoom)?;
        // a later create (reconnect, extra publish) supersedes the handle;
        // producers on the old transport live until closed explicitly or
        // the session finalizes
        match role {
            TransportRole::Producer => client.send_transport = Some(params.id.clone()),
            TransportRole::Consumer => client.recv_transport = Some(params.id.clone()),
        }
    }
    Ok(serde_json::to_value(params).expect("transport params serialize"))
}

pub async fn connect_transport(
    ctx: &mut ConnectionContext,
    role: TransportRole,
    transport_id: TransportId,
    dtls_parameters: DtlsParameters,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();

    let state = room.state.lock().await;
    let client = state.client(&user_id).ok_or(SignalingError::NotInRoom)?;
    let owned = match role {
        TransportRole::Producer => client.send_transport.as_ref(),
        TransportRole::Consumer => client.recv_transport.as_ref(),
    };
    if owned != Some(&transport_id) {
        return Err(SignalingError::TransportError(
            "transport does not belong to this session".to_string(),
        ));
    }
    room.router
        .connect_transport(&transport_id, dtls_parameters)
        .await
        .map_err(transport_err)?;
    Ok(success())
}

pub async fn produce(
    ctx: &mut ConnectionContext,
    transport_id: TransportId,
    kind: MediaKind,
    rtp_parameters: RtpParameters,
    app_data: ProducerAppData,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();

    let mut state = room.state.lock().await;
    {
        let client = state.client(&user_id).ok_or(SignalingError::NotInRoom)?;
        if client.mode == ClientMode::WebinarAttendee {
            return Err(SignalingError::PermissionDenied(
                "webinar attendees cannot produce".to_string(),
            ));
        }
        if client.send_transport.as_ref() != Some(&transport_id) {
            return Err(SignalingError::TransportError(
                "produce on an unknown transport".to_string(),
            ));
        }
    }
    let producer_id = room
        .router
        .produce(&transport_id, kind, rtp_parameters)
        .await
        .map_err(transport_err)?;
    let record = state.insert_producer(
        producer_id.clone(),
        user_id,
        kind,
        app_data.source,
        app_data.paused,
    );
    routing::fan_out_new_producer(&mut state, &producer_id, &record);
    Ok(serde_json::json!({ "producerId": producer_id }))
}

pub async fn consume(
    ctx: &mut ConnectionContext,
    producer_id: ProducerId,
    rtp_capabilities: RtpCapabilities,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();

    let mut state = room.state.lock().await;
    let recv_transport = {
        let viewer = state.client(&user_id).ok_or(SignalingError::NotInRoom)?;
        if let Some(existing) = viewer.consumers.get(&producer_id) {
            // duplicate consume requests short-circuit
            return Ok(serde_json::to_value(existing.clone()).expect("consumer params serialize"));
        }
        viewer.recv_transport.clone().ok_or_else(|| {
            SignalingError::TransportError("no consumer transport".to_string())
        })?
    };

    {
        let record = state.producer(&producer_id).ok_or_else(|| {
            SignalingError::TransportError("producer is no longer available".to_string())
        })?;
        if record.owner_user_id == user_id {
            return Err(SignalingError::PermissionDenied(
                "cannot consume an own producer".to_string(),
            ));
        }
        let viewer = state.client(&user_id).ok_or(SignalingError::NotInRoom)?;
        let owner_is_ghost = state
            .client(&record.owner_user_id)
            .map(|c| c.mode == ClientMode::Ghost)
            .unwrap_or(false);
        if owner_is_ghost && viewer.mode != ClientMode::Ghost && !viewer.is_admin() {
            return Err(SignalingError::PermissionDenied(
                "producer is not available".to_string(),
            ));
        }
        if viewer.mode == ClientMode::WebinarAttendee
            && !crate::room::webinar::visible_producers(&state).contains(&producer_id)
        {
            return Err(SignalingError::PermissionDenied(
                "producer is not in the attendee feed".to_string(),
            ));
        }
    }

    let params = room
        .router
        .consume(&recv_transport, &producer_id, rtp_capabilities)
        .await
        .map_err(transport_err)?;
    if let Some(viewer) = state.client_mut(&user_id) {
        viewer.consumers.insert(producer_id, params.clone());
    }
    Ok(serde_json::to_value(params).expect("consumer params serialize"))
}

pub async fn resume_consumer(
    ctx: &mut ConnectionContext,
    consumer_id: ConsumerId,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    membership
        .room
        .router
        .resume_consumer(&consumer_id)
        .await
        .map_err(transport_err)?;
    Ok(success())
}

pub async fn restart_ice(
    ctx: &mut ConnectionContext,
    transport: TransportRole,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();

    let state = room.state.lock().await;
    let client = state.client(&user_id).ok_or(SignalingError::NotInRoom)?;
    let transport_id = match transport {
        TransportRole::Producer => client.send_transport.clone(),
        TransportRole::Consumer => client.recv_transport.clone(),
    }
    .ok_or_else(|| SignalingError::TransportError("transport not created".to_string()))?;
    drop(state);

    let ice_parameters = room
        .router
        .restart_ice(&transport_id)
        .await
        .map_err(transport_err)?;
    Ok(serde_json::json!({ "iceParameters": ice_parameters }))
}

pub async fn close_producer(
    ctx: &mut ConnectionContext,
    producer_id: ProducerId,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();

    let mut state = room.state.lock().await;
    let record = state
        .producer(&producer_id)
        .cloned()
        .ok_or_else(|| SignalingError::TransportError("unknown producer".to_string()))?;
    if record.owner_user_id != user_id {
        return Err(SignalingError::PermissionDenied(
            "not the producer owner".to_string(),
        ));
    }
    state.remove_producer(&producer_id);
    if let Err(error) = room.router.close_producer(&producer_id).await {
        warn!(producer_id = %producer_id, error = %error, "Router close failed");
    }
    routing::fan_out_producer_closed(&mut state, &producer_id, &record);
    Ok(success())
}

/// `toggleMute` / `toggleCamera`: flips the authoritative pause bit. The
/// owner drives their own state; admins can force it.
pub async fn toggle_producer_paused(
    ctx: &mut ConnectionContext,
    producer_id: ProducerId,
    paused: bool,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();

    let mut state = room.state.lock().await;
    let is_owner = state
        .producer(&producer_id)
        .map(|r| r.owner_user_id == user_id)
        .ok_or_else(|| SignalingError::TransportError("unknown producer".to_string()))?;
    let is_admin = state
        .client(&user_id)
        .map(|c| c.is_admin())
        .unwrap_or(false);
    if !is_owner && !is_admin {
        return Err(SignalingError::PermissionDenied(
            "not the producer owner".to_string(),
        ));
    }
    let record = state
        .set_producer_paused(&producer_id, paused)
        .ok_or_else(|| SignalingError::TransportError("unknown producer".to_string()))?;
    routing::fan_out_pause_changed(&mut state, &record);
    Ok(success())
}

pub async fn get_producers(
    ctx: &mut ConnectionContext,
) -> Result<serde_json::Value, SignalingError> {
    let membership = ctx.membership()?;
    let room = Arc::clone(&membership.room);
    let user_id = membership.user_id.clone();

    let state = room.state.lock().await;
    let producers = state.producers_snapshot_for(&user_id);
    Ok(serde_json::json!({ "producers": producers }))
}

//! Producer lifecycle fan-out.
//!
//! `newProducer` goes to every non-owner in the room channel, except that
//! ghost-owned producers stay within the ghost/admin circle and webinar
//! attendees only hear about producers the feed selector has picked for
//! them. The pause bit is authoritative mute/camera state for its kind.

use crate::ids::ProducerId;
use crate::protocol::{ClientMode, ServerEvent};
use crate::room::{webinar, ProducerRecord, RoomState};
use crate::sfu::MediaKind;

fn owner_is_ghost(state: &RoomState, record: &ProducerRecord) -> bool {
    state
        .client(&record.owner_user_id)
        .map(|c| c.mode == ClientMode::Ghost)
        .unwrap_or(false)
}

/// Announces a freshly created producer and refreshes the attendee feed.
pub fn fan_out_new_producer(state: &mut RoomState, producer_id: &ProducerId, record: &ProducerRecord) {
    let speaker_changed = webinar::refresh_active_speaker(state);
    let ghost_owner = owner_is_ghost(state, record);
    let feed = webinar::visible_producers(state);

    let event = ServerEvent::NewProducer {
        room_id: state.room_id.clone(),
        producer_id: producer_id.clone(),
        user_id: record.owner_user_id.clone(),
        kind: record.kind,
        source: record.source,
        paused: record.paused,
    };
    state.broadcast_filtered(
        |client| {
            if client.user_id == record.owner_user_id {
                return false;
            }
            if ghost_owner && client.mode != ClientMode::Ghost && !client.is_admin() {
                return false;
            }
            if client.is_attendee() {
                return feed.contains(producer_id);
            }
            true
        },
        &event,
    );

    if speaker_changed || feed.contains(producer_id) {
        webinar::fan_out_feed_changed(state);
    }
}

/// Fans out the retirement of a producer with its owner context attached.
pub fn fan_out_producer_closed(
    state: &mut RoomState,
    producer_id: &ProducerId,
    record: &ProducerRecord,
) {
    let ghost_owner = owner_is_ghost(state, record);
    let event = ServerEvent::ProducerClosed {
        room_id: state.room_id.clone(),
        producer_id: producer_id.clone(),
        user_id: record.owner_user_id.clone(),
    };
    state.broadcast_filtered(
        |client| {
            if client.user_id == record.owner_user_id {
                return false;
            }
            !(ghost_owner && client.mode != ClientMode::Ghost && !client.is_admin())
        },
        &event,
    );
    state.purge_consumer_entries(producer_id);

    if webinar::refresh_active_speaker(state) {
        webinar::fan_out_feed_changed(state);
    }
}

/// Broadcasts the authoritative pause bit as mute / camera-off state.
pub fn fan_out_pause_changed(state: &mut RoomState, record: &ProducerRecord) {
    let event = match record.kind {
        MediaKind::Audio => ServerEvent::ParticipantMuted {
            room_id: state.room_id.clone(),
            user_id: record.owner_user_id.clone(),
            paused: record.paused,
        },
        MediaKind::Video => ServerEvent::ParticipantCameraOff {
            room_id: state.room_id.clone(),
            user_id: record.owner_user_id.clone(),
            paused: record.paused,
        },
    };
    state.broadcast(&event);

    if webinar::refresh_active_speaker(state) {
        webinar::fan_out_feed_changed(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{SocketId, UserId, UserKey};
    use crate::protocol::ServerFrame;
    use crate::room::{Client, Role};
    use crate::sfu::ProducerSource;
    use crate::types::{outbox_channel, EventReceiver};
    use std::collections::HashMap;

    fn add_client(
        state: &mut RoomState,
        key: &str,
        role: Role,
        mode: ClientMode,
    ) -> (UserId, EventReceiver) {
        let user_key = UserKey::from(key);
        let user_id = UserId::compose(&user_key, "s1");
        let (tx, rx) = outbox_channel();
        state.insert_client(Client {
            user_id: user_id.clone(),
            user_key,
            socket_id: SocketId::from(format!("sock-{key}")),
            display_name: key.to_string(),
            role,
            mode,
            outbox: tx,
            send_transport: None,
            recv_transport: None,
            consumers: HashMap::new(),
        });
        (user_id, rx)
    }

    fn drain(rx: &mut EventReceiver) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let ServerFrame::Event(event) = frame {
                events.push(event);
            }
        }
        events
    }

    #[test]
    fn test_new_producer_skips_owner_and_filters_attendees() {
        let mut state = RoomState::for_tests("R");
        let (owner, mut owner_rx) = add_client(&mut state, "owner", Role::Participant, ClientMode::Participant);
        let (_viewer, mut viewer_rx) = add_client(&mut state, "viewer", Role::Participant, ClientMode::Participant);
        let (_attendee, mut attendee_rx) =
            add_client(&mut state, "watcher", Role::Participant, ClientMode::WebinarAttendee);

        // a video-only producer: not in the attendee feed (no active speaker)
        let pid = ProducerId::from("v1");
        let record = state.insert_producer(
            pid.clone(),
            owner.clone(),
            MediaKind::Video,
            ProducerSource::Webcam,
            false,
        );
        fan_out_new_producer(&mut state, &pid, &record);

        assert!(drain(&mut owner_rx).is_empty());
        let viewer_events = drain(&mut viewer_rx);
        assert!(matches!(viewer_events[0], ServerEvent::NewProducer { .. }));
        assert!(drain(&mut attendee_rx)
            .iter()
            .all(|e| !matches!(e, ServerEvent::NewProducer { .. })));

        // audio makes the owner active speaker; feed opens for the attendee
        let aid = ProducerId::from("a1");
        let audio = state.insert_producer(
            aid.clone(),
            owner.clone(),
            MediaKind::Audio,
            ProducerSource::Webcam,
            false,
        );
        fan_out_new_producer(&mut state, &aid, &audio);
        let attendee_events = drain(&mut attendee_rx);
        assert!(attendee_events
            .iter()
            .any(|e| matches!(e, ServerEvent::NewProducer { .. })));
        assert!(attendee_events
            .iter()
            .any(|e| matches!(e, ServerEvent::WebinarFeedChanged { .. })));
    }

    #[test]
    fn test_ghost_producers_stay_in_ghost_circle() {
        let mut state = RoomState::for_tests("R");
        let (ghost, _ghost_rx) = add_client(&mut state, "ghost", Role::Admin, ClientMode::Ghost);
        let (_plain, mut plain_rx) = add_client(&mut state, "plain", Role::Participant, ClientMode::Participant);
        let (_admin, mut admin_rx) = add_client(&mut state, "admin", Role::Admin, ClientMode::Participant);

        let pid = ProducerId::from("g1");
        let record = state.insert_producer(
            pid.clone(),
            ghost.clone(),
            MediaKind::Video,
            ProducerSource::Webcam,
            false,
        );
        fan_out_new_producer(&mut state, &pid, &record);

        assert!(drain(&mut plain_rx).is_empty());
        assert!(drain(&mut admin_rx)
            .iter()
            .any(|e| matches!(e, ServerEvent::NewProducer { .. })));
    }

    #[test]
    fn test_pause_bit_broadcasts_by_kind() {
        let mut state = RoomState::for_tests("R");
        let (owner, _rx) = add_client(&mut state, "o", Role::Participant, ClientMode::Participant);
        let (_viewer, mut viewer_rx) = add_client(&mut state, "v", Role::Participant, ClientMode::Participant);

        let pid = ProducerId::from("a1");
        state.insert_producer(pid.clone(), owner, MediaKind::Audio, ProducerSource::Webcam, false);
        let record = state.set_producer_paused(&pid, true).unwrap();
        fan_out_pause_changed(&mut state, &record);

        let events = drain(&mut viewer_rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, ServerEvent::ParticipantMuted { paused: true, .. })));
    }
}

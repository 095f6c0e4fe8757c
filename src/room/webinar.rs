//! Webinar configuration and the attendee feed selector.
//!
//! Watch-only attendees never see the full producer table; the selector
//! reduces it to any live screen-share owned by a speaker plus the active
//! speaker's own audio and video. Attendees resync through `getProducers`
//! whenever `webinar:feedChanged` fires.

use std::collections::HashSet;

use crate::ids::{ProducerId, RoomId};
use crate::protocol::{ClientMode, ServerEvent, WebinarConfigSnapshot};
use crate::sfu::{MediaKind, ProducerSource};

use super::{Client, RoomState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    ActiveSpeaker,
}

impl FeedMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedMode::ActiveSpeaker => "active-speaker",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WebinarConfig {
    pub enabled: bool,
    pub public_access: bool,
    pub locked: bool,
    pub max_attendees: usize,
    pub invite_code_hash: Option<String>,
    pub link_version: u64,
    pub feed_mode: FeedMode,
}

impl WebinarConfig {
    pub fn new(max_attendees: usize) -> Self {
        WebinarConfig {
            enabled: false,
            public_access: false,
            locked: false,
            max_attendees,
            invite_code_hash: None,
            link_version: 1,
            feed_mode: FeedMode::ActiveSpeaker,
        }
    }

    pub fn snapshot(&self, attendee_count: usize) -> WebinarConfigSnapshot {
        WebinarConfigSnapshot {
            enabled: self.enabled,
            public_access: self.public_access,
            locked: self.locked,
            max_attendees: self.max_attendees,
            has_invite_code: self.invite_code_hash.is_some(),
            link_version: self.link_version,
            feed_mode: self.feed_mode.as_str().to_string(),
            attendee_count,
        }
    }
}

/// Canonical webinar link: `<base>/w/<roomId>?wt=<signedToken>`.
pub fn build_link(base_url: &str, room_id: &RoomId, token: &str) -> String {
    format!("{}/w/{}?wt={}", base_url.trim_end_matches('/'), room_id, token)
}

fn is_speaker(client: Option<&Client>) -> bool {
    client
        .map(|c| !c.is_attendee() && c.mode != ClientMode::Ghost)
        .unwrap_or(false)
}

/// The producer set an attendee may consume right now.
pub fn visible_producers(state: &RoomState) -> HashSet<ProducerId> {
    let mut visible = HashSet::new();
    for (id, record) in state.producers() {
        if record.paused || !is_speaker(state.client(&record.owner_user_id)) {
            continue;
        }
        if record.source == ProducerSource::Screen {
            visible.insert(id.clone());
        }
    }
    if let Some(speaker) = &state.active_speaker {
        for (id, record) in state.producers() {
            if &record.owner_user_id == speaker
                && record.source == ProducerSource::Webcam
                && !record.paused
            {
                visible.insert(id.clone());
            }
        }
    }
    visible
}

/// Recomputes the active speaker: the owner of the most recently created or
/// unpaused live audio producer. Returns whether the slot changed.
pub fn refresh_active_speaker(state: &mut RoomState) -> bool {
    let candidate = state
        .producers()
        .filter(|(_, r)| r.kind == MediaKind::Audio && !r.paused)
        .filter(|(_, r)| is_speaker(state.client(&r.owner_user_id)))
        .max_by_key(|(_, r)| r.seq)
        .map(|(_, r)| r.owner_user_id.clone());
    if candidate != state.active_speaker {
        state.active_speaker = candidate;
        true
    } else {
        false
    }
}

/// Tells attendees their visible set moved; they follow up with
/// `getProducers`.
pub fn fan_out_feed_changed(state: &RoomState) {
    state.broadcast_filtered(
        Client::is_attendee,
        &ServerEvent::WebinarFeedChanged {
            room_id: state.room_id.clone(),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{SocketId, UserId, UserKey};
    use crate::room::Role;
    use crate::types::outbox_channel;
    use std::collections::HashMap;

    fn add_client(state: &mut RoomState, key: &str, mode: ClientMode) -> UserId {
        let user_key = UserKey::from(key);
        let user_id = UserId::compose(&user_key, "s1");
        let (tx, rx) = outbox_channel();
        std::mem::forget(rx);
        state.insert_client(Client {
            user_id: user_id.clone(),
            user_key,
            socket_id: SocketId::from(format!("sock-{key}")),
            display_name: key.to_string(),
            role: Role::Participant,
            mode,
            outbox: tx,
            send_transport: None,
            recv_transport: None,
            consumers: HashMap::new(),
        });
        user_id
    }

    fn add_producer(
        state: &mut RoomState,
        id: &str,
        owner: &UserId,
        kind: MediaKind,
        source: ProducerSource,
    ) -> ProducerId {
        let producer_id = ProducerId::from(id);
        state.insert_producer(producer_id.clone(), owner.clone(), kind, source, false);
        producer_id
    }

    #[test]
    fn test_active_speaker_tracks_latest_audio() {
        let mut state = RoomState::for_tests("R");
        let a = add_client(&mut state, "a", ClientMode::Participant);
        let b = add_client(&mut state, "b", ClientMode::Participant);

        add_producer(&mut state, "a-audio", &a, MediaKind::Audio, ProducerSource::Webcam);
        assert!(refresh_active_speaker(&mut state));
        assert_eq!(state.active_speaker.as_ref(), Some(&a));

        add_producer(&mut state, "b-audio", &b, MediaKind::Audio, ProducerSource::Webcam);
        assert!(refresh_active_speaker(&mut state));
        assert_eq!(state.active_speaker.as_ref(), Some(&b));

        // muting b hands the slot back to a
        state.set_producer_paused(&ProducerId::from("b-audio"), true);
        assert!(refresh_active_speaker(&mut state));
        assert_eq!(state.active_speaker.as_ref(), Some(&a));
    }

    #[test]
    fn test_feed_is_speaker_media_plus_screens() {
        let mut state = RoomState::for_tests("R");
        let a = add_client(&mut state, "a", ClientMode::Participant);
        let b = add_client(&mut state, "b", ClientMode::Participant);
        let attendee = add_client(&mut state, "w", ClientMode::WebinarAttendee);

        let a_audio = add_producer(&mut state, "a-audio", &a, MediaKind::Audio, ProducerSource::Webcam);
        let a_video = add_producer(&mut state, "a-video", &a, MediaKind::Video, ProducerSource::Webcam);
        let b_video = add_producer(&mut state, "b-video", &b, MediaKind::Video, ProducerSource::Webcam);
        refresh_active_speaker(&mut state);

        let visible = visible_producers(&state);
        assert!(visible.contains(&a_audio));
        assert!(visible.contains(&a_video));
        assert!(!visible.contains(&b_video));

        // b's screen joins the feed while a stays the active speaker
        let b_screen = add_producer(&mut state, "b-screen", &b, MediaKind::Video, ProducerSource::Screen);
        assert!(!refresh_active_speaker(&mut state));
        let visible = visible_producers(&state);
        assert!(visible.contains(&b_screen));
        assert!(visible.contains(&a_audio));

        // attendee producers never enter the feed
        let w_audio = add_producer(&mut state, "w-audio", &attendee, MediaKind::Audio, ProducerSource::Webcam);
        let visible = visible_producers(&state);
        assert!(!visible.contains(&w_audio));
    }

    #[test]
    fn test_link_format() {
        let link = build_link("https://meet.example.org/", &RoomId::from("ABC"), "tok");
        assert_eq!(link, "https://meet.example.org/w/ABC?wt=tok");
    }

    #[test]
    fn test_snapshot_reports_code_presence_not_value() {
        let mut config = WebinarConfig::new(50);
        config.invite_code_hash = Some("hash".into());
        let snap = config.snapshot(3);
        assert!(snap.has_invite_code);
        assert_eq!(snap.attendee_count, 3);
        assert_eq!(snap.feed_mode, "active-speaker");
    }
}

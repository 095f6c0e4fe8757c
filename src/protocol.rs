//! Wire contract between client sessions and the signaling server.
//!
//! Every inbound request carries a `seq` and is acknowledged with an ack
//! envelope holding either a result payload or an error string. Room events
//! are pushed separately and always carry `roomId` so receivers can filter
//! out events from a room they have already left.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::config::IceServerConfig;
use crate::ids::{ConsumerId, ProducerId, RoomId, TransportId, UserId, UserKey};
use crate::sfu::{
    DtlsParameters, MediaKind, ProducerSource, RtpCapabilities, RtpParameters, TransportParams,
};

/// One client → server frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub seq: u64,
    #[serde(flatten)]
    pub request: ClientRequest,
}

/// One server → client frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerFrame {
    Ack(Ack),
    Event(ServerEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ack {
    pub seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Error-taxonomy code (`PERMISSION_DENIED`, ...) when `error` is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Which of the session's two transports a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportRole {
    Producer,
    Consumer,
}

/// `appData` attached to a produce request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProducerAppData {
    #[serde(rename = "type")]
    pub source: ProducerSource,
    #[serde(default)]
    pub paused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Emoji,
    Asset,
}

/// Visibility mode of a joined session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientMode {
    Participant,
    Ghost,
    WebinarAttendee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoQuality {
    Standard,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientRequest {
    JoinRoom {
        room_id: RoomId,
        session_id: String,
        token: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
        #[serde(default)]
        ghost: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        webinar_invite_code: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        meeting_invite_code: Option<String>,
    },
    LeaveRoom,
    CreateProducerTransport,
    CreateConsumerTransport,
    ConnectProducerTransport {
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    },
    ConnectConsumerTransport {
        transport_id: TransportId,
        dtls_parameters: DtlsParameters,
    },
    Produce {
        transport_id: TransportId,
        kind: MediaKind,
        rtp_parameters: RtpParameters,
        app_data: ProducerAppData,
    },
    Consume {
        producer_id: ProducerId,
        rtp_capabilities: RtpCapabilities,
    },
    ResumeConsumer {
        consumer_id: ConsumerId,
    },
    RestartIce {
        transport: TransportRole,
    },
    CloseProducer {
        producer_id: ProducerId,
    },
    ToggleMute {
        producer_id: ProducerId,
        paused: bool,
    },
    ToggleCamera {
        producer_id: ProducerId,
        paused: bool,
    },
    UpdateDisplayName {
        display_name: String,
    },
    SendReaction {
        kind: ReactionKind,
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    SendChat {
        text: String,
    },
    HandRaised {
        raised: bool,
    },
    LockRoom {
        locked: bool,
    },
    LockChat {
        locked: bool,
    },
    SetNoGuests {
        no_guests: bool,
    },
    SetTtsDisabled {
        disabled: bool,
    },
    SetMeetingInviteCode {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    AdmitUser {
        user_id: UserKey,
    },
    RejectUser {
        user_id: UserKey,
    },
    KickUser {
        user_id: UserId,
    },
    #[serde(rename = "webinar:getConfig")]
    WebinarGetConfig,
    #[serde(rename = "webinar:updateConfig")]
    WebinarUpdateConfig {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        enabled: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        public_access: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        locked: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_attendees: Option<usize>,
        /// `Some("")` clears the code, `Some(code)` replaces it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        invite_code: Option<String>,
    },
    #[serde(rename = "webinar:generateLink")]
    WebinarGenerateLink,
    #[serde(rename = "webinar:rotateLink")]
    WebinarRotateLink,
    #[serde(rename = "apps:setActive")]
    AppsSetActive {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        app_id: Option<String>,
    },
    #[serde(rename = "apps:setLocked")]
    AppsSetLocked {
        locked: bool,
    },
    GetProducers,
}

impl ClientRequest {
    /// Request name as it appears on the wire; used for logging and error
    /// counters.
    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "joinRoom",
            Self::LeaveRoom => "leaveRoom",
            Self::CreateProducerTransport => "createProducerTransport",
            Self::CreateConsumerTransport => "createConsumerTransport",
            Self::ConnectProducerTransport { .. } => "connectProducerTransport",
            Self::ConnectConsumerTransport { .. } => "connectConsumerTransport",
            Self::Produce { .. } => "produce",
            Self::Consume { .. } => "consume",
            Self::ResumeConsumer { .. } => "resumeConsumer",
            Self::RestartIce { .. } => "restartIce",
            Self::CloseProducer { .. } => "closeProducer",
            Self::ToggleMute { .. } => "toggleMute",
            Self::ToggleCamera { .. } => "toggleCamera",
            Self::UpdateDisplayName { .. } => "updateDisplayName",
            Self::SendReaction { .. } => "sendReaction",
            Self::SendChat { .. } => "sendChat",
            Self::HandRaised { .. } => "handRaised",
            Self::LockRoom { .. } => "lockRoom",
            Self::LockChat { .. } => "lockChat",
            Self::SetNoGuests { .. } => "setNoGuests",
            Self::SetTtsDisabled { .. } => "setTtsDisabled",
            Self::SetMeetingInviteCode { .. } => "setMeetingInviteCode",
            Self::AdmitUser { .. } => "admitUser",
            Self::RejectUser { .. } => "rejectUser",
            Self::KickUser { .. } => "kickUser",
            Self::WebinarGetConfig => "webinar:getConfig",
            Self::WebinarUpdateConfig { .. } => "webinar:updateConfig",
            Self::WebinarGenerateLink => "webinar:generateLink",
            Self::WebinarRotateLink => "webinar:rotateLink",
            Self::AppsSetActive { .. } => "apps:setActive",
            Self::AppsSetLocked { .. } => "apps:setLocked",
            Self::GetProducers => "getProducers",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    UserJoined {
        room_id: RoomId,
        user_id: UserId,
        user_key: UserKey,
        display_name: String,
        mode: ClientMode,
    },
    UserLeft {
        room_id: RoomId,
        user_id: UserId,
    },
    DisplayNameSnapshot {
        room_id: RoomId,
        names: HashMap<String, String>,
    },
    DisplayNameUpdated {
        room_id: RoomId,
        user_key: UserKey,
        display_name: String,
    },
    PendingUsersSnapshot {
        room_id: RoomId,
        pending: Vec<PendingUserSummary>,
    },
    UserRequestedJoin {
        room_id: RoomId,
        #[serde(rename = "userId")]
        user_key: UserKey,
        display_name: String,
    },
    UserAdmitted {
        room_id: RoomId,
        user_key: UserKey,
    },
    UserRejected {
        room_id: RoomId,
        user_key: UserKey,
    },
    PendingUserLeft {
        room_id: RoomId,
        user_key: UserKey,
    },
    JoinApproved {
        room_id: RoomId,
    },
    JoinRejected {
        room_id: RoomId,
        reason: String,
    },
    WaitingRoomStatus {
        room_id: RoomId,
        reason: String,
        host_present: bool,
    },
    HostAssigned {
        room_id: RoomId,
        host_user_id: UserId,
    },
    HostChanged {
        room_id: RoomId,
        host_user_id: UserId,
    },
    RoomLockChanged {
        room_id: RoomId,
        locked: bool,
    },
    NoGuestsChanged {
        room_id: RoomId,
        no_guests: bool,
    },
    ChatLockChanged {
        room_id: RoomId,
        locked: bool,
    },
    TtsDisabledChanged {
        room_id: RoomId,
        disabled: bool,
    },
    ParticipantMuted {
        room_id: RoomId,
        user_id: UserId,
        paused: bool,
    },
    ParticipantCameraOff {
        room_id: RoomId,
        user_id: UserId,
        paused: bool,
    },
    HandRaised {
        room_id: RoomId,
        user_id: UserId,
        raised: bool,
    },
    HandRaisedSnapshot {
        room_id: RoomId,
        user_ids: Vec<UserId>,
    },
    NewProducer {
        room_id: RoomId,
        producer_id: ProducerId,
        user_id: UserId,
        kind: MediaKind,
        source: ProducerSource,
        paused: bool,
    },
    ProducerClosed {
        room_id: RoomId,
        producer_id: ProducerId,
        user_id: UserId,
    },
    Reaction {
        room_id: RoomId,
        user_id: UserId,
        kind: ReactionKind,
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
        timestamp_ms: u64,
    },
    ChatMessage {
        room_id: RoomId,
        user_id: UserId,
        display_name: String,
        text: String,
        timestamp_ms: u64,
    },
    TtsMessage {
        room_id: RoomId,
        user_id: UserId,
        text: String,
    },
    SetVideoQuality {
        room_id: RoomId,
        quality: VideoQuality,
    },
    Kicked {
        room_id: RoomId,
    },
    RoomClosed {
        room_id: RoomId,
    },
    Redirect {
        room_id: RoomId,
        url: String,
    },
    #[serde(rename = "webinar:configChanged")]
    WebinarConfigChanged {
        room_id: RoomId,
        config: WebinarConfigSnapshot,
    },
    #[serde(rename = "webinar:attendeeCountChanged")]
    WebinarAttendeeCountChanged {
        room_id: RoomId,
        count: usize,
    },
    #[serde(rename = "webinar:feedChanged")]
    WebinarFeedChanged {
        room_id: RoomId,
    },
    AppsStateChanged {
        room_id: RoomId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        active_app_id: Option<String>,
        locked: bool,
    },
}

impl ServerEvent {
    /// Event name on the wire; used for fan-out counters.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserJoined { .. } => "userJoined",
            Self::UserLeft { .. } => "userLeft",
            Self::DisplayNameSnapshot { .. } => "displayNameSnapshot",
            Self::DisplayNameUpdated { .. } => "displayNameUpdated",
            Self::PendingUsersSnapshot { .. } => "pendingUsersSnapshot",
            Self::UserRequestedJoin { .. } => "userRequestedJoin",
            Self::UserAdmitted { .. } => "userAdmitted",
            Self::UserRejected { .. } => "userRejected",
            Self::PendingUserLeft { .. } => "pendingUserLeft",
            Self::JoinApproved { .. } => "joinApproved",
            Self::JoinRejected { .. } => "joinRejected",
            Self::WaitingRoomStatus { .. } => "waitingRoomStatus",
            Self::HostAssigned { .. } => "hostAssigned",
            Self::HostChanged { .. } => "hostChanged",
            Self::RoomLockChanged { .. } => "roomLockChanged",
            Self::NoGuestsChanged { .. } => "noGuestsChanged",
            Self::ChatLockChanged { .. } => "chatLockChanged",
            Self::TtsDisabledChanged { .. } => "ttsDisabledChanged",
            Self::ParticipantMuted { .. } => "participantMuted",
            Self::ParticipantCameraOff { .. } => "participantCameraOff",
            Self::HandRaised { .. } => "handRaised",
            Self::HandRaisedSnapshot { .. } => "handRaisedSnapshot",
            Self::NewProducer { .. } => "newProducer",
            Self::ProducerClosed { .. } => "producerClosed",
            Self::Reaction { .. } => "reaction",
            Self::ChatMessage { .. } => "chatMessage",
            Self::TtsMessage { .. } => "ttsMessage",
            Self::SetVideoQuality { .. } => "setVideoQuality",
            Self::Kicked { .. } => "kicked",
            Self::RoomClosed { .. } => "roomClosed",
            Self::Redirect { .. } => "redirect",
            Self::WebinarConfigChanged { .. } => "webinar:configChanged",
            Self::WebinarAttendeeCountChanged { .. } => "webinar:attendeeCountChanged",
            Self::WebinarFeedChanged { .. } => "webinar:feedChanged",
            Self::AppsStateChanged { .. } => "appsStateChanged",
        }
    }

    /// Room the event is scoped to; receivers drop events for rooms they
    /// are no longer in.
    pub fn room_id(&self) -> &RoomId {
        match self {
            Self::UserJoined { room_id, .. }
            | Self::UserLeft { room_id, .. }
            | Self::DisplayNameSnapshot { room_id, .. }
            | Self::DisplayNameUpdated { room_id, .. }
            | Self::PendingUsersSnapshot { room_id, .. }
            | Self::UserRequestedJoin { room_id, .. }
            | Self::UserAdmitted { room_id, .. }
            | Self::UserRejected { room_id, .. }
            | Self::PendingUserLeft { room_id, .. }
            | Self::JoinApproved { room_id, .. }
            | Self::JoinRejected { room_id, .. }
            | Self::WaitingRoomStatus { room_id, .. }
            | Self::HostAssigned { room_id, .. }
            | Self::HostChanged { room_id, .. }
            | Self::RoomLockChanged { room_id, .. }
            | Self::NoGuestsChanged { room_id, .. }
            | Self::ChatLockChanged { room_id, .. }
            | Self::TtsDisabledChanged { room_id, .. }
            | Self::ParticipantMuted { room_id, .. }
            | Self::ParticipantCameraOff { room_id, .. }
            | Self::HandRaised { room_id, .. }
            | Self::HandRaisedSnapshot { room_id, .. }
            | Self::NewProducer { room_id, .. }
            | Self::ProducerClosed { room_id, .. }
            | Self::Reaction { room_id, .. }
            | Self::ChatMessage { room_id, .. }
            | Self::TtsMessage { room_id, .. }
            | Self::SetVideoQuality { room_id, .. }
            | Self::Kicked { room_id, .. }
            | Self::RoomClosed { room_id, .. }
            | Self::Redirect { room_id, .. }
            | Self::WebinarConfigChanged { room_id, .. }
            | Self::WebinarAttendeeCountChanged { room_id, .. }
            | Self::WebinarFeedChanged { room_id, .. }
            | Self::AppsStateChanged { room_id, .. } => room_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingUserSummary {
    pub user_key: UserKey,
    pub display_name: String,
}

/// One producer as listed to a viewer (`existingProducers`, `getProducers`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerSummary {
    pub producer_id: ProducerId,
    pub user_id: UserId,
    pub kind: MediaKind,
    pub source: ProducerSource,
    pub paused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinStatus {
    Joined,
    Waiting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceServerEntry {
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl From<&IceServerConfig> for IceServerEntry {
    fn from(cfg: &IceServerConfig) -> Self {
        IceServerEntry {
            urls: cfg.urls.clone(),
            username: cfg.username.clone(),
            credential: cfg.credential.clone(),
        }
    }
}

/// Ack payload for `joinRoom`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResult {
    pub room_id: RoomId,
    pub status: JoinStatus,
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_user_id: Option<UserId>,
    pub rtp_capabilities: RtpCapabilities,
    pub existing_producers: Vec<ProducerSummary>,
    pub is_locked: bool,
    pub is_chat_locked: bool,
    pub is_tts_disabled: bool,
    pub video_quality: VideoQuality,
    pub ice_servers: Vec<IceServerEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webinar_role: Option<ClientMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webinar_attendee_count: Option<usize>,
}

/// Ack payload for the transport-creation requests.
pub type TransportResult = TransportParams;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebinarConfigSnapshot {
    pub enabled: bool,
    pub public_access: bool,
    pub locked: bool,
    pub max_attendees: usize,
    pub has_invite_code: bool,
    pub link_version: u64,
    pub feed_mode: String,
    pub attendee_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebinarLinkResult {
    pub url: String,
    pub link_version: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_frame_wire_shape() {
        let json = r#"{"seq":7,"type":"joinRoom","roomId":"ABC","sessionId":"s1","token":"t"}"#;
        let frame: RequestFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.seq, 7);
        match frame.request {
            ClientRequest::JoinRoom {
                room_id, session_id, ..
            } => {
                assert_eq!(room_id.as_ref(), "ABC");
                assert_eq!(session_id, "s1");
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_produce_app_data_uses_type_field() {
        let json = r#"{"seq":1,"type":"produce","transportId":"t1","kind":"video",
                       "rtpParameters":{},"appData":{"type":"screen","paused":false}}"#;
        let frame: RequestFrame = serde_json::from_str(json).unwrap();
        match frame.request {
            ClientRequest::Produce { app_data, kind, .. } => {
                assert_eq!(app_data.source, ProducerSource::Screen);
                assert_eq!(kind, MediaKind::Video);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_webinar_request_names() {
        let json = r#"{"seq":2,"type":"webinar:rotateLink"}"#;
        let frame: RequestFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.request.name(), "webinar:rotateLink");
    }

    #[test]
    fn test_event_envelope_round_trip() {
        let event = ServerEvent::NewProducer {
            room_id: RoomId::from("ABC"),
            producer_id: ProducerId::from("p1"),
            user_id: UserId::from("alice#s1"),
            kind: MediaKind::Audio,
            source: ProducerSource::Webcam,
            paused: false,
        };
        let frame = ServerFrame::Event(event.clone());
        let raw = serde_json::to_string(&frame).unwrap();
        assert!(raw.contains("\"event\""));
        assert!(raw.contains("\"newProducer\""));
        match serde_json::from_str::<ServerFrame>(&raw).unwrap() {
            ServerFrame::Event(decoded) => assert_eq!(decoded, event),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_user_requested_join_carries_user_key_as_user_id() {
        let event = ServerEvent::UserRequestedJoin {
            room_id: RoomId::from("ABC"),
            user_key: UserKey::from("guest-s1"),
            display_name: "G".into(),
        };
        let raw = serde_json::to_string(&event).unwrap();
        assert!(raw.contains("\"userId\":\"guest-s1\""));
    }

    #[test]
    fn test_ack_error_shape() {
        let ack = Ack {
            seq: 3,
            result: None,
            error: Some("not an admin".into()),
            code: Some("PERMISSION_DENIED".into()),
        };
        let raw = serde_json::to_string(&ServerFrame::Ack(ack)).unwrap();
        assert!(raw.contains("\"ack\""));
        assert!(!raw.contains("\"result\""));
        assert!(raw.contains("PERMISSION_DENIED"));
    }

    #[test]
    fn test_every_event_is_room_scoped() {
        let event = ServerEvent::Kicked {
            room_id: RoomId::from("R"),
        };
        assert_eq!(event.room_id().as_ref(), "R");
        assert_eq!(event.name(), "kicked");
    }
}

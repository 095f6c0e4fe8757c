//! The admission decision tree.
//!
//! Evaluated under the room lock so every join is atomic with respect to
//! concurrent joins and leaves: seat counts are checked against committed
//! membership, never against in-flight requests.

use crate::auth::TokenKeys;
use crate::error::SignalingError;
use crate::identity::{JoinMode, Policy, UserIdentity};
use crate::ids::RoomId;
use crate::protocol::ClientMode;

use super::{Role, RoomState};

pub struct JoinContext<'a> {
    pub identity: &'a UserIdentity,
    pub policy: &'a Policy,
    pub join_mode: JoinMode,
    pub host_requested: bool,
    pub ghost_requested: bool,
    pub webinar_token: Option<&'a str>,
    pub meeting_invite_code: Option<&'a str>,
    pub webinar_invite_code: Option<&'a str>,
    pub keys: &'a TokenKeys,
    pub room_id: &'a RoomId,
    pub client_id: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    Locked,
    WaitingRoom,
}

impl WaitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            WaitReason::Locked => "locked",
            WaitReason::WaitingRoom => "waiting_room",
        }
    }
}

pub enum AdmissionDecision {
    Join {
        role: Role,
        mode: ClientMode,
        /// Same principal re-joining inside the disconnect grace window;
        /// suppresses `userJoined` fan-out and the join sound.
        reconnecting: bool,
        /// First admin to arrive becomes the primary host.
        assign_host: bool,
    },
    Wait {
        reason: WaitReason,
    },
    Reject(SignalingError),
}

pub fn decide(state: &RoomState, ctx: &JoinContext) -> AdmissionDecision {
    let key = &ctx.identity.user_key;
    let reconnecting = state.grace_entry_for_key(key).is_some();

    if ctx.join_mode == JoinMode::WebinarAttendee {
        return decide_webinar(state, ctx, reconnecting);
    }

    // Returning primary host: straight back in, cleanup cancelled by caller.
    if state.host_user_key.as_ref() == Some(key) {
        return AdmissionDecision::Join {
            role: Role::Admin,
            mode: requested_mode(ctx, Role::Admin),
            reconnecting,
            assign_host: false,
        };
    }

    if ctx.host_requested && ctx.policy.allow_host_join {
        return AdmissionDecision::Join {
            role: Role::Admin,
            mode: requested_mode(ctx, Role::Admin),
            reconnecting,
            assign_host: state.host_user_key.is_none(),
        };
    }

    // Invite-code gate for non-hosts; reconnecting principals are exempt.
    if let Some(hash) = &state.invite_code_hash {
        if !reconnecting && !state.previously_allowed(key) {
            let presented = ctx
                .meeting_invite_code
                .map(|code| ctx.keys.verify_invite_code(code, hash))
                .unwrap_or(false);
            if !presented {
                return AdmissionDecision::Reject(SignalingError::PermissionDenied(
                    "invite code invalid".to_string(),
                ));
            }
        }
    }

    if state.no_guests && key.is_guest() {
        return AdmissionDecision::Reject(SignalingError::PermissionDenied(
            "guests are not allowed in this room".to_string(),
        ));
    }

    if state.is_locked && !state.previously_allowed(key) {
        return AdmissionDecision::Wait {
            reason: WaitReason::Locked,
        };
    }

    if ctx.policy.use_waiting_room && !state.previously_allowed(key) {
        return AdmissionDecision::Wait {
            reason: WaitReason::WaitingRoom,
        };
    }

    AdmissionDecision::Join {
        role: Role::Participant,
        mode: ClientMode::Participant,
        reconnecting,
        assign_host: false,
    }
}

fn decide_webinar(state: &RoomState, ctx: &JoinContext, reconnecting: bool) -> AdmissionDecision {
    let webinar = &state.webinar;
    if !webinar.enabled {
        return AdmissionDecision::Reject(SignalingError::PermissionDenied(
            "webinar is not enabled for this room".to_string(),
        ));
    }
    if !webinar.public_access {
        let proof_ok = ctx
            .webinar_token
            .map(|token| {
                ctx.keys
                    .verify_webinar_token(token, ctx.room_id, ctx.client_id, webinar.link_version)
            })
            .unwrap_or(false);
        if !proof_ok {
            return AdmissionDecision::Reject(SignalingError::PermissionDenied(
                "webinar link is invalid or expired".to_string(),
            ));
        }
    }
    if let Some(hash) = &webinar.invite_code_hash {
        let presented = ctx
            .webinar_invite_code
            .map(|code| ctx.keys.verify_invite_code(code, hash))
            .unwrap_or(false);
        if !presented {
            return AdmissionDecision::Reject(SignalingError::PermissionDenied(
                "invite code invalid".to_string(),
            ));
        }
    }
    if webinar.locked {
        return AdmissionDecision::Reject(SignalingError::PermissionDenied(
            "webinar is locked".to_string(),
        ));
    }
    // Quota holds across arbitrary concurrent joins because this runs under
    // the room lock against committed membership.
    if state.attendee_count() >= webinar.max_attendees {
        return AdmissionDecision::Reject(SignalingError::PermissionDenied(
            "webinar is full".to_string(),
        ));
    }
    AdmissionDecision::Join {
        role: Role::Participant,
        mode: ClientMode::WebinarAttendee,
        reconnecting,
        assign_host: false,
    }
}

/// Ghost mode is host-only invisibility; for everyone else the request is
/// ignored.
fn requested_mode(ctx: &JoinContext, role: Role) -> ClientMode {
    if ctx.ghost_requested && role == Role::Admin {
        ClientMode::Ghost
    } else {
        ClientMode::Participant
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{SocketId, UserId, UserKey};
    use crate::room::{Client, PendingClient};
    use crate::types::outbox_channel;
    use std::collections::HashMap;

    fn keys() -> TokenKeys {
        TokenKeys::new(b"test-secret")
    }

    fn identity(key: &str, guest: bool) -> UserIdentity {
        let user_key = if guest {
            UserKey::guest(key)
        } else {
            UserKey::from(key)
        };
        UserIdentity {
            user_id: UserId::compose(&user_key, "s1"),
            user_key,
            display_name: key.to_string(),
            guest,
        }
    }

    struct Ctx {
        identity: UserIdentity,
        policy: Policy,
        keys: TokenKeys,
        room_id: RoomId,
        join_mode: JoinMode,
        host_requested: bool,
        ghost_requested: bool,
        webinar_token: Option<String>,
        meeting_invite_code: Option<String>,
        webinar_invite_code: Option<String>,
    }

    impl Ctx {
        fn new(key: &str, guest: bool) -> Self {
            Ctx {
                identity: identity(key, guest),
                policy: Policy::default(),
                keys: keys(),
                room_id: RoomId::from("R"),
                join_mode: JoinMode::Meeting,
                host_requested: false,
                ghost_requested: false,
                webinar_token: None,
                meeting_invite_code: None,
                webinar_invite_code: None,
            }
        }

        fn decide(&self, state: &RoomState) -> AdmissionDecision {
            decide(
                state,
                &JoinContext {
                    identity: &self.identity,
                    policy: &self.policy,
                    join_mode: self.join_mode,
                    host_requested: self.host_requested,
                    ghost_requested: self.ghost_requested,
                    webinar_token: self.webinar_token.as_deref(),
                    meeting_invite_code: self.meeting_invite_code.as_deref(),
                    webinar_invite_code: self.webinar_invite_code.as_deref(),
                    keys: &self.keys,
                    room_id: &self.room_id,
                    client_id: "acme",
                },
            )
        }
    }

    fn join_role(decision: AdmissionDecision) -> Role {
        match decision {
            AdmissionDecision::Join { role, .. } => role,
            _ => panic!("expected join"),
        }
    }

    #[test]
    fn test_host_request_with_policy_joins_and_assigns() {
        let state = RoomState::for_tests("R");
        let mut ctx = Ctx::new("host", false);
        ctx.host_requested = true;
        match ctx.decide(&state) {
            AdmissionDecision::Join {
                role, assign_host, ..
            } => {
                assert_eq!(role, Role::Admin);
                assert!(assign_host);
            }
            _ => panic!("expected join"),
        }
    }

    #[test]
    fn test_host_request_denied_by_policy_falls_through() {
        let state = RoomState::for_tests("R");
        let mut ctx = Ctx::new("host", false);
        ctx.host_requested = true;
        ctx.policy.allow_host_join = false;
        assert_eq!(join_role(ctx.decide(&state)), Role::Participant);
    }

    #[test]
    fn test_returning_primary_host_bypasses_lock() {
        let mut state = RoomState::for_tests("R");
        state.host_user_key = Some(UserKey::from("host"));
        state.is_locked = true;
        let ctx = Ctx::new("host", false);
        assert_eq!(join_role(ctx.decide(&state)), Role::Admin);
    }

    #[test]
    fn test_locked_room_parks_unknown_principals() {
        let mut state = RoomState::for_tests("R");
        state.is_locked = true;
        let ctx = Ctx::new("p1", false);
        match ctx.decide(&state) {
            AdmissionDecision::Wait { reason } => assert_eq!(reason, WaitReason::Locked),
            _ => panic!("expected wait"),
        }

        // previously admitted under lock walks straight in
        state.locked_allow_list.insert(UserKey::from("p1"));
        assert_eq!(join_role(ctx.decide(&state)), Role::Participant);
    }

    #[test]
    fn test_no_guests_rejects_guest_keys_only() {
        let mut state = RoomState::for_tests("R");
        state.no_guests = true;
        let guest = Ctx::new("tab1", true);
        assert!(matches!(
            guest.decide(&state),
            AdmissionDecision::Reject(SignalingError::PermissionDenied(_))
        ));
        let member = Ctx::new("alice", false);
        assert!(matches!(member.decide(&state), AdmissionDecision::Join { .. }));
    }

    #[test]
    fn test_waiting_room_policy_defers_first_visit() {
        let state = RoomState::for_tests("R");
        let mut ctx = Ctx::new("p1", false);
        ctx.policy.use_waiting_room = true;
        match ctx.decide(&state) {
            AdmissionDecision::Wait { reason } => assert_eq!(reason, WaitReason::WaitingRoom),
            _ => panic!("expected wait"),
        }
    }

    #[test]
    fn test_invite_code_gate() {
        let mut state = RoomState::for_tests("R");
        let keys = keys();
        state.invite_code_hash = Some(keys.hash_invite_code("sesame"));

        let mut ctx = Ctx::new("p1", false);
        assert!(matches!(ctx.decide(&state), AdmissionDecision::Reject(_)));

        ctx.meeting_invite_code = Some("wrong".to_string());
        assert!(matches!(ctx.decide(&state), AdmissionDecision::Reject(_)));

        ctx.meeting_invite_code = Some("sesame".to_string());
        assert!(matches!(ctx.decide(&state), AdmissionDecision::Join { .. }));

        // hosts never need the code
        let mut host = Ctx::new("h", false);
        host.host_requested = true;
        assert!(matches!(host.decide(&state), AdmissionDecision::Join { .. }));
    }

    #[test]
    fn test_ghost_mode_is_host_only() {
        let state = RoomState::for_tests("R");
        let mut ctx = Ctx::new("h", false);
        ctx.host_requested = true;
        ctx.ghost_requested = true;
        match ctx.decide(&state) {
            AdmissionDecision::Join { mode, .. } => assert_eq!(mode, ClientMode::Ghost),
            _ => panic!("expected join"),
        }

        let mut plain = Ctx::new("p", false);
        plain.ghost_requested = true;
        match plain.decide(&state) {
            AdmissionDecision::Join { mode, .. } => assert_eq!(mode, ClientMode::Participant),
            _ => panic!("expected join"),
        }
    }

    #[test]
    fn test_webinar_requires_enabled_and_quota() {
        let mut state = RoomState::for_tests("R");
        let mut ctx = Ctx::new("w", false);
        ctx.join_mode = JoinMode::WebinarAttendee;
        assert!(matches!(ctx.decide(&state), AdmissionDecision::Reject(_)));

        state.webinar.enabled = true;
        state.webinar.public_access = true;
        state.webinar.max_attendees = 1;
        assert!(matches!(ctx.decide(&state), AdmissionDecision::Join { .. }));

        // fill the only seat
        let (tx, rx) = outbox_channel();
        std::mem::forget(rx);
        let seated_key = UserKey::from("seated");
        state.insert_client(Client {
            user_id: UserId::compose(&seated_key, "s1"),
            user_key: seated_key,
            socket_id: SocketId::from("sock-seated"),
            display_name: "seated".into(),
            role: Role::Participant,
            mode: ClientMode::WebinarAttendee,
            outbox: tx,
            send_transport: None,
            recv_transport: None,
            consumers: HashMap::new(),
        });
        assert!(matches!(ctx.decide(&state), AdmissionDecision::Reject(_)));
    }

    #[test]
    fn test_webinar_link_proof_checks_version() {
        let mut state = RoomState::for_tests("R");
        state.webinar.enabled = true;
        state.webinar.link_version = 2;

        let mut ctx = Ctx::new("w", false);
        ctx.join_mode = JoinMode::WebinarAttendee;
        assert!(matches!(ctx.decide(&state), AdmissionDecision::Reject(_)));

        ctx.webinar_token = Some(ctx.keys.mint_webinar_token(&ctx.room_id, "acme", 2));
        assert!(matches!(ctx.decide(&state), AdmissionDecision::Join { .. }));

        // rotated link invalidates the old token
        state.webinar.link_version = 3;
        assert!(matches!(ctx.decide(&state), AdmissionDecision::Reject(_)));
    }

    #[test]
    fn test_webinar_locked_rejects() {
        let mut state = RoomState::for_tests("R");
        state.webinar.enabled = true;
        state.webinar.public_access = true;
        state.webinar.locked = true;
        let mut ctx = Ctx::new("w", false);
        ctx.join_mode = JoinMode::WebinarAttendee;
        assert!(matches!(ctx.decide(&state), AdmissionDecision::Reject(_)));
    }

    #[tokio::test]
    async fn test_grace_entry_marks_reconnection() {
        let mut state = RoomState::for_tests("R");
        state.is_locked = true;
        let key = UserKey::from("p1");
        let user_id = UserId::compose(&key, "s1");
        let timer = tokio::spawn(async {});
        state.insert_grace(
            user_id,
            crate::room::GraceEntry {
                socket_id: SocketId::from("old-sock"),
                timer,
            },
        );

        let ctx = Ctx::new("p1", false);
        match ctx.decide(&state) {
            AdmissionDecision::Join { reconnecting, .. } => assert!(reconnecting),
            _ => panic!("expected join"),
        }
    }

    #[test]
    fn test_pending_and_clients_disjoint_by_key() {
        // admission never produces a Join for a key it just parked
        let mut state = RoomState::for_tests("R");
        state.is_locked = true;
        let ctx = Ctx::new("p1", false);
        if let AdmissionDecision::Wait { .. } = ctx.decide(&state) {
            let (tx, rx) = outbox_channel();
            std::mem::forget(rx);
            state.insert_pending(PendingClient {
                user_key: ctx.identity.user_key.clone(),
                display_name: ctx.identity.display_name.clone(),
                socket_id: SocketId::from("sock-p1"),
                outbox: tx,
            });
        }
        assert!(state.pending(&ctx.identity.user_key).is_some());
        assert!(state.client_by_key(&ctx.identity.user_key).is_none());
    }
}

//! The room aggregate: membership, waiting room, host lifecycle, producer
//! table, disconnect grace, and fan-out.
//!
//! All mutation happens under the per-room mutex so admission + join +
//! fan-out stays atomic with respect to concurrent joins and leaves on the
//! same room. Fan-out order is invariants first, room events second, ack to
//! the requester last.

pub mod admission;
pub mod registry;
pub mod webinar;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::ids::{ChannelId, ProducerId, RoomId, SocketId, TransportId, UserId, UserKey};
use crate::metrics::{
    SIGNAL_ACTIVE_CLIENTS, SIGNAL_ACTIVE_PRODUCERS, SIGNAL_EVENTS_DROPPED_TOTAL,
    SIGNAL_EVENTS_TOTAL, SIGNAL_WAITING_CLIENTS, SIGNAL_WEBINAR_ATTENDEES,
};
use crate::protocol::{
    ClientMode, PendingUserSummary, ProducerSummary, ServerEvent, ServerFrame, VideoQuality,
};
use crate::sfu::{MediaKind, ProducerSource, SfuRouter};
use crate::types::EventSender;

use self::registry::Registry;
use self::webinar::WebinarConfig;

/// Capability class of a joined session. Promotion is a role change plus a
/// rebind of the admin-only handler set, not an object swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Participant,
    Admin,
}

/// One joined session.
pub struct Client {
    pub user_id: UserId,
    pub user_key: UserKey,
    pub socket_id: SocketId,
    pub display_name: String,
    pub role: Role,
    pub mode: ClientMode,
    pub outbox: EventSender,
    pub send_transport: Option<TransportId>,
    pub recv_transport: Option<TransportId>,
    /// producer -> consumer parameters, for idempotent consume
    /// short-circuiting.
    pub consumers: HashMap<ProducerId, crate::sfu::ConsumerParams>,
}

impl Client {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_attendee(&self) -> bool {
        self.mode == ClientMode::WebinarAttendee
    }
}

/// A principal parked in the waiting room. Keyed by stable `UserKey` so a
/// second tab of the same principal replaces, never duplicates.
pub struct PendingClient {
    pub user_key: UserKey,
    pub display_name: String,
    pub socket_id: SocketId,
    pub outbox: EventSender,
}

#[derive(Debug, Clone)]
pub struct ProducerRecord {
    pub owner_user_id: UserId,
    pub kind: MediaKind,
    pub source: ProducerSource,
    pub paused: bool,
    /// Monotonic per-room creation/unpause order; drives the active-speaker
    /// pick in the webinar feed selector.
    pub seq: u64,
}

pub struct GraceEntry {
    pub socket_id: SocketId,
    pub timer: JoinHandle<()>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppsState {
    pub active_app_id: Option<String>,
    pub locked: bool,
}

/// Why a client record is being removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveKind {
    Left,
    Kicked,
    Disconnected,
}

pub struct RoomState {
    pub room_id: RoomId,
    clients: HashMap<UserId, Client>,
    join_order: Vec<UserId>,
    pending: HashMap<UserKey, PendingClient>,
    pub host_user_key: Option<UserKey>,
    pub is_locked: bool,
    pub no_guests: bool,
    pub is_chat_locked: bool,
    pub is_tts_disabled: bool,
    pub invite_code_hash: Option<String>,
    pub locked_allow_list: HashSet<UserKey>,
    pub webinar: WebinarConfig,
    producers: HashMap<ProducerId, ProducerRecord>,
    producer_seq: u64,
    pub hand_raised: HashSet<UserId>,
    pub display_names: HashMap<UserKey, String>,
    disconnect_grace: HashMap<UserId, GraceEntry>,
    cleanup_timer: Option<JoinHandle<()>>,
    pub current_quality: VideoQuality,
    pub apps: AppsState,
    pub active_speaker: Option<UserId>,
}

pub struct RemovedClient {
    pub client: Client,
    pub closed_producers: Vec<(ProducerId, ProducerRecord)>,
}

impl RoomState {
    fn new(room_id: RoomId, webinar_max_attendees: usize) -> Self {
        RoomState {
            room_id,
            clients: HashMap::new(),
            join_order: Vec::new(),
            pending: HashMap::new(),
            host_user_key: None,
            is_locked: false,
            no_guests: false,
            is_chat_locked: false,
            is_tts_disabled: false,
            invite_code_hash: None,
            locked_allow_list: HashSet::new(),
            webinar: WebinarConfig::new(webinar_max_attendees),
            producers: HashMap::new(),
            producer_seq: 0,
            hand_raised: HashSet::new(),
            display_names: HashMap::new(),
            disconnect_grace: HashMap::new(),
            cleanup_timer: None,
            current_quality: VideoQuality::Standard,
            apps: AppsState::default(),
            active_speaker: None,
        }
    }

    // ----- membership ------------------------------------------------------

    pub fn client(&self, user_id: &UserId) -> Option<&Client> {
        self.clients.get(user_id)
    }

    pub fn client_mut(&mut self, user_id: &UserId) -> Option<&mut Client> {
        self.clients.get_mut(user_id)
    }

    pub fn client_by_key(&self, key: &UserKey) -> Option<&Client> {
        self.clients.values().find(|c| &c.user_key == key)
    }

    pub fn clients(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty() && self.pending.is_empty()
    }

    pub fn insert_client(&mut self, client: Client) {
        if client.is_attendee() {
            SIGNAL_WEBINAR_ATTENDEES.inc();
        }
        SIGNAL_ACTIVE_CLIENTS.inc();
        self.display_names
            .insert(client.user_key.clone(), client.display_name.clone());
        self.join_order.push(client.user_id.clone());
        self.clients.insert(client.user_id.clone(), client);
    }

    /// Removes a client and everything keyed on it. Producer entries go
    /// synchronously with their owner; the caller fans out `producerClosed`
    /// and closes them on the router.
    pub fn remove_client(&mut self, user_id: &UserId) -> Option<RemovedClient> {
        let client = self.clients.remove(user_id)?;
        self.join_order.retain(|id| id != user_id);
        self.hand_raised.remove(user_id);
        if let Some(entry) = self.disconnect_grace.remove(user_id) {
            entry.timer.abort();
        }
        let closed: Vec<(ProducerId, ProducerRecord)> = {
            let ids: Vec<ProducerId> = self
                .producers
                .iter()
                .filter(|(_, rec)| &rec.owner_user_id == user_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| self.producers.remove(&id).map(|rec| (id, rec)))
                .collect()
        };
        SIGNAL_ACTIVE_CLIENTS.dec();
        SIGNAL_ACTIVE_PRODUCERS.sub(closed.len() as i64);
        if client.is_attendee() {
            SIGNAL_WEBINAR_ATTENDEES.dec();
        }
        if self.active_speaker.as_ref() == Some(user_id) {
            self.active_speaker = None;
        }
        Some(RemovedClient {
            client,
            closed_producers: closed,
        })
    }

    pub fn has_admin(&self) -> bool {
        self.clients.values().any(|c| c.is_admin())
    }

    /// Count toward the quality cliff: every joined session that is not a
    /// watch-only attendee.
    pub fn participant_count(&self) -> usize {
        self.clients.values().filter(|c| !c.is_attendee()).count()
    }

    pub fn attendee_count(&self) -> usize {
        self.clients.values().filter(|c| c.is_attendee()).count()
    }

    /// Next non-ghost, non-attendee client in insertion order.
    pub fn promotion_candidate(&self) -> Option<UserId> {
        self.join_order
            .iter()
            .find(|id| {
                self.clients
                    .get(id)
                    .map(|c| c.mode == ClientMode::Participant)
                    .unwrap_or(false)
            })
            .cloned()
    }

    // ----- waiting room ----------------------------------------------------

    pub fn pending(&self, key: &UserKey) -> Option<&PendingClient> {
        self.pending.get(key)
    }

    pub fn pending_is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn insert_pending(&mut self, pending: PendingClient) {
        // same principal in a second tab replaces, not duplicates
        if self.pending.insert(pending.user_key.clone(), pending).is_none() {
            SIGNAL_WAITING_CLIENTS.inc();
        }
    }

    pub fn remove_pending(&mut self, key: &UserKey) -> Option<PendingClient> {
        let removed = self.pending.remove(key);
        if removed.is_some() {
            SIGNAL_WAITING_CLIENTS.dec();
        }
        removed
    }

    pub fn pending_snapshot(&self) -> Vec<PendingUserSummary> {
        self.pending
            .values()
            .map(|p| PendingUserSummary {
                user_key: p.user_key.clone(),
                display_name: p.display_name.clone(),
            })
            .collect()
    }

    /// Principals that may bypass the lock / waiting room: previously
    /// admitted, already present in another tab, or inside disconnect grace.
    pub fn previously_allowed(&self, key: &UserKey) -> bool {
        self.locked_allow_list.contains(key)
            || self.client_by_key(key).is_some()
            || self.grace_entry_for_key(key).is_some()
    }

    // ----- disconnect grace ------------------------------------------------

    pub fn grace_entry_for_key(&self, key: &UserKey) -> Option<UserId> {
        self.disconnect_grace
            .keys()
            .find(|uid| &uid.user_key() == key)
            .cloned()
    }

    pub fn insert_grace(&mut self, user_id: UserId, entry: GraceEntry) {
        if let Some(prev) = self.disconnect_grace.insert(user_id, entry) {
            prev.timer.abort();
        }
    }

    pub fn take_grace(&mut self, user_id: &UserId) -> Option<GraceEntry> {
        self.disconnect_grace.remove(user_id)
    }

    /// Cancels the pending departure for a reconnecting principal and
    /// returns the session id it was keyed on.
    pub fn clear_pending_disconnect(&mut self, key: &UserKey) -> Option<UserId> {
        let user_id = self.grace_entry_for_key(key)?;
        if let Some(entry) = self.disconnect_grace.remove(&user_id) {
            entry.timer.abort();
        }
        Some(user_id)
    }

    // ----- producers -------------------------------------------------------

    pub fn producer(&self, id: &ProducerId) -> Option<&ProducerRecord> {
        self.producers.get(id)
    }

    pub fn producers(&self) -> impl Iterator<Item = (&ProducerId, &ProducerRecord)> {
        self.producers.iter()
    }

    pub fn insert_producer(
        &mut self,
        id: ProducerId,
        owner_user_id: UserId,
        kind: MediaKind,
        source: ProducerSource,
        paused: bool,
    ) -> ProducerRecord {
        self.producer_seq += 1;
        let record = ProducerRecord {
            owner_user_id,
            kind,
            source,
            paused,
            seq: self.producer_seq,
        };
        SIGNAL_ACTIVE_PRODUCERS.inc();
        self.producers.insert(id, record.clone());
        record
    }

    pub fn remove_producer(&mut self, id: &ProducerId) -> Option<ProducerRecord> {
        let removed = self.producers.remove(id);
        if removed.is_some() {
            SIGNAL_ACTIVE_PRODUCERS.dec();
        }
        removed
    }

    /// Drops every viewer's consumer entry for a retired producer so a
    /// later re-publish is consumed fresh instead of short-circuiting.
    pub fn purge_consumer_entries(&mut self, producer_id: &ProducerId) {
        for client in self.clients.values_mut() {
            client.consumers.remove(producer_id);
        }
    }

    pub fn set_producer_paused(&mut self, id: &ProducerId, paused: bool) -> Option<ProducerRecord> {
        self.producer_seq += 1;
        let seq = self.producer_seq;
        let rec = self.producers.get_mut(id)?;
        rec.paused = paused;
        if !paused {
            rec.seq = seq;
        }
        Some(rec.clone())
    }

    /// Producer listing as seen by one viewer: never the viewer's own, never
    /// ghost producers for non-ghost viewers, and for attendees only the
    /// selector's feed.
    pub fn producers_snapshot_for(&self, viewer: &UserId) -> Vec<ProducerSummary> {
        let viewer_client = self.clients.get(viewer);
        let viewer_is_ghost = viewer_client.map(|c| c.mode == ClientMode::Ghost).unwrap_or(false);
        let viewer_is_attendee = viewer_client.map(Client::is_attendee).unwrap_or(false);
        let feed = if viewer_is_attendee {
            Some(webinar::visible_producers(self))
        } else {
            None
        };
        self.producers
            .iter()
            .filter(|(id, rec)| {
                if &rec.owner_user_id == viewer {
                    return false;
                }
                let owner_is_ghost = self
                    .clients
                    .get(&rec.owner_user_id)
                    .map(|c| c.mode == ClientMode::Ghost)
                    .unwrap_or(false);
                if owner_is_ghost && !viewer_is_ghost {
                    return false;
                }
                match &feed {
                    Some(visible) => visible.contains(*id),
                    None => true,
                }
            })
            .map(|(id, rec)| ProducerSummary {
                producer_id: id.clone(),
                user_id: rec.owner_user_id.clone(),
                kind: rec.kind,
                source: rec.source,
                paused: rec.paused,
            })
            .collect()
    }

    // ----- fan-out ---------------------------------------------------------

    pub(crate) fn deliver(outbox: &EventSender, event: &ServerEvent) {
        match outbox.try_send(ServerFrame::Event(event.clone())) {
            Ok(()) => {
                SIGNAL_EVENTS_TOTAL.with_label_values(&[event.name()]).inc();
            }
            Err(_) => {
                SIGNAL_EVENTS_DROPPED_TOTAL.inc();
            }
        }
    }

    pub fn broadcast(&self, event: &ServerEvent) {
        for client in self.clients.values() {
            Self::deliver(&client.outbox, event);
        }
    }

    pub fn broadcast_except(&self, except: &UserId, event: &ServerEvent) {
        for client in self.clients.values() {
            if &client.user_id != except {
                Self::deliver(&client.outbox, event);
            }
        }
    }

    pub fn broadcast_filtered<F: Fn(&Client) -> bool>(&self, keep: F, event: &ServerEvent) {
        for client in self.clients.values() {
            if keep(client) {
                Self::deliver(&client.outbox, event);
            }
        }
    }

    pub fn broadcast_admins(&self, event: &ServerEvent) {
        self.broadcast_filtered(Client::is_admin, event);
    }

    pub fn send_to_user(&self, user_id: &UserId, event: &ServerEvent) {
        if let Some(client) = self.clients.get(user_id) {
            Self::deliver(&client.outbox, event);
        }
    }

    pub fn send_to_pending(&self, key: &UserKey, event: &ServerEvent) {
        if let Some(pending) = self.pending.get(key) {
            Self::deliver(&pending.outbox, event);
        }
    }

    // ----- derived state ---------------------------------------------------

    /// Re-derives the room video quality after a membership change. Crossing
    /// the cliff emits exactly one `setVideoQuality` per direction.
    pub fn apply_quality(&mut self, cliff: usize) {
        let target = if self.participant_count() >= cliff {
            VideoQuality::Low
        } else {
            VideoQuality::Standard
        };
        if target != self.current_quality {
            self.current_quality = target;
            self.broadcast(&ServerEvent::SetVideoQuality {
                room_id: self.room_id.clone(),
                quality: target,
            });
        }
    }

    pub fn display_name_snapshot(&self) -> HashMap<String, String> {
        self.display_names
            .iter()
            .map(|(k, v)| (k.as_ref().to_string(), v.clone()))
            .collect()
    }

    pub fn host_user_id(&self) -> Option<UserId> {
        let key = self.host_user_key.as_ref()?;
        self.client_by_key(key).map(|c| c.user_id.clone())
    }

    pub fn cancel_cleanup_timer(&mut self) {
        if let Some(timer) = self.cleanup_timer.take() {
            timer.abort();
        }
    }

    /// Promotes the next candidate after the last admin left. The new host
    /// gets the admin snapshots (`hostAssigned`, pending users, lock state);
    /// everyone learns via `hostChanged`.
    pub fn promote_next_host(&mut self) -> Option<UserId> {
        let candidate = self.promotion_candidate()?;
        let key = candidate.user_key();
        self.host_user_key = Some(key);
        if let Some(client) = self.clients.get_mut(&candidate) {
            client.role = Role::Admin;
        }
        let room_id = self.room_id.clone();
        self.send_to_user(
            &candidate,
            &ServerEvent::HostAssigned {
                room_id: room_id.clone(),
                host_user_id: candidate.clone(),
            },
        );
        self.send_to_user(
            &candidate,
            &ServerEvent::PendingUsersSnapshot {
                room_id: room_id.clone(),
                pending: self.pending_snapshot(),
            },
        );
        self.send_to_user(
            &candidate,
            &ServerEvent::RoomLockChanged {
                room_id: room_id.clone(),
                locked: self.is_locked,
            },
        );
        self.broadcast(&ServerEvent::HostChanged {
            room_id,
            host_user_id: candidate.clone(),
        });
        info!(user_id = %candidate, "Promoted next host");
        Some(candidate)
    }

    #[cfg(test)]
    pub fn for_tests(room_id: &str) -> Self {
        RoomState::new(RoomId::from(room_id), 100)
    }
}

/// The aggregate entity. All state sits behind one async mutex; SFU calls
/// made while holding it keep admission and fan-out serialized per room.
pub struct Room {
    pub channel_id: ChannelId,
    pub room_id: RoomId,
    pub client_id: String,
    pub router: Arc<dyn SfuRouter>,
    pub state: Mutex<RoomState>,
    weak_self: Weak<Room>,
}

impl Room {
    pub fn new(
        channel_id: ChannelId,
        room_id: RoomId,
        client_id: String,
        router: Arc<dyn SfuRouter>,
        webinar_max_attendees: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Room {
            channel_id,
            room_id: room_id.clone(),
            client_id,
            state: Mutex::new(RoomState::new(room_id, webinar_max_attendees)),
            router,
            weak_self: weak.clone(),
        })
    }

    fn strong(&self) -> Arc<Room> {
        self.weak_self.upgrade().expect("room still referenced")
    }

    /// Schedules finalization of a disconnected session. A re-join with the
    /// same `UserKey` before the timer fires cancels it.
    pub async fn schedule_disconnect(
        &self,
        registry: &Arc<Registry>,
        user_id: UserId,
        socket_id: SocketId,
    ) {
        let grace_ms = registry.config().disconnect_grace_ms;
        let mut state = self.state.lock().await;
        if !state.clients.contains_key(&user_id) {
            return;
        }
        debug!(user_id = %user_id, grace_ms, "Scheduling disconnect finalization");
        let room = self.strong();
        let registry = Arc::clone(registry);
        let timer_user = user_id.clone();
        let timer_socket = socket_id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(grace_ms)).await;
            room.remove_and_finalize(
                &registry,
                &timer_user,
                LeaveKind::Disconnected,
                Some(&timer_socket),
            )
            .await;
        });
        state.insert_grace(user_id, GraceEntry { socket_id, timer });
    }

    /// Removes a session and runs the host/quality/cleanup lifecycle.
    ///
    /// `expected_socket` carries the stale-socket check for grace
    /// finalization: if the room's current socket for the session is no
    /// longer the one that disconnected, a reconnect won the race and this
    /// is a no-op.
    pub async fn remove_and_finalize(
        &self,
        registry: &Arc<Registry>,
        user_id: &UserId,
        kind: LeaveKind,
        expected_socket: Option<&SocketId>,
    ) {
        let mut state = self.state.lock().await;
        if let Some(expected) = expected_socket {
            state.take_grace(user_id);
            match state.client(user_id) {
                Some(client) if &client.socket_id == expected => {}
                _ => return,
            }
        }
        if kind == LeaveKind::Kicked {
            state.send_to_user(
                user_id,
                &ServerEvent::Kicked {
                    room_id: self.room_id.clone(),
                },
            );
        }
        let Some(removed) = state.remove_client(user_id) else {
            return;
        };
        info!(user_id = %user_id, ?kind, "Client removed from room");
        self.finalize_removed(registry, &mut state, removed).await;
        let empty = state.is_empty();
        drop(state);
        if empty {
            registry.cleanup(&self.channel_id).await;
        }
    }

    /// Closes the removed session's media on the router and fans out
    /// `producerClosed`. Shared by finalization and silent reconnect
    /// replacement; must run under the room lock the caller holds.
    pub(crate) async fn close_media_for_removed(&self, state: &mut RoomState, removed: &RemovedClient) {
        for (producer_id, record) in &removed.closed_producers {
            if let Err(e) = self.router.close_producer(producer_id).await {
                warn!(producer_id = %producer_id, error = %e, "Router close failed during removal");
            }
            crate::routing::fan_out_producer_closed(state, producer_id, record);
        }
        for transport in [&removed.client.send_transport, &removed.client.recv_transport]
            .into_iter()
            .flatten()
        {
            self.router.close_transport(transport).await;
        }
    }

    async fn finalize_removed(
        &self,
        registry: &Arc<Registry>,
        state: &mut RoomState,
        removed: RemovedClient,
    ) {
        self.close_media_for_removed(state, &removed).await;
        let client = removed.client;

        // attendees were never announced via userJoined, so they leave
        // silently too; admins track them through the count event below
        if !client.is_attendee() {
            let event = ServerEvent::UserLeft {
                room_id: self.room_id.clone(),
                user_id: client.user_id.clone(),
            };
            if client.mode == ClientMode::Ghost {
                // ghosts were only ever announced to ghosts and admins
                state.broadcast_filtered(
                    |c| c.mode == ClientMode::Ghost || c.is_admin(),
                    &event,
                );
            } else {
                state.broadcast(&event);
            }
        }

        if client.is_attendee() {
            state.broadcast_admins(&ServerEvent::WebinarAttendeeCountChanged {
                room_id: self.room_id.clone(),
                count: state.attendee_count(),
            });
        }

        if webinar::refresh_active_speaker(state) {
            webinar::fan_out_feed_changed(state);
        }

        // Host lifecycle: the moment the last admin session leaves,
        // promotion or the cleanup timer runs before anything else observes
        // the room.
        if client.is_admin() && !state.has_admin() {
            if state.promote_next_host().is_none() {
                self.start_cleanup_timer(registry, state);
            }
        }

        state.apply_quality(registry.config().quality_cliff);
    }

    /// Arms the hostless-room timer. The callback re-checks admin presence
    /// before destroying anything.
    pub fn start_cleanup_timer(&self, registry: &Arc<Registry>, state: &mut RoomState) {
        if state.cleanup_timer.is_some() {
            return;
        }
        let grace_ms = registry.config().empty_room_grace_ms;
        let room = self.strong();
        let registry = Arc::clone(registry);
        info!(channel = %self.channel_id, grace_ms, "Room lost its last admin, arming cleanup");
        state.cleanup_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(grace_ms)).await;
            room.cleanup_if_still_hostless(&registry).await;
        }));
    }

    async fn cleanup_if_still_hostless(&self, registry: &Arc<Registry>) {
        let mut state = self.state.lock().await;
        state.cleanup_timer = None;
        if state.has_admin() {
            return;
        }
        drop(state);
        self.close_room(registry).await;
    }

    /// Tears the room down: every remaining subscriber gets `roomClosed`,
    /// then the registry entry goes away.
    pub async fn close_room(&self, registry: &Arc<Registry>) {
        let mut state = self.state.lock().await;
        state.cancel_cleanup_timer();
        state.broadcast(&ServerEvent::RoomClosed {
            room_id: self.room_id.clone(),
        });
        for pending in state.pending.values() {
            RoomState::deliver(
                &pending.outbox,
                &ServerEvent::RoomClosed {
                    room_id: self.room_id.clone(),
                },
            );
        }
        let user_ids: Vec<UserId> = state.clients.keys().cloned().collect();
        for user_id in user_ids {
            state.remove_client(&user_id);
        }
        let pending_keys: Vec<UserKey> = state.pending.keys().cloned().collect();
        for key in pending_keys {
            state.remove_pending(&key);
        }
        for entry in state.disconnect_grace.drain() {
            entry.1.timer.abort();
        }
        drop(state);
        registry.remove(&self.channel_id);
        info!(channel = %self.channel_id, "Room closed");
    }
}

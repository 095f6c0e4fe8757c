//! Process-wide mapping channel-id -> Room.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::info;

use crate::config::Config;
use crate::ids::{ChannelId, RoomId};
use crate::metrics::SIGNAL_ACTIVE_ROOMS;
use crate::sfu::{EmbeddedRouter, SfuRouter};

use super::Room;

pub struct Registry {
    rooms: DashMap<ChannelId, Arc<Room>>,
    config: Arc<Config>,
    draining: AtomicBool,
    weak_self: Weak<Registry>,
}

impl Registry {
    pub fn new(config: Arc<Config>) -> Arc<Self> {
        Arc::new_cyclic(|weak| Registry {
            rooms: DashMap::new(),
            config,
            draining: AtomicBool::new(false),
            weak_self: weak.clone(),
        })
    }

    fn strong(&self) -> Arc<Registry> {
        self.weak_self.upgrade().expect("registry still referenced")
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Never creates a second instance for the same channel id; concurrent
    /// callers are serialized on the map entry.
    pub fn get_or_create(&self, client_id: &str, room_id: &RoomId) -> Arc<Room> {
        let channel_id = ChannelId::compose(client_id, room_id);
        let entry = self.rooms.entry(channel_id.clone()).or_insert_with(|| {
            SIGNAL_ACTIVE_ROOMS.inc();
            info!(channel = %channel_id, "New room created");
            let router: Arc<dyn SfuRouter> = Arc::new(EmbeddedRouter::new());
            Room::new(
                channel_id.clone(),
                room_id.clone(),
                client_id.to_string(),
                router,
                self.config.webinar_max_attendees,
            )
        });
        Arc::clone(entry.value())
    }

    pub fn get(&self, channel_id: &ChannelId) -> Option<Arc<Room>> {
        self.rooms.get(channel_id).map(|r| Arc::clone(r.value()))
    }

    /// Destroys the room iff it has neither clients nor pending clients.
    /// Returns whether anything was destroyed so callers can chain session
    /// cleanup.
    pub async fn cleanup(&self, channel_id: &ChannelId) -> bool {
        let Some(room) = self.get(channel_id) else {
            return false;
        };
        let mut state = room.state.lock().await;
        if !state.is_empty() {
            return false;
        }
        state.cancel_cleanup_timer();
        drop(state);
        self.remove(channel_id);
        true
    }

    pub fn remove(&self, channel_id: &ChannelId) {
        if self.rooms.remove(channel_id).is_some() {
            SIGNAL_ACTIVE_ROOMS.dec();
            info!(channel = %channel_id, "Room removed");
        }
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Drain mode: existing rooms keep running, new non-host joins are
    /// refused by admission.
    pub fn set_draining(&self, draining: bool) {
        self.draining.store(draining, Ordering::Relaxed);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Relaxed)
    }

    /// Graceful shutdown: every room points its clients back at the lobby,
    /// broadcasts `roomClosed`, and goes away.
    pub async fn shutdown(&self) {
        self.set_draining(true);
        let registry = self.strong();
        let rooms: Vec<Arc<Room>> = self.rooms.iter().map(|e| Arc::clone(e.value())).collect();
        info!("Closing {} active rooms", rooms.len());
        for room in rooms {
            {
                let state = room.state.lock().await;
                state.broadcast(&crate::protocol::ServerEvent::Redirect {
                    room_id: room.room_id.clone(),
                    url: self.config.public_base_url.clone(),
                });
            }
            room.close_room(&registry).await;
        }
    }
}

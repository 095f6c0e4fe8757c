//! In-memory collaborator implementations.
//!
//! Used by the unit/integration tests and by the load simulator; none of
//! this touches real devices or the network.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::auth::TokenKeys;
use crate::client::media::{track_pair, KeepAliveGuard, LocalStream, MediaDevices, TrackControl};
use crate::client::session::{AppLifecycle, AuthFetcher, SocketConnector};
use crate::client::socket::{InProcessSocket, SignalingSocket};
use crate::error::SignalingError;
use crate::handlers::SignalingCore;
use crate::identity::{AuthPayload, AuthUser, JoinMode};
use crate::ids::RoomId;
use crate::sfu::MediaKind;

/// Capture devices whose tracks can be ended from the outside.
pub struct FakeMediaDevices {
    counter: AtomicU64,
    fail_next: AtomicBool,
    acquires: AtomicU64,
    controls: Mutex<Vec<(String, TrackControl)>>,
}

impl FakeMediaDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeMediaDevices {
            counter: AtomicU64::new(1),
            fail_next: AtomicBool::new(false),
            acquires: AtomicU64::new(0),
            controls: Mutex::new(Vec::new()),
        })
    }

    pub fn fail_next_acquire(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn acquire_count(&self) -> u64 {
        self.acquires.load(Ordering::SeqCst)
    }

    /// Ends a previously vended track, as an unplugged device would.
    pub fn end_track(&self, track_id: &str) -> bool {
        let controls = self.controls.lock().unwrap();
        match controls.iter().find(|(id, _)| id == track_id) {
            Some((_, control)) => {
                control.end();
                true
            }
            None => false,
        }
    }

    fn mint(&self, kind: MediaKind, tag: &str) -> crate::client::media::LocalTrack {
        let id = format!("{}-{}", tag, self.counter.fetch_add(1, Ordering::SeqCst));
        let (track, control) = track_pair(id.clone(), kind);
        self.controls.lock().unwrap().push((id, control));
        track
    }
}

#[async_trait]
impl MediaDevices for FakeMediaDevices {
    async fn acquire(&self, audio: bool, video: bool) -> Result<LocalStream, SignalingError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SignalingError::MediaError(
                "device unavailable".to_string(),
            ));
        }
        self.acquires.fetch_add(1, Ordering::SeqCst);
        Ok(LocalStream {
            audio: audio.then(|| self.mint(MediaKind::Audio, "mic")),
            video: video.then(|| self.mint(MediaKind::Video, "cam")),
        })
    }

    fn start_keep_alive(&self) -> KeepAliveGuard {
        KeepAliveGuard::new()
    }
}

/// Token minting against the same keys the in-process server verifies
/// with; stands in for `POST /api/sfu/join`.
pub struct LocalTokenAuth {
    keys: TokenKeys,
    pub user: AuthUser,
    pub client_id: String,
    pub is_host: bool,
    pub join_mode: JoinMode,
    pub webinar_token: Mutex<Option<String>>,
    fail_next: AtomicBool,
}

impl LocalTokenAuth {
    pub fn new(secret: &[u8], user: AuthUser, client_id: &str, is_host: bool) -> Arc<Self> {
        Arc::new(LocalTokenAuth {
            keys: TokenKeys::new(secret),
            user,
            client_id: client_id.to_string(),
            is_host,
            join_mode: JoinMode::Meeting,
            webinar_token: Mutex::new(None),
            fail_next: AtomicBool::new(false),
        })
    }

    pub fn attendee(secret: &[u8], user: AuthUser, client_id: &str) -> Arc<Self> {
        Arc::new(LocalTokenAuth {
            keys: TokenKeys::new(secret),
            user,
            client_id: client_id.to_string(),
            is_host: false,
            join_mode: JoinMode::WebinarAttendee,
            webinar_token: Mutex::new(None),
            fail_next: AtomicBool::new(false),
        })
    }

    pub fn set_webinar_token(&self, token: Option<String>) {
        *self.webinar_token.lock().unwrap() = token;
    }

    pub fn fail_next_fetch(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuthFetcher for LocalTokenAuth {
    async fn fetch_token(
        &self,
        _room_id: &RoomId,
        session_id: &str,
    ) -> Result<String, SignalingError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(SignalingError::ConnectionFailed(
                "auth service unavailable".to_string(),
            ));
        }
        let payload = AuthPayload {
            user: self.user.clone(),
            session_id: session_id.to_string(),
            client_id: self.client_id.clone(),
            is_host: self.is_host,
            join_mode: self.join_mode,
            webinar_token: self.webinar_token.lock().unwrap().clone(),
        };
        Ok(self.keys.mint_auth_token(&payload))
    }
}

/// Connects sessions straight into an in-process server core.
pub struct InProcessConnector {
    core: Arc<SignalingCore>,
}

impl InProcessConnector {
    pub fn new(core: &Arc<SignalingCore>) -> Arc<Self> {
        Arc::new(InProcessConnector {
            core: Arc::clone(core),
        })
    }
}

#[async_trait]
impl SocketConnector for InProcessConnector {
    async fn connect(&self) -> Result<Arc<dyn SignalingSocket>, SignalingError> {
        let socket: Arc<dyn SignalingSocket> = InProcessSocket::connect(&self.core);
        Ok(socket)
    }
}

/// App lifecycle stub with a settable foreground bit.
pub struct FakeLifecycle {
    foreground: AtomicBool,
}

impl FakeLifecycle {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeLifecycle {
            foreground: AtomicBool::new(true),
        })
    }

    pub fn set_foreground(&self, foreground: bool) {
        self.foreground.store(foreground, Ordering::SeqCst);
    }
}

impl AppLifecycle for FakeLifecycle {
    fn is_foreground(&self) -> bool {
        self.foreground.load(Ordering::SeqCst)
    }
}

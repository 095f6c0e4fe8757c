//! The per-client in-call state machine.
//!
//! Lifecycle: `Disconnected -> Connecting -> Connected -> Joining ->
//! {Joined | Waiting | Error} -> Reconnecting -> ...`. Joining runs auth
//! fetch, socket connect, and media acquisition concurrently; media failure
//! degrades to audio-only or media-less participation, auth and socket
//! failures are terminal. Room events not matching the current room id are
//! dropped so a session mid-handoff never processes stragglers from the
//! room it just left.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::coordinator::{ManagedSession, SessionSnapshot};
use crate::client::media::{KeepAliveGuard, MediaDevices, MediaManager, TrackEndedOutcome};
use crate::client::reconnect::{
    recover_transport, ClientTransport, ReconnectConfig, ReconnectEngine, RecoveryOutcome,
    TransportConnState,
};
use crate::client::socket::SignalingSocket;
use crate::client::sounds::{should_play, NoopSoundSink, NotificationSound, SoundSink};
use crate::error::SignalingError;
use crate::ids::{ConsumerId, ProducerId, RoomId, UserId, UserKey};
use crate::protocol::{
    ClientRequest, JoinResult, JoinStatus, ProducerAppData, ServerEvent, ServerFrame,
    TransportRole, VideoQuality,
};
use crate::sfu::{MediaKind, ProducerSource, RtpCapabilities, RtpParameters, TransportParams};
use crate::types::EventReceiver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Joining,
    Joined,
    Waiting,
    Reconnecting,
    Error,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub session_id: String,
    pub reconcile_interval: Duration,
    pub transport_disconnect_grace: Duration,
    pub ice_restart_grace: Duration,
    pub reconnect: ReconnectConfig,
}

impl SessionConfig {
    pub fn new(session_id: impl Into<String>) -> Self {
        SessionConfig {
            session_id: session_id.into(),
            reconcile_interval: Duration::from_secs(15),
            transport_disconnect_grace: Duration::from_secs(2),
            ice_restart_grace: Duration::from_secs(3),
            reconnect: ReconnectConfig::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JoinIntent {
    pub room_id: RoomId,
    pub display_name: Option<String>,
    pub ghost: bool,
    pub want_audio: bool,
    pub want_video: bool,
    pub meeting_invite_code: Option<String>,
    pub webinar_invite_code: Option<String>,
}

impl JoinIntent {
    pub fn new(room_id: impl Into<RoomId>) -> Self {
        JoinIntent {
            room_id: room_id.into(),
            display_name: None,
            ghost: false,
            want_audio: true,
            want_video: true,
            meeting_invite_code: None,
            webinar_invite_code: None,
        }
    }
}

/// Fetches the join token (`POST /api/sfu/join` in production).
#[async_trait]
pub trait AuthFetcher: Send + Sync {
    async fn fetch_token(
        &self,
        room_id: &RoomId,
        session_id: &str,
    ) -> Result<String, SignalingError>;
}

/// Opens a signaling socket.
#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn SignalingSocket>, SignalingError>;
}

/// Foreground/background signal from the host platform.
pub trait AppLifecycle: Send + Sync {
    fn is_foreground(&self) -> bool;
}

/// One remote participant in the local model.
#[derive(Debug, Clone)]
pub struct Participant {
    pub user_id: UserId,
    pub user_key: UserKey,
    pub display_name: String,
    pub muted: bool,
    pub camera_off: bool,
    pub hand_raised: bool,
}

struct Transports {
    send: Arc<ClientTransport>,
    recv: Arc<ClientTransport>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProduceAck {
    producer_id: ProducerId,
}

#[derive(Deserialize)]
struct ProducerListing {
    producers: Vec<crate::protocol::ProducerSummary>,
}

struct SessionInner {
    config: SessionConfig,
    auth: Arc<dyn AuthFetcher>,
    connector: Arc<dyn SocketConnector>,
    lifecycle: Arc<dyn AppLifecycle>,
    sounds: Arc<dyn SoundSink>,
    media: Mutex<MediaManager>,
    state_tx: watch::Sender<ConnectionState>,
    room_id: StdMutex<Option<RoomId>>,
    user_id: StdMutex<Option<UserId>>,
    intent: StdMutex<Option<JoinIntent>>,
    has_active_call: AtomicBool,
    is_attendee: AtomicBool,
    socket: Mutex<Option<Arc<dyn SignalingSocket>>>,
    rtp_capabilities: StdMutex<Option<RtpCapabilities>>,
    transports: StdMutex<Option<Transports>>,
    producers: StdMutex<HashMap<MediaKind, ProducerId>>,
    screen_producer: StdMutex<Option<ProducerId>>,
    consumers: Mutex<HashMap<ProducerId, ConsumerId>>,
    participants: StdMutex<HashMap<UserId, Participant>>,
    video_quality: StdMutex<VideoQuality>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    engine: Mutex<ReconnectEngine>,
    reconnecting: AtomicBool,
    keep_alive: StdMutex<Option<KeepAliveGuard>>,
    auto_camera_blanked: AtomicBool,
    screen_sharing: AtomicBool,
    consuming_screen: AtomicBool,
    weak_self: Weak<SessionInner>,
}

/// Handle to one in-call session. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<SessionInner>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        auth: Arc<dyn AuthFetcher>,
        connector: Arc<dyn SocketConnector>,
        devices: Arc<dyn MediaDevices>,
        lifecycle: Arc<dyn AppLifecycle>,
    ) -> Self {
        Self::with_sounds(config, auth, connector, devices, lifecycle, Arc::new(NoopSoundSink))
    }

    pub fn with_sounds(
        config: SessionConfig,
        auth: Arc<dyn AuthFetcher>,
        connector: Arc<dyn SocketConnector>,
        devices: Arc<dyn MediaDevices>,
        lifecycle: Arc<dyn AppLifecycle>,
        sounds: Arc<dyn SoundSink>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let reconnect = config.reconnect.clone();
        SessionController {
            inner: Arc::new_cyclic(|weak| SessionInner {
                weak_self: weak.clone(),
                config,
                auth,
                connector,
                lifecycle,
                sounds,
                media: Mutex::new(MediaManager::new(devices)),
                state_tx,
                room_id: StdMutex::new(None),
                user_id: StdMutex::new(None),
                intent: StdMutex::new(None),
                has_active_call: AtomicBool::new(false),
                is_attendee: AtomicBool::new(false),
                socket: Mutex::new(None),
                rtp_capabilities: StdMutex::new(None),
                transports: StdMutex::new(None),
                producers: StdMutex::new(HashMap::new()),
                screen_producer: StdMutex::new(None),
                consumers: Mutex::new(HashMap::new()),
                participants: StdMutex::new(HashMap::new()),
                video_quality: StdMutex::new(VideoQuality::Standard),
                tasks: StdMutex::new(Vec::new()),
                engine: Mutex::new(ReconnectEngine::new(reconnect)),
                reconnecting: AtomicBool::new(false),
                keep_alive: StdMutex::new(None),
                auto_camera_blanked: AtomicBool::new(false),
                screen_sharing: AtomicBool::new(false),
                consuming_screen: AtomicBool::new(false),
            }),
        }
    }

    // ----- observers -------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn room_id(&self) -> Option<RoomId> {
        self.inner.room_id.lock().unwrap().clone()
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.inner.user_id.lock().unwrap().clone()
    }

    pub fn has_active_call(&self) -> bool {
        self.inner.has_active_call.load(Ordering::SeqCst)
    }

    pub fn participants(&self) -> Vec<Participant> {
        self.inner
            .participants
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect()
    }

    pub fn video_quality(&self) -> VideoQuality {
        *self.inner.video_quality.lock().unwrap()
    }

    pub async fn consumer_count(&self) -> usize {
        self.inner.consumers.lock().await.len()
    }

    pub async fn consumed_producers(&self) -> Vec<ProducerId> {
        self.inner.consumers.lock().await.keys().cloned().collect()
    }

    /// Client-side transport handles; integration drives their connection
    /// state from the media stack.
    pub fn transports(&self) -> Option<(Arc<ClientTransport>, Arc<ClientTransport>)> {
        self.inner
            .transports
            .lock()
            .unwrap()
            .as_ref()
            .map(|t| (Arc::clone(&t.send), Arc::clone(&t.recv)))
    }

    pub async fn reconnect_attempts(&self) -> u32 {
        self.inner.engine.lock().await.attempts()
    }

    // ----- lifecycle -------------------------------------------------------

    /// Joins a room. Auth fetch, socket connect, and media acquisition run
    /// concurrently; only auth/socket failure is terminal.
    pub async fn join(&self, intent: JoinIntent) -> Result<JoinStatus, SignalingError> {
        let inner = &self.inner;
        *inner.intent.lock().unwrap() = Some(intent.clone());
        inner.set_state(ConnectionState::Connecting);

        let auth_fut = inner
            .auth
            .fetch_token(&intent.room_id, &inner.config.session_id);
        let socket_fut = inner.connector.connect();
        let media_fut = async {
            inner
                .media
                .lock()
                .await
                .acquire(intent.want_audio, intent.want_video)
                .await
        };
        let (token_res, socket_res, media_res) = tokio::join!(auth_fut, socket_fut, media_fut);

        let token = match token_res {
            Ok(token) => token,
            Err(error) => return Err(inner.fail_terminal(error)),
        };
        let socket = match socket_res {
            Ok(socket) => socket,
            Err(error) => return Err(inner.fail_terminal(error)),
        };
        if let Err(error) = media_res {
            // audio-only fallback, then media-less participation
            warn!(error = %error, "Media acquisition failed, degrading");
            let fallback = inner
                .media
                .lock()
                .await
                .acquire(intent.want_audio, false)
                .await;
            if fallback.is_err() {
                let _ = inner.media.lock().await.acquire(false, false).await;
            }
        }
        inner.set_state(ConnectionState::Connected);
        inner.adopt_socket(&socket).await;

        inner.set_state(ConnectionState::Joining);
        match inner.join_on_socket(&socket, &intent, token).await {
            Ok(status) => Ok(status),
            Err(error) => Err(inner.fail_terminal(error)),
        }
    }

    /// Explicit leave: tells the server, then tears down locally.
    pub async fn leave(&self) {
        let socket = self.inner.socket_handle().await;
        if let Some(socket) = socket {
            let _ = socket.request(ClientRequest::LeaveRoom).await;
        }
        self.inner.teardown(true).await;
        self.inner.set_state(ConnectionState::Disconnected);
    }

    /// Handoff teardown: no leave request semantics beyond the socket
    /// close, no leave sound, straight to `Disconnected`.
    pub async fn relinquish_call(&self, reason: &str) {
        info!(reason, "Relinquishing session");
        let socket = self.inner.socket_handle().await;
        if let Some(socket) = socket {
            let _ = socket.request(ClientRequest::LeaveRoom).await;
        }
        self.inner.teardown(true).await;
        self.inner.set_state(ConnectionState::Disconnected);
    }

    // ----- media controls --------------------------------------------------

    pub async fn toggle_mute(&self, muted: bool) {
        self.inner.media.lock().await.muted = muted;
        let producer = self
            .inner
            .producers
            .lock()
            .unwrap()
            .get(&MediaKind::Audio)
            .cloned();
        if let (Some(producer_id), Some(socket)) = (producer, self.inner.socket_handle().await) {
            let _ = socket
                .request(ClientRequest::ToggleMute {
                    producer_id,
                    paused: muted,
                })
                .await;
        }
    }

    pub async fn toggle_camera(&self, off: bool) {
        self.inner.media.lock().await.camera_off = off;
        let producer = self
            .inner
            .producers
            .lock()
            .unwrap()
            .get(&MediaKind::Video)
            .cloned();
        if let (Some(producer_id), Some(socket)) = (producer, self.inner.socket_handle().await) {
            let _ = socket
                .request(ClientRequest::ToggleCamera {
                    producer_id,
                    paused: off,
                })
                .await;
        }
    }

    pub async fn start_screen_share(&self) -> Result<ProducerId, SignalingError> {
        let socket = self
            .inner
            .socket_handle()
            .await
            .ok_or_else(|| SignalingError::ConnectionFailed("not connected".to_string()))?;
        let transport_id = self
            .inner
            .transports
            .lock()
            .unwrap()
            .as_ref()
            .map(|t| t.send.id.clone())
            .ok_or_else(|| SignalingError::TransportError("no send transport".to_string()))?;
        let ack = socket
            .request(ClientRequest::Produce {
                transport_id,
                kind: MediaKind::Video,
                rtp_parameters: RtpParameters(serde_json::json!({ "content": "screen" })),
                app_data: ProducerAppData {
                    source: ProducerSource::Screen,
                    paused: false,
                },
            })
            .await?;
        let ack: ProduceAck = serde_json::from_value(ack)
            .map_err(|e| SignalingError::Unknown(format!("bad produce ack: {e}")))?;
        *self.inner.screen_producer.lock().unwrap() = Some(ack.producer_id.clone());
        self.inner.screen_sharing.store(true, Ordering::SeqCst);
        Ok(ack.producer_id)
    }

    pub async fn stop_screen_share(&self) {
        let producer = self.inner.screen_producer.lock().unwrap().take();
        self.inner.screen_sharing.store(false, Ordering::SeqCst);
        if let (Some(producer_id), Some(socket)) = (producer, self.inner.socket_handle().await) {
            let _ = socket
                .request(ClientRequest::CloseProducer { producer_id })
                .await;
        }
    }

    // ----- background/foreground ------------------------------------------

    /// Backgrounding while screen media is live keeps the audio session
    /// alive with an inaudible oscillator; otherwise the camera is blanked
    /// and remembered for restoration.
    pub async fn on_background(&self) {
        let inner = &self.inner;
        if !inner.has_active_call.load(Ordering::SeqCst) {
            return;
        }
        if inner.screen_sharing.load(Ordering::SeqCst)
            || inner.consuming_screen.load(Ordering::SeqCst)
        {
            let guard = inner.media.lock().await.devices().start_keep_alive();
            *inner.keep_alive.lock().unwrap() = Some(guard);
            return;
        }
        let camera_live = !inner.media.lock().await.camera_off;
        if camera_live {
            inner.auto_camera_blanked.store(true, Ordering::SeqCst);
            self.toggle_camera(true).await;
        }
    }

    pub async fn on_foreground(&self) {
        *self.inner.keep_alive.lock().unwrap() = None;
        if self.inner.auto_camera_blanked.swap(false, Ordering::SeqCst) {
            self.toggle_camera(false).await;
        }
    }

    /// Entry point for a transport interruption (tests drive the transport
    /// state; the media stack does in production).
    pub async fn handle_transport_interruption(&self, role: TransportRole) {
        let transport = {
            let transports = self.inner.transports.lock().unwrap();
            transports.as_ref().map(|t| match role {
                TransportRole::Producer => Arc::clone(&t.send),
                TransportRole::Consumer => Arc::clone(&t.recv),
            })
        };
        if let Some(transport) = transport {
            self.inner.recover(transport).await;
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state(),
            has_active_call: self.has_active_call(),
        }
    }
}

#[async_trait]
impl ManagedSession for SessionController {
    fn snapshot(&self) -> SessionSnapshot {
        SessionController::snapshot(self)
    }

    async fn relinquish(&self, reason: &str) {
        self.relinquish_call(reason).await;
    }
}

impl SessionInner {
    fn strong(&self) -> Arc<SessionInner> {
        self.weak_self.upgrade().expect("session still referenced")
    }

    fn set_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state);
    }

    fn fail_terminal(&self, error: SignalingError) -> SignalingError {
        self.set_state(ConnectionState::Error);
        error
    }

    async fn socket_handle(&self) -> Option<Arc<dyn SignalingSocket>> {
        self.socket.lock().await.clone()
    }

    fn push_task(&self, task: JoinHandle<()>) {
        self.tasks.lock().unwrap().push(task);
    }

    async fn adopt_socket(&self, socket: &Arc<dyn SignalingSocket>) {
        *self.socket.lock().await = Some(Arc::clone(socket));
        if let Some(events) = socket.take_events().await {
            let inner = self.strong();
            self.push_task(tokio::spawn(event_pump(inner, events)));
        }
    }

    /// Sends `joinRoom` on an adopted socket and brings the session up if
    /// admitted. Shared by first join, waiting-room promotion, and
    /// reconnect.
    async fn join_on_socket(
        &self,
        socket: &Arc<dyn SignalingSocket>,
        intent: &JoinIntent,
        token: String,
    ) -> Result<JoinStatus, SignalingError> {
        let ack = socket
            .request(ClientRequest::JoinRoom {
                room_id: intent.room_id.clone(),
                session_id: self.config.session_id.clone(),
                token,
                display_name: intent.display_name.clone(),
                ghost: intent.ghost,
                webinar_invite_code: intent.webinar_invite_code.clone(),
                meeting_invite_code: intent.meeting_invite_code.clone(),
            })
            .await?;
        let join: JoinResult = serde_json::from_value(ack)
            .map_err(|e| SignalingError::Unknown(format!("bad join ack: {e}")))?;

        *self.room_id.lock().unwrap() = Some(join.room_id.clone());
        *self.user_id.lock().unwrap() = Some(join.user_id.clone());
        *self.rtp_capabilities.lock().unwrap() = Some(join.rtp_capabilities.clone());
        *self.video_quality.lock().unwrap() = join.video_quality;
        self.is_attendee.store(
            join.webinar_role == Some(crate::protocol::ClientMode::WebinarAttendee),
            Ordering::SeqCst,
        );

        match join.status {
            JoinStatus::Waiting => {
                self.set_state(ConnectionState::Waiting);
                Ok(JoinStatus::Waiting)
            }
            JoinStatus::Joined => {
                self.has_active_call.store(true, Ordering::SeqCst);
                self.setup_transports(socket).await?;
                self.publish_local_media(socket).await;
                for producer in &join.existing_producers {
                    if producer.source == ProducerSource::Screen {
                        self.consuming_screen.store(true, Ordering::SeqCst);
                    }
                    self.consume_one(socket, producer.producer_id.clone()).await;
                }
                self.spawn_reconcile();
                self.spawn_track_watchers().await;
                self.engine.lock().await.reset();
                self.set_state(ConnectionState::Joined);
                Ok(JoinStatus::Joined)
            }
        }
    }

    async fn setup_transports(
        &self,
        socket: &Arc<dyn SignalingSocket>,
    ) -> Result<(), SignalingError> {
        let mut pair = Vec::with_capacity(2);
        for role in [TransportRole::Producer, TransportRole::Consumer] {
            // attendees are watch-only; skip the send transport
            if role == TransportRole::Producer && self.is_attendee.load(Ordering::SeqCst) {
                continue;
            }
            let create = match role {
                TransportRole::Producer => ClientRequest::CreateProducerTransport,
                TransportRole::Consumer => ClientRequest::CreateConsumerTransport,
            };
            let ack = socket.request(create).await?;
            let params: TransportParams = serde_json::from_value(ack)
                .map_err(|e| SignalingError::TransportError(format!("bad transport ack: {e}")))?;
            let connect = match role {
                TransportRole::Producer => ClientRequest::ConnectProducerTransport {
                    transport_id: params.id.clone(),
                    dtls_parameters: params.dtls_parameters.clone(),
                },
                TransportRole::Consumer => ClientRequest::ConnectConsumerTransport {
                    transport_id: params.id.clone(),
                    dtls_parameters: params.dtls_parameters.clone(),
                },
            };
            socket.request(connect).await?;
            let transport = ClientTransport::new(params.id, role);
            transport.set_state(TransportConnState::Connected);
            self.spawn_transport_watcher(Arc::clone(&transport));
            pair.push(transport);
        }

        let mut iter = pair.into_iter();
        let (send, recv) = if self.is_attendee.load(Ordering::SeqCst) {
            let recv = iter.next().expect("consumer transport");
            // watch-only sessions reuse the recv handle in the send slot so
            // the tuple shape stays uniform
            (Arc::clone(&recv), recv)
        } else {
            let send = iter.next().expect("producer transport");
            let recv = iter.next().expect("consumer transport");
            (send, recv)
        };
        *self.transports.lock().unwrap() = Some(Transports { send, recv });
        Ok(())
    }

    async fn publish_local_media(&self, socket: &Arc<dyn SignalingSocket>) {
        if self.is_attendee.load(Ordering::SeqCst) {
            return;
        }
        let transport_id = match self
            .transports
            .lock()
            .unwrap()
            .as_ref()
            .map(|t| t.send.id.clone())
        {
            Some(id) => id,
            None => return,
        };
        let (tracks, muted, camera_off) = {
            let media = self.media.lock().await;
            let mut tracks = Vec::new();
            if let Some(stream) = media.stream() {
                if let Some(track) = &stream.audio {
                    tracks.push((track.id.clone(), MediaKind::Audio));
                }
                if let Some(track) = &stream.video {
                    tracks.push((track.id.clone(), MediaKind::Video));
                }
            }
            (tracks, media.muted, media.camera_off)
        };
        for (track_id, kind) in tracks {
            let paused = match kind {
                MediaKind::Audio => muted,
                MediaKind::Video => camera_off,
            };
            let ack = socket
                .request(ClientRequest::Produce {
                    transport_id: transport_id.clone(),
                    kind,
                    rtp_parameters: RtpParameters(serde_json::json!({ "trackId": track_id })),
                    app_data: ProducerAppData {
                        source: ProducerSource::Webcam,
                        paused,
                    },
                })
                .await;
            match ack.and_then(|v| {
                serde_json::from_value::<ProduceAck>(v)
                    .map_err(|e| SignalingError::Unknown(format!("bad produce ack: {e}")))
            }) {
                Ok(produced) => {
                    self.producers
                        .lock()
                        .unwrap()
                        .insert(kind, produced.producer_id);
                }
                Err(error) => warn!(?kind, error = %error, "Produce failed"),
            }
        }
    }

    async fn consume_one(&self, socket: &Arc<dyn SignalingSocket>, producer_id: ProducerId) {
        if self.consumers.lock().await.contains_key(&producer_id) {
            return;
        }
        let capabilities = self
            .rtp_capabilities
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_default();
        let ack = socket
            .request(ClientRequest::Consume {
                producer_id: producer_id.clone(),
                rtp_capabilities: capabilities,
            })
            .await;
        let params = match ack
            .and_then(|v| {
                serde_json::from_value::<crate::sfu::ConsumerParams>(v)
                    .map_err(|e| SignalingError::Unknown(format!("bad consume ack: {e}")))
            }) {
            Ok(params) => params,
            Err(error) => {
                debug!(producer = %producer_id, error = %error, "Consume failed");
                return;
            }
        };
        self.consumers
            .lock()
            .await
            .insert(producer_id, params.id.clone());
        let _ = socket
            .request(ClientRequest::ResumeConsumer {
                consumer_id: params.id,
            })
            .await;
    }

    /// Periodic `getProducers` reconciliation: the recovery path for any
    /// missed `newProducer` / `producerClosed`.
    fn spawn_reconcile(&self) {
        let inner = self.strong();
        let interval = self.config.reconcile_interval;
        self.push_task(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                inner.reconcile_once().await;
            }
        }));
    }

    async fn reconcile_once(&self) {
        let Some(socket) = self.socket_handle().await else {
            return;
        };
        let Ok(ack) = socket.request(ClientRequest::GetProducers).await else {
            return;
        };
        let Ok(listing) = serde_json::from_value::<ProducerListing>(ack) else {
            return;
        };

        let listed: Vec<ProducerId> = listing
            .producers
            .iter()
            .map(|p| p.producer_id.clone())
            .collect();
        self.consuming_screen.store(
            listing
                .producers
                .iter()
                .any(|p| p.source == ProducerSource::Screen),
            Ordering::SeqCst,
        );

        // drop consumers whose producers are gone
        let stale: Vec<ProducerId> = {
            let consumers = self.consumers.lock().await;
            consumers
                .keys()
                .filter(|id| !listed.contains(id))
                .cloned()
                .collect()
        };
        for id in stale {
            self.consumers.lock().await.remove(&id);
        }
        // consume producers we lack
        for producer_id in listed {
            self.consume_one(&socket, producer_id).await;
        }
    }

    fn spawn_track_watchers<'a>(&'a self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let watchers = {
                let media = self.media.lock().await;
                let mut watchers = Vec::new();
                if let Some(stream) = media.stream() {
                    for track in [stream.audio.as_ref(), stream.video.as_ref()]
                        .into_iter()
                        .flatten()
                    {
                        watchers.push((track.id.clone(), track.kind, track.watch_ended()));
                    }
                }
                watchers
            };
            for (track_id, kind, mut ended_rx) in watchers {
                let inner = self.strong();
                self.push_task(tokio::spawn(async move {
                    while !*ended_rx.borrow() {
                        if ended_rx.changed().await.is_err() {
                            return;
                        }
                    }
                    inner.on_track_ended(track_id, kind).await;
                }));
            }
        })
    }

    async fn on_track_ended(&self, track_id: String, kind: MediaKind) {
        let in_call = self.has_active_call.load(Ordering::SeqCst);
        let outcome = self
            .media
            .lock()
            .await
            .handle_ended(&track_id, kind, in_call)
            .await;
        match outcome {
            TrackEndedOutcome::Ignored => {}
            TrackEndedOutcome::Reacquired => {
                // watch the replacement the same way
                self.spawn_track_watchers().await;
            }
            TrackEndedOutcome::Degraded => {
                let producer = self.producers.lock().unwrap().remove(&kind);
                if let (Some(producer_id), Some(socket)) = (producer, self.socket_handle().await) {
                    let _ = socket
                        .request(ClientRequest::CloseProducer { producer_id })
                        .await;
                }
            }
        }
    }

    fn spawn_transport_watcher(&self, transport: Arc<ClientTransport>) {
        let inner = self.strong();
        self.push_task(tokio::spawn(async move {
            let mut rx = transport.subscribe();
            while rx.changed().await.is_ok() {
                let state = *rx.borrow();
                match state {
                    TransportConnState::Disconnected | TransportConnState::Failed => {
                        inner.recover(Arc::clone(&transport)).await;
                    }
                    TransportConnState::Closed => return,
                    _ => {}
                }
            }
        }));
    }

    async fn recover(&self, transport: Arc<ClientTransport>) {
        let Some(socket) = self.socket_handle().await else {
            return;
        };
        let outcome = recover_transport(
            &socket,
            &transport,
            self.config.transport_disconnect_grace,
            self.config.ice_restart_grace,
        )
        .await;
        match outcome {
            RecoveryOutcome::Absorbed | RecoveryOutcome::RecoveredByIceRestart => {}
            RecoveryOutcome::NeedsReconnect => self.full_reconnect().await,
        }
    }

    /// Full teardown + re-auth + re-join with exponential backoff. The
    /// server classes the re-join as a reconnection while the disconnect
    /// grace window holds.
    async fn full_reconnect(&self) {
        if self.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(ConnectionState::Reconnecting);
        if let Some(socket) = self.socket.lock().await.take() {
            socket.close().await;
        }
        if let Some(transports) = self.transports.lock().unwrap().take() {
            transports.send.set_state(TransportConnState::Closed);
            transports.recv.set_state(TransportConnState::Closed);
        }
        self.producers.lock().unwrap().clear();
        self.consumers.lock().await.clear();

        let mut first = true;
        loop {
            let immediate = first && self.lifecycle.is_foreground();
            first = false;
            let delay = self.engine.lock().await.next_delay(immediate);
            let Some(delay) = delay else {
                warn!("Reconnect attempts exhausted");
                self.reconnecting.store(false, Ordering::SeqCst);
                self.set_state(ConnectionState::Error);
                return;
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match self.try_rejoin().await {
                Ok(()) => {
                    self.reconnecting.store(false, Ordering::SeqCst);
                    return;
                }
                Err(error) => {
                    debug!(error = %error, "Reconnect attempt failed");
                }
            }
        }
    }

    async fn try_rejoin(&self) -> Result<(), SignalingError> {
        let intent = self
            .intent
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SignalingError::Unknown("nothing to rejoin".to_string()))?;
        let token = self
            .auth
            .fetch_token(&intent.room_id, &self.config.session_id)
            .await?;
        let socket = self.connector.connect().await?;
        self.adopt_socket(&socket).await;
        self.join_on_socket(&socket, &intent, token).await?;
        Ok(())
    }

    async fn teardown(&self, close_socket: bool) {
        self.has_active_call.store(false, Ordering::SeqCst);
        for task in self.tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        // every owned track lands in the intentional-stop set
        self.media.lock().await.stop_all();
        if let Some(transports) = self.transports.lock().unwrap().take() {
            transports.send.set_state(TransportConnState::Closed);
            transports.recv.set_state(TransportConnState::Closed);
        }
        if close_socket {
            if let Some(socket) = self.socket.lock().await.take() {
                socket.close().await;
            }
        }
        self.producers.lock().unwrap().clear();
        *self.screen_producer.lock().unwrap() = None;
        self.consumers.lock().await.clear();
        self.participants.lock().unwrap().clear();
        *self.room_id.lock().unwrap() = None;
        *self.keep_alive.lock().unwrap() = None;
        self.screen_sharing.store(false, Ordering::SeqCst);
        self.consuming_screen.store(false, Ordering::SeqCst);
    }

    async fn handle_event(&self, event: ServerEvent) {
        // cross-room filtering: stragglers from a room we already left
        let current = self.room_id.lock().unwrap().clone();
        if current.as_ref() != Some(event.room_id()) {
            debug!(event = event.name(), "Dropping event for another room");
            return;
        }

        match event {
            ServerEvent::UserJoined {
                user_id,
                user_key,
                display_name,
                ..
            } => {
                let projected = {
                    let mut participants = self.participants.lock().unwrap();
                    participants.insert(
                        user_id.clone(),
                        Participant {
                            user_id,
                            user_key,
                            display_name,
                            muted: false,
                            camera_off: false,
                            hand_raised: false,
                        },
                    );
                    participants.len() + 1
                };
                if should_play(NotificationSound::Join, projected) {
                    self.sounds.play(NotificationSound::Join);
                }
            }
            ServerEvent::UserLeft { user_id, .. } => {
                let projected = {
                    let mut participants = self.participants.lock().unwrap();
                    participants.remove(&user_id);
                    participants.len() + 1
                };
                if should_play(NotificationSound::Leave, projected) {
                    self.sounds.play(NotificationSound::Leave);
                }
            }
            ServerEvent::UserRequestedJoin { .. } => {
                self.sounds.play(NotificationSound::Waiting);
            }
            ServerEvent::NewProducer {
                producer_id,
                source,
                ..
            } => {
                if source == ProducerSource::Screen {
                    self.consuming_screen.store(true, Ordering::SeqCst);
                }
                if let Some(socket) = self.socket_handle().await {
                    self.consume_one(&socket, producer_id).await;
                }
            }
            ServerEvent::ProducerClosed { producer_id, .. } => {
                self.consumers.lock().await.remove(&producer_id);
            }
            ServerEvent::ParticipantMuted {
                user_id, paused, ..
            } => {
                if let Some(p) = self.participants.lock().unwrap().get_mut(&user_id) {
                    p.muted = paused;
                }
            }
            ServerEvent::ParticipantCameraOff {
                user_id, paused, ..
            } => {
                if let Some(p) = self.participants.lock().unwrap().get_mut(&user_id) {
                    p.camera_off = paused;
                }
            }
            ServerEvent::HandRaised {
                user_id, raised, ..
            } => {
                if let Some(p) = self.participants.lock().unwrap().get_mut(&user_id) {
                    p.hand_raised = raised;
                }
            }
            ServerEvent::DisplayNameUpdated {
                user_key,
                display_name,
                ..
            } => {
                let mut participants = self.participants.lock().unwrap();
                for p in participants.values_mut() {
                    if p.user_key == user_key {
                        p.display_name = display_name.clone();
                    }
                }
            }
            ServerEvent::SetVideoQuality { quality, .. } => {
                *self.video_quality.lock().unwrap() = quality;
            }
            ServerEvent::JoinApproved { .. } => {
                if *self.state_tx.borrow() == ConnectionState::Waiting {
                    let inner = self.strong();
                    tokio::spawn(async move {
                        let _ = inner.rejoin_after_approval().await;
                    });
                }
            }
            ServerEvent::JoinRejected { .. }
            | ServerEvent::Kicked { .. }
            | ServerEvent::RoomClosed { .. } => {
                // teardown aborts the event pump this handler runs on, so
                // it must finish on a task of its own
                let inner = self.strong();
                tokio::spawn(async move {
                    inner.teardown(true).await;
                    inner.set_state(ConnectionState::Error);
                });
            }
            ServerEvent::WebinarFeedChanged { .. } => {
                // the selector moved; resync
                self.reconcile_once().await;
            }
            _ => {}
        }
    }

    /// Waiting-room promotion: the host admitted us; join again on the same
    /// socket (our key is on the allow list now).
    async fn rejoin_after_approval(&self) -> Result<(), SignalingError> {
        let intent = self
            .intent
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| SignalingError::Unknown("no join intent".to_string()))?;
        let socket = self
            .socket_handle()
            .await
            .ok_or_else(|| SignalingError::ConnectionFailed("socket gone".to_string()))?;
        let token = self
            .auth
            .fetch_token(&intent.room_id, &self.config.session_id)
            .await?;
        self.set_state(ConnectionState::Joining);
        self.join_on_socket(&socket, &intent, token).await?;
        Ok(())
    }
}

async fn event_pump(inner: Arc<SessionInner>, mut events: EventReceiver) {
    while let Some(frame) = events.recv().await {
        if let ServerFrame::Event(event) = frame {
            inner.handle_event(event).await;
        }
    }
}

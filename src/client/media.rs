//! Local media ownership.
//!
//! A session owns at most one active local stream. Tracks stopped on
//! purpose are remembered by identity so their `ended` signal never
//! triggers recovery; an unexpected `ended` re-acquires the device or
//! degrades the corresponding bit to muted / camera-off.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::error::SignalingError;
use crate::sfu::MediaKind;

/// One local capture track. `ended` fires when the device goes away
/// (unplugged camera, revoked permission) or the track is stopped.
pub struct LocalTrack {
    pub id: String,
    pub kind: MediaKind,
    ended_rx: watch::Receiver<bool>,
}

/// Device-side handle for a track; flipping it simulates (or reports) the
/// underlying capture ending.
pub struct TrackControl {
    ended_tx: watch::Sender<bool>,
}

pub fn track_pair(id: impl Into<String>, kind: MediaKind) -> (LocalTrack, TrackControl) {
    let (ended_tx, ended_rx) = watch::channel(false);
    (
        LocalTrack {
            id: id.into(),
            kind,
            ended_rx,
        },
        TrackControl { ended_tx },
    )
}

impl LocalTrack {
    pub fn has_ended(&self) -> bool {
        *self.ended_rx.borrow()
    }

    /// Resolves when the track ends. Used by the per-track watcher task.
    pub async fn wait_ended(&mut self) {
        while !*self.ended_rx.borrow() {
            if self.ended_rx.changed().await.is_err() {
                return;
            }
        }
    }

    pub fn watch_ended(&self) -> watch::Receiver<bool> {
        self.ended_rx.clone()
    }
}

impl TrackControl {
    pub fn end(&self) {
        let _ = self.ended_tx.send(true);
    }
}

pub struct LocalStream {
    pub audio: Option<LocalTrack>,
    pub video: Option<LocalTrack>,
}

/// Inaudible-oscillator keep-alive held while backgrounded during screen
/// share; dropping the guard releases the audio session.
pub struct KeepAliveGuard {
    active: Arc<AtomicBool>,
}

impl KeepAliveGuard {
    pub fn new() -> Self {
        KeepAliveGuard {
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.active)
    }
}

impl Default for KeepAliveGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for KeepAliveGuard {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Relaxed);
    }
}

/// Device layer the session controller acquires capture from.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    async fn acquire(&self, audio: bool, video: bool) -> Result<LocalStream, SignalingError>;

    /// Starts the background audio keep-alive.
    fn start_keep_alive(&self) -> KeepAliveGuard;
}

/// What happened to an ended track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackEndedOutcome {
    /// Intentionally stopped, out of call, or already muted — no recovery.
    Ignored,
    /// Device re-acquired; a fresh track replaced the dead one.
    Reacquired,
    /// Re-acquisition failed; the kind's bit degraded to muted/camera-off
    /// and the caller should close the associated producer.
    Degraded,
}

pub struct MediaManager {
    devices: Arc<dyn MediaDevices>,
    stream: Option<LocalStream>,
    /// Track ids stopped on purpose; their `ended` must not recover.
    intentionally_stopped: HashSet<String>,
    pub muted: bool,
    pub camera_off: bool,
}

impl MediaManager {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        MediaManager {
            devices,
            stream: None,
            intentionally_stopped: HashSet::new(),
            muted: false,
            camera_off: false,
        }
    }

    pub fn stream(&self) -> Option<&LocalStream> {
        self.stream.as_ref()
    }

    pub fn devices(&self) -> Arc<dyn MediaDevices> {
        Arc::clone(&self.devices)
    }

    /// Acquires the local stream. Failure is recoverable: the caller falls
    /// back to audio-only or media-less participation.
    pub async fn acquire(&mut self, audio: bool, video: bool) -> Result<(), SignalingError> {
        if !audio && !video {
            self.stream = None;
            return Ok(());
        }
        let stream = self.devices.acquire(audio, video).await?;
        self.stream = Some(stream);
        Ok(())
    }

    pub fn mark_intentional(&mut self, track_id: &str) {
        self.intentionally_stopped.insert(track_id.to_string());
    }

    pub fn is_intentional(&self, track_id: &str) -> bool {
        self.intentionally_stopped.contains(track_id)
    }

    /// Stops everything on purpose (teardown, relinquish). Every owned
    /// track lands in the intentional set first.
    pub fn stop_all(&mut self) {
        if let Some(stream) = self.stream.take() {
            for track in [stream.audio.as_ref(), stream.video.as_ref()]
                .into_iter()
                .flatten()
            {
                self.intentionally_stopped.insert(track.id.clone());
            }
        }
    }

    /// Reacts to a track's `ended` signal.
    pub async fn handle_ended(
        &mut self,
        track_id: &str,
        kind: MediaKind,
        in_call: bool,
    ) -> TrackEndedOutcome {
        if self.is_intentional(track_id) {
            debug!(track = track_id, "Ignoring ended signal of intentionally stopped track");
            return TrackEndedOutcome::Ignored;
        }
        if !in_call {
            return TrackEndedOutcome::Ignored;
        }
        let suppressed = match kind {
            MediaKind::Audio => self.muted,
            MediaKind::Video => self.camera_off,
        };
        if suppressed {
            return TrackEndedOutcome::Ignored;
        }

        let (want_audio, want_video) = match kind {
            MediaKind::Audio => (true, false),
            MediaKind::Video => (false, true),
        };
        match self.devices.acquire(want_audio, want_video).await {
            Ok(fresh) => {
                let replacement = match kind {
                    MediaKind::Audio => fresh.audio,
                    MediaKind::Video => fresh.video,
                };
                if let Some(track) = replacement {
                    if let Some(stream) = self.stream.as_mut() {
                        match kind {
                            MediaKind::Audio => stream.audio = Some(track),
                            MediaKind::Video => stream.video = Some(track),
                        }
                        return TrackEndedOutcome::Reacquired;
                    }
                }
                self.degrade(kind)
            }
            Err(error) => {
                warn!(track = track_id, error = %error, "Media re-acquisition failed");
                self.degrade(kind)
            }
        }
    }

    fn degrade(&mut self, kind: MediaKind) -> TrackEndedOutcome {
        match kind {
            MediaKind::Audio => self.muted = true,
            MediaKind::Video => self.camera_off = true,
        }
        TrackEndedOutcome::Degraded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fakes::FakeMediaDevices;

    #[tokio::test]
    async fn test_intentional_stop_suppresses_recovery() {
        let devices = FakeMediaDevices::new();
        let mut manager = MediaManager::new(devices.clone());
        manager.acquire(true, true).await.unwrap();

        let audio_id = manager.stream().unwrap().audio.as_ref().unwrap().id.clone();
        manager.mark_intentional(&audio_id);
        let outcome = manager.handle_ended(&audio_id, MediaKind::Audio, true).await;
        assert_eq!(outcome, TrackEndedOutcome::Ignored);
        assert_eq!(devices.acquire_count(), 1);
    }

    #[tokio::test]
    async fn test_unexpected_ended_reacquires() {
        let devices = FakeMediaDevices::new();
        let mut manager = MediaManager::new(devices.clone());
        manager.acquire(true, false).await.unwrap();

        let audio_id = manager.stream().unwrap().audio.as_ref().unwrap().id.clone();
        let outcome = manager.handle_ended(&audio_id, MediaKind::Audio, true).await;
        assert_eq!(outcome, TrackEndedOutcome::Reacquired);
        // a fresh track replaced the dead one
        let new_id = manager.stream().unwrap().audio.as_ref().unwrap().id.clone();
        assert_ne!(new_id, audio_id);
    }

    #[tokio::test]
    async fn test_failed_reacquisition_degrades() {
        let devices = FakeMediaDevices::new();
        let mut manager = MediaManager::new(devices.clone());
        manager.acquire(false, true).await.unwrap();

        let video_id = manager.stream().unwrap().video.as_ref().unwrap().id.clone();
        devices.fail_next_acquire();
        let outcome = manager.handle_ended(&video_id, MediaKind::Video, true).await;
        assert_eq!(outcome, TrackEndedOutcome::Degraded);
        assert!(manager.camera_off);
    }

    #[tokio::test]
    async fn test_out_of_call_ended_is_ignored() {
        let devices = FakeMediaDevices::new();
        let mut manager = MediaManager::new(devices.clone());
        manager.acquire(true, false).await.unwrap();

        let audio_id = manager.stream().unwrap().audio.as_ref().unwrap().id.clone();
        let outcome = manager.handle_ended(&audio_id, MediaKind::Audio, false).await;
        assert_eq!(outcome, TrackEndedOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_muted_kind_does_not_recover() {
        let devices = FakeMediaDevices::new();
        let mut manager = MediaManager::new(devices.clone());
        manager.acquire(true, false).await.unwrap();
        manager.muted = true;

        let audio_id = manager.stream().unwrap().audio.as_ref().unwrap().id.clone();
        let outcome = manager.handle_ended(&audio_id, MediaKind::Audio, true).await;
        assert_eq!(outcome, TrackEndedOutcome::Ignored);
    }

    #[test]
    fn test_keep_alive_guard_releases_on_drop() {
        let guard = KeepAliveGuard::new();
        let handle = guard.handle();
        assert!(handle.load(Ordering::Relaxed));
        drop(guard);
        assert!(!handle.load(Ordering::Relaxed));
    }
}

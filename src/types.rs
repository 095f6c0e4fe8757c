use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;

use crate::protocol::ServerFrame;

/// Per-socket outbox. Acks and room events share one channel so a requester
/// always observes the fan-out of its own mutation before the ack.
pub type EventSender = mpsc::Sender<ServerFrame>;
pub type EventReceiver = mpsc::Receiver<ServerFrame>;

/// Bounded so one stalled subscriber cannot hold room locks hostage;
/// overflow drops the event and counts it.
pub const OUTBOX_CAPACITY: usize = 256;

pub fn outbox_channel() -> (EventSender, EventReceiver) {
    mpsc::channel(OUTBOX_CAPACITY)
}

/// Milliseconds since the Unix epoch, for wire timestamps.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

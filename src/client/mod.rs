//! Viewer-side session library: the in-call state machine, media ownership,
//! reconnect engine, and the cross-tab session coordinator.

pub mod coordinator;
pub mod fakes;
pub mod media;
pub mod reconnect;
pub mod session;
pub mod socket;
pub mod sounds;

pub use coordinator::{MeetingSessionCoordinator, RegistrationHandle, SessionSnapshot};
pub use media::{LocalStream, LocalTrack, MediaDevices, MediaManager};
pub use reconnect::{ClientTransport, ReconnectConfig, ReconnectEngine, TransportConnState};
pub use session::{ConnectionState, JoinIntent, SessionConfig, SessionController};
pub use socket::{InProcessSocket, SignalingSocket};

pub mod auth;
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod health;
pub mod identity;
pub mod ids;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub mod room;
pub mod routing;
pub mod sfu;
pub mod types;

pub use error::SignalingError;
pub use handlers::{ConnectionContext, SignalingCore};
pub use room::registry::Registry;
pub use room::Room;

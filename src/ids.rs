use std::fmt;
use std::sync::Arc;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Declares a strongly typed string identifier wrapping an `Arc<String>`
/// for cheap cloning across tasks and maps.
macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub Arc<String>);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                $name(Arc::new(s))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                $name(Arc::new(s.to_string()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Ok($name(Arc::new(s)))
            }
        }
    };
}

string_id! {
    /// Room identifier as supplied by clients (no tenant prefix).
    RoomId
}

string_id! {
    /// Process-wide room key: `client_namespace + "/" + room_id`.
    /// Rooms of distinct tenant namespaces never collide.
    ChannelId
}

string_id! {
    /// Principal-stable key. Two sessions of the same principal share it.
    /// Guest keys carry the `guest-` prefix so policy can tell them apart.
    UserKey
}

string_id! {
    /// Per-session handle: `user_key#session_id`.
    UserId
}

string_id! {
    /// Identity of one accepted socket connection.
    SocketId
}

string_id! {
    /// SFU-minted send/receive transport identifier.
    TransportId
}

string_id! {
    /// SFU-minted producer (outbound track) identifier.
    ProducerId
}

string_id! {
    /// SFU-minted consumer (inbound track) identifier.
    ConsumerId
}

const USER_ID_SEPARATOR: char = '#';
const GUEST_KEY_PREFIX: &str = "guest-";

impl ChannelId {
    pub fn compose(client_namespace: &str, room_id: &RoomId) -> Self {
        ChannelId::from(format!("{}/{}", client_namespace, room_id))
    }
}

impl UserKey {
    pub fn guest(sanitized_session: &str) -> Self {
        UserKey::from(format!("{}{}", GUEST_KEY_PREFIX, sanitized_session))
    }

    pub fn is_guest(&self) -> bool {
        self.0.starts_with(GUEST_KEY_PREFIX)
    }
}

impl UserId {
    pub fn compose(user_key: &UserKey, session_id: &str) -> Self {
        UserId::from(format!("{}{}{}", user_key, USER_ID_SEPARATOR, session_id))
    }

    /// The principal-stable half of this id.
    pub fn user_key(&self) -> UserKey {
        match self.0.rfind(USER_ID_SEPARATOR) {
            Some(idx) => UserKey::from(&self.0[..idx]),
            None => UserKey::from(self.0.as_str()),
        }
    }

    pub fn session_id(&self) -> &str {
        match self.0.rfind(USER_ID_SEPARATOR) {
            Some(idx) => &self.0[idx + 1..],
            None => "",
        }
    }
}

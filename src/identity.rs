//! User identity normalization and per-client policy resolution.
//!
//! Identity is derived once at join time from the verified auth payload;
//! everything downstream (admission, presence, disconnect grace) works with
//! the derived `UserKey`/`UserId` pair and never re-reads raw claims.

use serde::{Deserialize, Serialize};

use crate::ids::{SocketId, UserId, UserKey};

pub const MAX_DISPLAY_NAME_LEN: usize = 64;

/// Verified claims carried by a join token. Minted by the auth service,
/// decoded and signature-checked by `auth::TokenKeys`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthPayload {
    pub user: AuthUser,
    /// Session the token was minted for. A mismatch against the session id
    /// the client presents at `joinRoom` rejects the join.
    pub session_id: String,
    /// Tenant namespace; also the policy-table key.
    pub client_id: String,
    #[serde(default)]
    pub is_host: bool,
    #[serde(default)]
    pub join_mode: JoinMode,
    /// Signed webinar link proof, when joining through a `/w/` link.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webinar_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub guest: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinMode {
    #[default]
    Meeting,
    WebinarAttendee,
}

/// Normalized identity of one joining session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub user_key: UserKey,
    pub user_id: UserId,
    pub display_name: String,
    pub guest: bool,
}

/// Per-client policy knobs, resolved from the config table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub allow_non_host_room_creation: bool,
    pub allow_host_join: bool,
    pub allow_display_name_update: bool,
    pub use_waiting_room: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Policy {
            allow_non_host_room_creation: true,
            allow_host_join: true,
            allow_display_name_update: true,
            use_waiting_room: false,
        }
    }
}

/// Resolves the policy for a tenant, falling back to the `"default"` entry,
/// then to built-in defaults.
pub fn resolve_policy(
    policies: &std::collections::HashMap<String, Policy>,
    client_id: &str,
) -> Policy {
    policies
        .get(client_id)
        .or_else(|| policies.get("default"))
        .cloned()
        .unwrap_or_default()
}

/// Derives the stable principal key and per-session id for a join.
///
/// Returns `None` when the payload is missing required fields: a guest
/// session without a session id, or an authenticated principal with neither
/// email nor id.
pub fn build_user_identity(
    payload: &AuthPayload,
    session_id: &str,
    _socket_id: &SocketId,
) -> Option<UserIdentity> {
    let (user_key, guest) = if payload.user.guest {
        let sanitized = sanitize_key_component(session_id);
        if sanitized.is_empty() {
            return None;
        }
        (UserKey::guest(&sanitized), true)
    } else {
        let principal = payload
            .user
            .email
            .as_deref()
            .or(payload.user.id.as_deref())?;
        let sanitized = sanitize_key_component(principal);
        if sanitized.is_empty() {
            return None;
        }
        (UserKey::from(sanitized), false)
    };

    let display_name = {
        let candidate = payload
            .user
            .name
            .as_deref()
            .map(derive_display_name)
            .unwrap_or_default();
        if candidate.is_empty() {
            payload
                .user
                .email
                .as_deref()
                .map(derive_display_name)
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "Guest".to_string())
        } else {
            candidate
        }
    };

    Some(UserIdentity {
        user_id: UserId::compose(&user_key, session_id),
        user_key,
        display_name,
        guest,
    })
}

/// Display-name normalization: trim, collapse whitespace, strip control
/// characters, cap at `MAX_DISPLAY_NAME_LEN`. Empty in, empty out — the
/// caller falls back to the identity-derived name.
pub fn sanitize_display_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len().min(MAX_DISPLAY_NAME_LEN));
    let mut last_was_space = true;
    for ch in raw.chars() {
        if ch.is_control() {
            continue;
        }
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
            continue;
        }
        out.push(ch);
        last_was_space = false;
        if out.chars().count() >= MAX_DISPLAY_NAME_LEN {
            break;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// The institution-address rule: strip the email suffix, split the local
/// part on separators, and title-case the tokens. Plain names are just
/// sanitized.
pub fn derive_display_name(name_or_email: &str) -> String {
    let local = name_or_email
        .split('@')
        .next()
        .unwrap_or(name_or_email)
        .trim();
    if local.is_empty() {
        return String::new();
    }
    if !name_or_email.contains('@') && !local.contains(['.', '_']) {
        return sanitize_display_name(local);
    }
    let spaced = local
        .split(['.', '_', '-'])
        .filter(|t| !t.is_empty())
        .map(title_case)
        .collect::<Vec<_>>()
        .join(" ");
    sanitize_display_name(&spaced)
}

fn title_case(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

/// Key components keep only `[a-z0-9]`, mapping runs of anything else to a
/// single `-`. Stable across sessions of the same principal.
pub fn sanitize_key_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_dash = true;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn guest_payload() -> AuthPayload {
        AuthPayload {
            user: AuthUser {
                id: None,
                email: None,
                name: Some("Visiting Guest".into()),
                guest: true,
            },
            session_id: "sess-1".into(),
            client_id: "acme".into(),
            is_host: false,
            join_mode: JoinMode::Meeting,
            webinar_token: None,
        }
    }

    fn auth_payload(email: &str, name: Option<&str>) -> AuthPayload {
        AuthPayload {
            user: AuthUser {
                id: None,
                email: Some(email.into()),
                name: name.map(|n| n.into()),
                guest: false,
            },
            session_id: "sess-1".into(),
            client_id: "acme".into(),
            is_host: false,
            join_mode: JoinMode::Meeting,
            webinar_token: None,
        }
    }

    #[test]
    fn test_guest_key_derived_from_session() {
        let socket = SocketId::from("sock-1");
        let identity = build_user_identity(&guest_payload(), "Tab One!", &socket).unwrap();
        assert_eq!(identity.user_key.as_ref(), "guest-tab-one");
        assert!(identity.user_key.is_guest());
        assert_eq!(identity.user_id.session_id(), "Tab One!");
        assert_eq!(identity.display_name, "Visiting Guest");
    }

    #[test]
    fn test_authenticated_key_from_email() {
        let socket = SocketId::from("sock-1");
        let identity =
            build_user_identity(&auth_payload("Jane.Doe@uni.example.edu", None), "s2", &socket)
                .unwrap();
        assert_eq!(identity.user_key.as_ref(), "jane-doe-uni-example-edu");
        assert!(!identity.guest);
        assert_eq!(identity.display_name, "Jane Doe");
    }

    #[test]
    fn test_missing_principal_fails() {
        let socket = SocketId::from("sock-1");
        let mut payload = auth_payload("x@y.z", None);
        payload.user.email = None;
        payload.user.id = None;
        assert!(build_user_identity(&payload, "s1", &socket).is_none());
    }

    #[test]
    fn test_same_principal_two_sessions() {
        let socket = SocketId::from("sock-1");
        let a = build_user_identity(&auth_payload("a@b.c", None), "tab1", &socket).unwrap();
        let b = build_user_identity(&auth_payload("a@b.c", None), "tab2", &socket).unwrap();
        assert_eq!(a.user_key, b.user_key);
        assert_ne!(a.user_id, b.user_id);
    }

    #[test]
    fn test_sanitize_display_name() {
        assert_eq!(sanitize_display_name("  Jane\t\tDoe \u{7}"), "Jane Doe");
        assert_eq!(sanitize_display_name("   "), "");
        let long = "x".repeat(200);
        assert_eq!(sanitize_display_name(&long).len(), MAX_DISPLAY_NAME_LEN);
    }

    #[test]
    fn test_derive_display_name_plain() {
        assert_eq!(derive_display_name("Jane Doe"), "Jane Doe");
        assert_eq!(derive_display_name("jane_doe"), "Jane Doe");
    }

    #[test]
    fn test_resolve_policy_falls_back_to_default() {
        let mut table = HashMap::new();
        table.insert(
            "default".to_string(),
            Policy {
                use_waiting_room: true,
                ..Policy::default()
            },
        );
        let resolved = resolve_policy(&table, "unknown-tenant");
        assert!(resolved.use_waiting_room);
        let builtin = resolve_policy(&HashMap::new(), "unknown-tenant");
        assert!(!builtin.use_waiting_room);
    }
}

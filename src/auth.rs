//! Opaque signed tokens and invite-code hashing.
//!
//! The auth service mints the join token over HTTP (`POST /api/sfu/join`);
//! this module owns the verification side, plus the webinar link tokens the
//! coordinator mints itself. Tokens are `base64(claims).base64(hmac)` —
//! opaque strings to clients.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::identity::AuthPayload;
use crate::ids::RoomId;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebinarLinkClaims {
    room_id: String,
    client_id: String,
    link_version: u64,
}

/// Signing/verification keys, shared by the signaling server and the
/// in-process auth used by tests and the load simulator.
#[derive(Clone)]
pub struct TokenKeys {
    secret: Vec<u8>,
}

impl TokenKeys {
    pub fn new(secret: &[u8]) -> Self {
        TokenKeys {
            secret: secret.to_vec(),
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret).expect("hmac accepts any key length")
    }

    fn sign(&self, body: &[u8]) -> String {
        let mut mac = self.mac();
        mac.update(body);
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    fn seal<T: Serialize>(&self, claims: &T) -> String {
        let body = serde_json::to_vec(claims).expect("claims serialize");
        let encoded = URL_SAFE_NO_PAD.encode(&body);
        let sig = self.sign(encoded.as_bytes());
        format!("{}.{}", encoded, sig)
    }

    fn open<T: for<'de> Deserialize<'de>>(&self, token: &str) -> Option<T> {
        let (encoded, sig) = token.split_once('.')?;
        let expected = self.sign(encoded.as_bytes());
        if !bool::from(expected.as_bytes().ct_eq(sig.as_bytes())) {
            return None;
        }
        let body = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        serde_json::from_slice(&body).ok()
    }

    pub fn mint_auth_token(&self, payload: &AuthPayload) -> String {
        self.seal(payload)
    }

    pub fn verify_auth_token(&self, token: &str) -> Option<AuthPayload> {
        self.open(token)
    }

    /// Mints the `wt=` query token for a webinar link. Bound to the room,
    /// tenant, and the link version current at mint time; rotating the link
    /// invalidates all earlier tokens.
    pub fn mint_webinar_token(&self, room_id: &RoomId, client_id: &str, link_version: u64) -> String {
        self.seal(&WebinarLinkClaims {
            room_id: room_id.as_ref().to_string(),
            client_id: client_id.to_string(),
            link_version,
        })
    }

    pub fn verify_webinar_token(
        &self,
        token: &str,
        room_id: &RoomId,
        client_id: &str,
        link_version: u64,
    ) -> bool {
        match self.open::<WebinarLinkClaims>(token) {
            Some(claims) => {
                claims.room_id == room_id.as_ref()
                    && claims.client_id == client_id
                    && claims.link_version == link_version
            }
            None => false,
        }
    }

    /// Keyed hash of an invite code; only the hash is stored on the room.
    pub fn hash_invite_code(&self, code: &str) -> String {
        self.sign(code.trim().to_lowercase().as_bytes())
    }

    pub fn verify_invite_code(&self, code: &str, stored_hash: &str) -> bool {
        let hashed = self.hash_invite_code(code);
        bool::from(hashed.as_bytes().ct_eq(stored_hash.as_bytes()))
    }
}

const INVITE_CODE_LEN: usize = 8;
const INVITE_CODE_ALPHABET: &[u8] = b"abcdefghjkmnpqrstuvwxyz23456789";

/// Human-typable invite code (ambiguous glyphs excluded).
pub fn generate_invite_code() -> String {
    let mut rng = rand::thread_rng();
    (0..INVITE_CODE_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..INVITE_CODE_ALPHABET.len());
            INVITE_CODE_ALPHABET[idx] as char
        })
        .collect()
}

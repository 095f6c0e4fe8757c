use std::collections::HashMap;
use std::env;
use std::num::ParseIntError;

use thiserror::Error;
use tracing::warn;

use crate::identity::Policy;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the signaling WebSocket + health server.
    pub signal_port: u16,
    /// Port for the HTTP metrics server (Prometheus).
    pub metrics_port: u16,
    /// Logging level (e.g., "info", "debug").
    pub rust_log: String,
    /// Base URL used when minting webinar links (`<base>/w/<roomId>?wt=...`).
    pub public_base_url: String,
    /// HMAC key for auth tokens, webinar links, and invite-code hashing.
    pub token_secret: Vec<u8>,
    /// ICE servers handed to joining clients. Process-global, never per-room.
    pub ice_servers: Vec<IceServerConfig>,
    /// How long a disconnected client keeps its seat before finalization.
    pub disconnect_grace_ms: u64,
    /// How long a room without admins survives before cleanup re-checks it.
    pub empty_room_grace_ms: u64,
    /// Participant count at which rooms downgrade to low video quality.
    pub quality_cliff: usize,
    /// Seat quota applied to webinars that don't configure their own.
    pub webinar_max_attendees: usize,
    /// Per-client policy table; lookups fall back to the `"default"` entry.
    pub policies: HashMap<String, Policy>,
}

/// One ICE server entry: URLs plus optional long-term credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    MissingVariable(String),
    #[error("{0} must be a valid port number: {1}")]
    InvalidPort(String, ParseIntError),
    #[error("SIGNAL_PORT must be between 1 and 65535 (got {0})")]
    PortOutOfRange(u16),
    #[error("{0} must be a positive integer (got '{1}')")]
    InvalidInteger(String, String),
    #[error("POLICY_TABLE is not valid JSON: {0}")]
    InvalidPolicyTable(String),
}

const DEV_TOKEN_SECRET: &str = "huddle-dev-secret-do-not-deploy";

/// Validates environment variables and returns a Config object.
/// Returns an error if any required variable is missing or invalid.
pub fn validate_env() -> Result<Config, ConfigError> {
    // Required: SIGNAL_PORT (valid port number)
    let signal_port_str = env::var("SIGNAL_PORT")
        .map_err(|_| ConfigError::MissingVariable("SIGNAL_PORT".to_string()))?;

    let signal_port: u16 = signal_port_str
        .parse()
        .map_err(|e| ConfigError::InvalidPort("SIGNAL_PORT".to_string(), e))?;

    if signal_port == 0 {
        return Err(ConfigError::PortOutOfRange(signal_port));
    }

    // Optional: RUST_LOG (defaults to "info")
    let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| {
        eprintln!("RUST_LOG not set, using default: info");
        "info".to_string()
    });

    // Optional: METRICS_PORT (defaults to 3030)
    let metrics_port: u16 = env::var("METRICS_PORT")
        .unwrap_or_else(|_| "3030".to_string())
        .parse()
        .map_err(|e| ConfigError::InvalidPort("METRICS_PORT".to_string(), e))?;

    let public_base_url = env::var("PUBLIC_BASE_URL")
        .unwrap_or_else(|_| format!("http://localhost:{}", signal_port));

    let token_secret = match env::var("TOKEN_SECRET") {
        Ok(s) if !s.is_empty() => s.into_bytes(),
        _ => {
            warn!("TOKEN_SECRET not set, using development secret");
            DEV_TOKEN_SECRET.as_bytes().to_vec()
        }
    };

    let ice_servers = parse_ice_servers(&env::var("ICE_SERVERS").unwrap_or_default());

    let disconnect_grace_ms = parse_positive_int("DISCONNECT_GRACE_MS", 15_000)?;
    let empty_room_grace_ms = parse_positive_int("EMPTY_ROOM_GRACE_MS", 60_000)?;
    let quality_cliff = parse_positive_int("QUALITY_CLIFF", 8)? as usize;
    let webinar_max_attendees = parse_positive_int("WEBINAR_MAX_ATTENDEES", 100)? as usize;

    let policies = match env::var("POLICY_TABLE") {
        Ok(raw) if !raw.is_empty() => serde_json::from_str(&raw)
            .map_err(|e| ConfigError::InvalidPolicyTable(e.to_string()))?,
        _ => HashMap::new(),
    };

    Ok(Config {
        signal_port,
        metrics_port,
        rust_log,
        public_base_url,
        token_secret,
        ice_servers,
        disconnect_grace_ms,
        empty_room_grace_ms,
        quality_cliff,
        webinar_max_attendees,
        policies,
    })
}

fn parse_positive_int(var: &str, default: u64) -> Result<u64, ConfigError> {
    match env::var(var) {
        Ok(raw) => {
            let parsed: u64 = raw
                .parse()
                .map_err(|_| ConfigError::InvalidInteger(var.to_string(), raw.clone()))?;
            if parsed == 0 {
                return Err(ConfigError::InvalidInteger(var.to_string(), raw));
            }
            Ok(parsed)
        }
        Err(_) => Ok(default),
    }
}

/// Parses the `ICE_SERVERS` environment value.
///
/// Format: comma-separated entries, each `url[|username|credential]`.
/// Partial credentials and `turns:` URLs without credentials are served
/// anyway but logged as warnings.
pub fn parse_ice_servers(raw: &str) -> Vec<IceServerConfig> {
    let mut servers = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let mut fields = entry.split('|');
        let url = fields.next().unwrap_or_default().trim().to_string();
        if url.is_empty() {
            continue;
        }
        let username = fields
            .next()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let credential = fields
            .next()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        if username.is_some() != credential.is_some() {
            warn!(url = %url, "ICE server has partial credentials");
        }
        if url.starts_with("turns:") && (username.is_none() || credential.is_none()) {
            warn!(url = %url, "turns: ICE server configured without credentials");
        }

        servers.push(IceServerConfig {
            urls: vec![url],
            username,
            credential,
        });
    }

    if servers.is_empty() {
        servers.push(IceServerConfig {
            urls: vec!["stun:stun.l.google.com:19302".to_string()],
            username: None,
            credential: None,
        });
    }
    servers
}

impl Config {
    /// Config suitable for tests and the load simulator: no env access.
    pub fn for_tests() -> Self {
        Config {
            signal_port: 0,
            metrics_port: 0,
            rust_log: "info".to_string(),
            public_base_url: "http://localhost:0".to_string(),
            token_secret: DEV_TOKEN_SECRET.as_bytes().to_vec(),
            ice_servers: parse_ice_servers(""),
            disconnect_grace_ms: 15_000,
            empty_room_grace_ms: 60_000,
            quality_cliff: 8,
            webinar_max_attendees: 100,
            policies: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    lazy_static::lazy_static! {
        static ref ENV_MUTEX: Mutex<()> = Mutex::new(());
    }

    // Helper to set up and tear down environment variables for tests
    struct EnvGuard<'a> {
        vars: Vec<String>,
        _guard: std::sync::MutexGuard<'a, ()>,
    }

    impl<'a> EnvGuard<'a> {
        fn new() -> Self {
            let guard = ENV_MUTEX.lock().unwrap();
            EnvGuard {
                vars: Vec::new(),
                _guard: guard,
            }
        }

        fn set(&mut self, key: &str, value: &str) {
            env::set_var(key, value);
            self.vars.push(key.to_string());
        }

        fn unset(&mut self, key: &str) {
            env::remove_var(key);
            self.vars.push(key.to_string());
        }
    }

    impl<'a> Drop for EnvGuard<'a> {
        fn drop(&mut self) {
            for var in &self.vars {
                env::remove_var(var);
            }
        }
    }

    #[test]
    fn test_validate_env_valid_configuration() {
        let mut guard = EnvGuard::new();
        guard.set("SIGNAL_PORT", "8443");
        guard.set("RUST_LOG", "debug");

        let config = validate_env().expect("Expected valid configuration");
        assert_eq!(config.signal_port, 8443);
        assert_eq!(config.rust_log, "debug");
        assert_eq!(config.disconnect_grace_ms, 15_000);
    }

    #[test]
    fn test_validate_env_missing_signal_port() {
        let mut guard = EnvGuard::new();
        guard.unset("SIGNAL_PORT");

        let result = validate_env();
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::MissingVariable(_)));
        assert!(err.to_string().contains("SIGNAL_PORT is required"));
    }

    #[test]
    fn test_validate_env_port_out_of_range() {
        let mut guard = EnvGuard::new();
        guard.set("SIGNAL_PORT", "0");

        let result = validate_env();
        assert!(matches!(result, Err(ConfigError::PortOutOfRange(0))));
    }

    #[test]
    fn test_validate_env_invalid_grace() {
        let mut guard = EnvGuard::new();
        guard.set("SIGNAL_PORT", "8443");
        guard.set("DISCONNECT_GRACE_MS", "soon");

        let result = validate_env();
        assert!(matches!(result, Err(ConfigError::InvalidInteger(_, _))));
    }

    #[test]
    fn test_validate_env_policy_table() {
        let mut guard = EnvGuard::new();
        guard.set("SIGNAL_PORT", "8443");
        guard.set(
            "POLICY_TABLE",
            r#"{"default":{"allowNonHostRoomCreation":true,"allowHostJoin":true,"allowDisplayNameUpdate":true,"useWaitingRoom":false}}"#,
        );

        let config = validate_env().expect("Expected valid configuration");
        assert!(config.policies.contains_key("default"));
        assert!(config.policies["default"].allow_host_join);
    }

    #[test]
    fn test_parse_ice_servers_with_credentials() {
        let servers =
            parse_ice_servers("stun:stun.example.org:3478,turn:turn.example.org:3478|alice|s3cret");
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].urls, vec!["stun:stun.example.org:3478"]);
        assert!(servers[0].username.is_none());
        assert_eq!(servers[1].username.as_deref(), Some("alice"));
        assert_eq!(servers[1].credential.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_parse_ice_servers_defaults_to_public_stun() {
        let servers = parse_ice_servers("");
        assert_eq!(servers.len(), 1);
        assert!(servers[0].urls[0].starts_with("stun:"));
    }

    #[test]
    fn test_parse_ice_servers_partial_credentials_kept() {
        // Partial credentials warn but the entry is still served.
        let servers = parse_ice_servers("turns:turn.example.org:5349|alice");
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].username.as_deref(), Some("alice"));
        assert!(servers[0].credential.is_none());
    }
}

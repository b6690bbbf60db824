//! Runtime configuration for the rendezvous server and peer sessions.
//!
//! Both structs deserialize from JSON with every field optional; missing
//! fields take the defaults below.

use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rendezvous::{DEFAULT_RENDEZVOUS_PORT, RoomId};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Load a config struct from a JSON file
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendezvousConfig {
    /// Address the WebSocket listener binds to
    pub bind: String,
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
}

impl Default for RendezvousConfig {
    fn default() -> Self {
        Self {
            bind: format!("0.0.0.0:{}", DEFAULT_RENDEZVOUS_PORT),
            ping_interval_secs: 30,
            pong_timeout_secs: 10,
        }
    }
}

impl RendezvousConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base WebSocket URL of the rendezvous service, e.g. `ws://host:11111`
    pub rendezvous_url: String,
    pub room: RoomId,
    /// Host the direct-connection listener binds to
    pub bind_host: String,
    /// 0 picks an ephemeral port
    pub bind_port: u16,
    /// Host announced to the peer; defaults to `bind_host`
    pub advertise_host: Option<String>,
    /// Gives up on rendezvous + connect after this long; `None` waits forever
    pub handshake_timeout_ms: Option<u64>,
    pub read_buffer_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rendezvous_url: format!("ws://localhost:{}", DEFAULT_RENDEZVOUS_PORT),
            room: RoomId::default(),
            bind_host: "localhost".to_string(),
            bind_port: 0,
            advertise_host: None,
            handshake_timeout_ms: None,
            read_buffer_size: 2048,
        }
    }
}

impl SessionConfig {
    pub fn advertised_host(&self) -> &str {
        self.advertise_host.as_deref().unwrap_or(&self.bind_host)
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_ms.map(Duration::from_millis)
    }

    /// Full WebSocket URL registering for the configured room
    pub fn link_url(&self) -> String {
        format!(
            "{}{}",
            self.rendezvous_url.trim_end_matches('/'),
            self.room.path()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.bind_host, "localhost");
        assert_eq!(config.bind_port, 0);
        assert_eq!(config.read_buffer_size, 2048);
        assert_eq!(config.handshake_timeout(), None);
        assert_eq!(config.advertised_host(), "localhost");
    }

    #[test]
    fn link_url_encodes_fixed_width_room() {
        let config = SessionConfig {
            rendezvous_url: "ws://relay.example:11111/".to_string(),
            room: RoomId::new(42).unwrap(),
            ..SessionConfig::default()
        };
        assert_eq!(config.link_url(), "ws://relay.example:11111/link/00042");
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"room": 12, "advertise_host": "192.0.2.1", "handshake_timeout_ms": 1500}"#)
                .unwrap();
        assert_eq!(config.room.get(), 12);
        assert_eq!(config.advertised_host(), "192.0.2.1");
        assert_eq!(config.handshake_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.bind_host, "localhost");
    }

    #[test]
    fn rendezvous_defaults_and_overrides() {
        let config = RendezvousConfig::default();
        assert_eq!(config.bind, "0.0.0.0:11111");
        assert_eq!(config.ping_interval(), Duration::from_secs(30));

        let config: RendezvousConfig = serde_json::from_str(r#"{"pong_timeout_secs": 3}"#).unwrap();
        assert_eq!(config.pong_timeout(), Duration::from_secs(3));
        assert_eq!(config.ping_interval_secs, 30);
    }

    #[test]
    fn load_json_reports_missing_file() {
        let result = load_json::<SessionConfig>("/nonexistent/linkrelay.json");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}

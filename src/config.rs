use std::time::Duration;

/// Configuration for a [`crate::MeshClient`].
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Websocket URL of the rendezvous (signaling) service.
    pub signaling_url: String,
    /// Options for the signaling socket itself.
    pub socket: SocketOptions,
    /// STUN/TURN servers handed to the transport engine. May be empty.
    pub ice_servers: Vec<IceServerConfig>,
    /// How long a start attempt may take before the session is force-stopped
    /// and `StartFailed` is emitted.
    pub start_timeout: Duration,
    /// How long to wait for ICE candidate gathering to complete before the
    /// local SDP is sent with whatever candidates were collected.
    pub vanilla_ice_timeout: Duration,
}

impl PeerConfig {
    pub fn new(signaling_url: impl Into<String>) -> Self {
        Self {
            signaling_url: signaling_url.into(),
            socket: SocketOptions::default(),
            ice_servers: Vec::new(),
            start_timeout: Duration::from_secs(15),
            vanilla_ice_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_socket_options(mut self, socket: SocketOptions) -> Self {
        self.socket = socket;
        self
    }

    pub fn with_ice_servers(mut self, ice_servers: Vec<IceServerConfig>) -> Self {
        self.ice_servers = ice_servers;
        self
    }

    pub fn with_start_timeout(mut self, start_timeout: Duration) -> Self {
        self.start_timeout = start_timeout;
        self
    }

    pub fn with_vanilla_ice_timeout(mut self, vanilla_ice_timeout: Duration) -> Self {
        self.vanilla_ice_timeout = vanilla_ice_timeout;
        self
    }
}

/// Options for the signaling socket connection.
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Upper bound on a single connect attempt.
    pub connection_timeout: Duration,
    /// Whether a dead signaling connection may be replaced on demand. When
    /// disabled, sending over a dropped socket fails instead of reconnecting.
    pub reconnection: bool,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            reconnection: true,
        }
    }
}

/// A single STUN or TURN server entry.
#[derive(Debug, Clone)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

impl IceServerConfig {
    pub fn new(urls: Vec<String>) -> Self {
        Self {
            urls,
            username: String::new(),
            credential: String::new(),
        }
    }

    pub fn with_credentials(
        urls: Vec<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            urls,
            username: username.into(),
            credential: credential.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = PeerConfig::new("ws://127.0.0.1:9000");
        assert!(config.ice_servers.is_empty());
        assert_eq!(config.start_timeout, Duration::from_secs(15));
        assert_eq!(config.vanilla_ice_timeout, Duration::from_secs(5));
        assert!(config.socket.reconnection);
    }

    #[test]
    fn builder_overrides() {
        let config = PeerConfig::new("ws://127.0.0.1:9000")
            .with_start_timeout(Duration::from_millis(200))
            .with_ice_servers(vec![IceServerConfig::with_credentials(
                vec!["turn:turn.example.com:3478".into()],
                "user",
                "pass",
            )]);
        assert_eq!(config.start_timeout, Duration::from_millis(200));
        assert_eq!(config.ice_servers[0].username, "user");
    }
}

use std::sync::Arc;
use std::time::Duration;

use rustls::ServerConfig as RustlsConfig;

use crate::extensions::Extensions;

/// How a connection resolves the peer's requested `context_takeover` for
/// one direction (client-compresses or server-compresses) of
/// `permessage-deflate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeflatePolicy {
    /// Always request `no_context_takeover`, regardless of what the peer asked for.
    ForceDisabled,
    /// Always allow context takeover, ignoring a peer's `no_context_takeover` request.
    ForceEnabled,
    /// Honor whatever the peer's handshake negotiates.
    #[default]
    Allowed,
}

impl DeflatePolicy {
    /// Resolves this policy against what the peer asked for in the
    /// handshake, producing the final `no_context_takeover` value.
    pub fn resolve(self, peer_requested_no_context_takeover: bool) -> bool {
        match self {
            DeflatePolicy::ForceDisabled => true,
            DeflatePolicy::ForceEnabled => false,
            DeflatePolicy::Allowed => peer_requested_no_context_takeover,
        }
    }
}

/// Negotiation policy for both directions of `permessage-deflate`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeflateConfig {
    pub server_context_takeover: DeflatePolicy,
    pub client_context_takeover: DeflatePolicy,
}

#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    pub web_socket_config: Option<WebSocketConfig>,
    pub tls_config: Option<Arc<RustlsConfig>>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub web_socket_config: WebSocketConfig,
    pub ca_file: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub max_frame_size: Option<usize>,
    pub max_message_size: Option<usize>,
    /// `Duration::ZERO` disables keep-alive pings.
    pub keep_alive_interval: Duration,
    /// Include the triggering error's text in the Close reason when an
    /// internal error forces the connection closed.
    pub include_exception_in_close_response: bool,
    /// Client's preferred sub-protocol to offer, or the server's set of
    /// accepted sub-protocols (comma-joined) to select from.
    pub sub_protocol: Option<String>,
    pub allow_per_message_deflate: bool,
    pub deflate_policy: DeflateConfig,
    /// Extra extension state threaded through after handshake negotiation;
    /// populated by the handshake, not meant to be set by callers directly.
    pub extensions: Option<Extensions>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketConfig {
            max_message_size: Some(64 << 20),
            max_frame_size: Some(16 << 20),
            keep_alive_interval: Duration::ZERO,
            include_exception_in_close_response: false,
            sub_protocol: None,
            allow_per_message_deflate: false,
            deflate_policy: DeflateConfig::default(),
            extensions: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deflate_policy_resolves_correctly() {
        assert!(DeflatePolicy::ForceDisabled.resolve(false));
        assert!(!DeflatePolicy::ForceEnabled.resolve(true));
        assert!(DeflatePolicy::Allowed.resolve(true));
        assert!(!DeflatePolicy::Allowed.resolve(false));
    }

    #[test]
    fn default_config_has_keep_alive_disabled() {
        let config = WebSocketConfig::default();
        assert_eq!(config.keep_alive_interval, Duration::ZERO);
    }
}

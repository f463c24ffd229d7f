//! Server configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

/// Default TCP port for the tandem server.
pub const DEFAULT_PORT: u16 = 4042;

/// Default bind address (localhost only; put a real ingress in front of
/// this for anything beyond local development).
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

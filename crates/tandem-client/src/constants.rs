//! Client configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Default server host for local development.
pub const DEFAULT_HOST: &str = "localhost";

/// Default server port.
pub const DEFAULT_PORT: u16 = 4042;

/// Delay before retrying a push after a transport failure.
pub const PUSH_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Base delay before re-establishing a failed pull connection.
pub const PULL_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Maximum jitter added to retry delays. Spreads out reconnect attempts so
/// many agents losing the same server don't redial in lockstep.
pub const RETRY_JITTER_MS: u64 = 250;

//! Default configuration values.
//!
//! Centralized default constants for use across all crates.

// ============================================================================
// Rule Engine Defaults
// ============================================================================

/// Period between rule-file modification checks.
pub const DEFAULT_RULE_RELOAD_SECS: u64 = 5;
/// Delay before the first remote rule/block-list fetch after boot.
pub const DEFAULT_FETCH_DELAY_SECS: u64 = 5;
/// Period between remote rule/block-list re-fetches.
pub const DEFAULT_FETCH_INTERVAL_SECS: u64 = 3600;
/// HTTP timeout for remote rule fetches.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Relay Defaults
// ============================================================================

/// Capacity of a session's inbound event queue.
pub const DEFAULT_SESSION_QUEUE: usize = 4096;
/// Read-loop buffer size for origin sockets (8 KiB).
pub const DEFAULT_READ_CHUNK: usize = 8 * 1024;
/// Long-poll drain window in milliseconds.
pub const DEFAULT_POLL_WINDOW_MS: u64 = 100;
/// Long-poll response budget in bytes (16 KiB).
pub const DEFAULT_POLL_BUDGET: usize = 16 * 1024;
/// Default relay listen address.
pub const DEFAULT_RELAY_LISTEN: &str = "0.0.0.0:48101";

// ============================================================================
// Agent Defaults
// ============================================================================

/// Default local proxy port.
pub const DEFAULT_PROXY_PORT: u16 = 48100;
/// Default `PROXY` string target embedded in generated PAC scripts.
pub const DEFAULT_PAC_PROXY: &str = "127.0.0.1:48100";
/// Default transport name when the configuration does not pick one.
pub const DEFAULT_TRANSPORT: &str = "GAE";

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stateful session tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Events retained per session for replay. Oldest entries are evicted
    /// first once the cap is reached; a client resuming from an evicted
    /// sequence id receives only what is still retained.
    #[serde(default = "d_max_events")]
    pub max_events: usize,
    /// Capacity of the live channel feeding an attached stream. A consumer
    /// that falls this far behind is detached and must resume.
    #[serde(default = "d_stream_buffer")]
    pub stream_buffer: usize,
    /// Interval between SSE keep-alive comments.
    #[serde(default = "d_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_events: d_max_events(),
            stream_buffer: d_stream_buffer(),
            keep_alive_secs: d_keep_alive_secs(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shutdown
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    /// Bound on closing a single session during the shutdown sweep.
    #[serde(default = "d_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            close_timeout_ms: d_close_timeout_ms(),
        }
    }
}

fn d_max_events() -> usize {
    1024
}
fn d_stream_buffer() -> usize {
    256
}
fn d_keep_alive_secs() -> u64 {
    15
}
fn d_close_timeout_ms() -> u64 {
    5000
}

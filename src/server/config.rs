// ABOUTME: Server configuration
// ABOUTME: Defines configurable parameters for the broadcast server and quiz helper

use crate::audio::{BLOCK_SIZE, CHANNELS, SAMPLE_RATE};
use crate::vocab::LlmConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Capture format.
///
/// Fixed at process start; the defaults are the only format clients expect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Channel count delivered to clients
    pub channels: u16,
    /// Samples per block
    pub block_size: usize,
}

impl CaptureConfig {
    /// Duration of one block
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs_f64(self.block_size as f64 / self.sample_rate as f64)
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: CHANNELS,
            block_size: BLOCK_SIZE,
        }
    }
}

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// WebSocket endpoint path
    pub ws_path: String,
    /// Capture format
    pub capture: CaptureConfig,
    /// Frames a client may fall behind before it is dropped
    pub sink_queue_frames: usize,
    /// Upper bound for a single WebSocket send in milliseconds
    pub send_timeout_ms: u64,
    /// Delay before reopening a failed capture device
    pub restart_backoff: Duration,
    /// JSON file holding quiz error counts
    pub history_file: PathBuf,
    /// Language-model endpoint for sentence analysis
    pub llm: LlmConfig,
}

impl ServerConfig {
    /// Create a configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Set the WebSocket path
    pub fn ws_path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = path.into();
        self
    }

    /// Set the per-client queue depth in frames
    pub fn sink_queue_frames(mut self, frames: usize) -> Self {
        self.sink_queue_frames = frames.max(1);
        self
    }

    /// Set the WebSocket send timeout in milliseconds
    pub fn send_timeout_ms(mut self, ms: u64) -> Self {
        self.send_timeout_ms = ms;
        self
    }

    /// Set the capture restart backoff
    pub fn restart_backoff(mut self, backoff: Duration) -> Self {
        self.restart_backoff = backoff;
        self
    }

    /// Set the quiz history file
    pub fn history_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.history_file = path.into();
        self
    }

    /// Set the language-model configuration
    pub fn llm(mut self, llm: LlmConfig) -> Self {
        self.llm = llm;
        self
    }

    /// WebSocket send timeout
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            ws_path: "/audio".to_string(),
            capture: CaptureConfig::default(),
            sink_queue_frames: 8,
            send_timeout_ms: 250,
            restart_backoff: Duration::from_secs(5),
            history_file: PathBuf::from("langchain_history.json"),
            llm: LlmConfig::default(),
        }
    }
}

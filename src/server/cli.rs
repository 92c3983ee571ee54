// ABOUTME: Shared CLI argument parsing and server builder utilities
// ABOUTME: Turns command-line flags into a ServerConfig and capture backend

use crate::server::{CaptureBackend, CpalBackend, ServerConfig, ToneBackend};
use crate::vocab::LlmConfig;
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Server arguments
///
/// Use with `#[command(flatten)]` in your binary's Args struct:
/// ```ignore
/// #[derive(Parser)]
/// struct MyArgs {
///     #[command(flatten)]
///     server: ServerArgs,
/// }
/// ```
#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Address to bind the server to
    #[arg(short, long, default_value = "0.0.0.0:5000")]
    pub bind: SocketAddr,

    /// WebSocket endpoint path
    #[arg(long, default_value = "/audio")]
    pub path: String,

    /// Input device name (default: system default input)
    #[arg(short, long, conflicts_with = "tone")]
    pub device: Option<String>,

    /// Broadcast a synthetic tone at this frequency in Hz instead of the microphone (0 for silence)
    #[arg(long)]
    pub tone: Option<f64>,

    /// Test tone amplitude from 0.0 to 1.0
    #[arg(long, default_value = "0.5", requires = "tone")]
    pub tone_amplitude: f64,

    /// Frames a client may fall behind before it is dropped
    #[arg(long, default_value = "8")]
    pub queue_frames: usize,

    /// Maximum time for a single WebSocket send in milliseconds
    #[arg(long, default_value = "250")]
    pub send_timeout_ms: u64,

    /// Seconds to wait before reopening a failed capture device
    #[arg(long, default_value = "5")]
    pub restart_backoff_secs: u64,

    /// Quiz history file
    #[arg(long, default_value = "langchain_history.json")]
    pub history_file: PathBuf,

    /// Base URL of the OpenAI-compatible language-model API
    #[arg(long, default_value = "https://api.siliconflow.cn/v1")]
    pub llm_base_url: String,

    /// Language model used for sentence analysis
    #[arg(long, default_value = "deepseek-ai/DeepSeek-V3")]
    pub llm_model: String,

    /// API key for the language model
    #[arg(long, env = "SILICONFLOW_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl ServerArgs {
    /// Default log filter when `RUST_LOG` is unset
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "lingocast=debug"
        } else {
            "lingocast=info"
        }
    }

    /// Initialize tracing based on verbosity flag
    pub fn init_tracing(&self) {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

        let filter = self.log_filter();

        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| filter.into()),
            )
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    /// Log startup information
    pub fn log_startup_info(&self) {
        tracing::info!("Lingocast Server v{}", env!("CARGO_PKG_VERSION"));
        tracing::info!("Bind: {}", self.bind);
        tracing::info!("Endpoint: ws://{}{}", self.bind, self.path);
        if self.api_key.is_none() {
            tracing::warn!("SILICONFLOW_API_KEY not set; sentence analysis is disabled");
        }
    }

    /// Create the capture backend (tone if requested, otherwise the microphone)
    pub fn create_backend(&self) -> Box<dyn CaptureBackend> {
        match (self.tone, &self.device) {
            (Some(frequency), _) => {
                if frequency > 0.0 {
                    tracing::info!("Audio: {} Hz test tone", frequency);
                } else {
                    tracing::info!("Audio: Silence");
                }
                Box::new(ToneBackend::new(frequency).with_amplitude(self.tone_amplitude))
            }
            (None, Some(device)) => {
                tracing::info!("Audio: Input device '{}'", device);
                Box::new(CpalBackend::with_device(device.clone()))
            }
            (None, None) => {
                tracing::info!("Audio: Default input device");
                Box::new(CpalBackend::new())
            }
        }
    }

    /// Build ServerConfig from these args
    pub fn build_config(&self) -> ServerConfig {
        ServerConfig::new()
            .bind_addr(self.bind)
            .ws_path(self.path.clone())
            .sink_queue_frames(self.queue_frames)
            .send_timeout_ms(self.send_timeout_ms)
            .restart_backoff(Duration::from_secs(self.restart_backoff_secs))
            .history_file(self.history_file.clone())
            .llm(LlmConfig {
                base_url: self.llm_base_url.clone(),
                model: self.llm_model.clone(),
                api_key: self.api_key.clone(),
                ..LlmConfig::default()
            })
    }
}

// ABOUTME: Server module for lingocast
// ABOUTME: Capture, client registry, broadcast dispatch and the WebSocket server

mod audio_source;
mod capture;
pub mod cli;
mod clock;
mod config;
mod connection;
mod dispatcher;
mod registry;
mod server;
mod sink;

pub use audio_source::{CpalBackend, ToneBackend};
pub use capture::{
    CaptureBackend, CaptureError, CaptureFeed, CaptureHandle, FrameSource, ShutdownSignal,
};
pub use cli::ServerArgs;
pub use clock::{unix_now_secs, ServerClock};
pub use config::{CaptureConfig, ServerConfig};
pub use connection::{handle_connection, ConnectionState, DisconnectReason, WriterExit};
pub use dispatcher::{BroadcastDispatcher, BroadcastReport, DispatchStats};
pub use registry::ClientRegistry;
pub use server::{AppState, LingocastServer};
pub use sink::{ChannelSink, Sink, SinkError, SinkId};

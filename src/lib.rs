// ABOUTME: Main library entry point for lingocast
// ABOUTME: Exports the live audio broadcast server and the vocabulary quiz helpers

//! # lingocast
//!
//! Captures live microphone audio and fans it out to any number of browser
//! clients over a persistent WebSocket connection with minimal latency.
//!
//! Every captured block of 2048 mono 16-bit samples at 44.1 kHz is stamped with
//! the wall-clock time it was delivered, encoded once into a compact binary
//! frame and pushed to every connected client. Slow or dead clients are
//! dropped rather than buffered, and the capture device is restarted forever
//! if it fails.
//!
//! A small vocabulary-quiz helper shares the process: it asks a hosted
//! language model to turn a sentence into a quiz and keeps per-word error
//! counts in a JSON log.
//!
//! ## Example: Running a Server
//!
//! ```no_run
//! use lingocast::server::{LingocastServer, ServerConfig, ToneBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ServerConfig::new()
//!         .bind_addr("0.0.0.0:5000".parse().unwrap());
//!
//!     let server = LingocastServer::with_config(config)
//!         .with_backend(Box::new(ToneBackend::new(440.0)));
//!
//!     server.run().await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

/// Captured audio types and fixed capture parameters
pub mod audio;
/// Latency probe client for the broadcast endpoint
pub mod probe;
/// Binary wire format for broadcast frames
pub mod protocol;
/// Broadcast server: capture, registry, dispatch and connection handling
pub mod server;
/// Vocabulary analysis and quiz history
pub mod vocab;

pub use audio::AudioBlock;
pub use server::{LingocastServer, ServerConfig};

/// Result type for lingocast operations
pub type Result<T> = std::result::Result<T, error::Error>;

/// Error types for lingocast
pub mod error {
    use thiserror::Error;

    /// Error types for lingocast operations
    #[derive(Error, Debug)]
    pub enum Error {
        /// I/O error (socket bind, file access)
        #[error("I/O error: {0}")]
        Io(#[from] std::io::Error),

        /// WebSocket-related error
        #[error("WebSocket error: {0}")]
        WebSocket(String),

        /// Invalid configuration
        #[error("Configuration error: {0}")]
        Config(String),
    }
}

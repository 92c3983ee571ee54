// ABOUTME: Main lingocast server implementation
// ABOUTME: Starts capture once, then serves the broadcast WebSocket and the quiz API

use crate::error::Error;
use crate::server::audio_source::CpalBackend;
use crate::server::capture::{CaptureBackend, CaptureHandle, FrameSource};
use crate::server::clock::ServerClock;
use crate::server::config::ServerConfig;
use crate::server::connection::handle_connection;
use crate::server::dispatcher::BroadcastDispatcher;
use crate::server::registry::ClientRegistry;
use crate::vocab::{AnalyzeError, Analyzer, LlmAnalyzer, QuizHistory, QuizSubmission};
use axum::{
    extract::ws::WebSocketUpgrade,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{any, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<ServerConfig>,
    /// Live sinks
    pub registry: Arc<ClientRegistry>,
    /// Sentence analyzer
    pub analyzer: Arc<dyn Analyzer>,
    /// Quiz history
    pub history: Arc<Mutex<QuizHistory>>,
}

/// Lingocast server
pub struct LingocastServer {
    /// Server configuration
    config: Arc<ServerConfig>,
    /// Client registry
    registry: Arc<ClientRegistry>,
    /// Broadcast dispatcher fed by the capture thread
    dispatcher: Arc<BroadcastDispatcher>,
    /// Clock used to stamp blocks
    clock: ServerClock,
    /// Capture backend, consumed when capture starts
    backend: Option<Box<dyn CaptureBackend>>,
    /// Sentence analyzer
    analyzer: Option<Arc<dyn Analyzer>>,
    /// Set once capture has been started
    capture_started: bool,
}

impl LingocastServer {
    /// Create a new server with default configuration
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    /// Create a new server with custom configuration
    pub fn with_config(config: ServerConfig) -> Self {
        let registry = Arc::new(ClientRegistry::new());
        Self {
            config: Arc::new(config),
            dispatcher: Arc::new(BroadcastDispatcher::new(registry.clone())),
            registry,
            clock: ServerClock::new(),
            backend: None,
            analyzer: None,
            capture_started: false,
        }
    }

    /// Set the capture backend (defaults to the system microphone)
    pub fn with_backend(mut self, backend: Box<dyn CaptureBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Set the clock used to stamp blocks
    pub fn with_clock(mut self, clock: ServerClock) -> Self {
        self.clock = clock;
        self
    }

    /// Set the sentence analyzer (defaults to the configured language model)
    pub fn with_analyzer(mut self, analyzer: Arc<dyn Analyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the client registry
    pub fn registry(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.registry)
    }

    /// Get the broadcast dispatcher
    pub fn dispatcher(&self) -> Arc<BroadcastDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    /// Start the capture thread. Call once per process.
    pub fn start_capture(&mut self) -> crate::Result<CaptureHandle> {
        if self.capture_started {
            return Err(Error::Config("capture already started".to_string()));
        }
        let backend = self
            .backend
            .take()
            .unwrap_or_else(|| Box::new(CpalBackend::new()));

        let handle = FrameSource::new(backend, self.config.capture)
            .with_backoff(self.config.restart_backoff)
            .with_clock(self.clock.clone())
            .start(self.dispatcher.clone())?;
        self.capture_started = true;
        Ok(handle)
    }

    /// Build the HTTP router
    pub fn router(&self) -> Router {
        let analyzer = self
            .analyzer
            .clone()
            .unwrap_or_else(|| Arc::new(LlmAnalyzer::new(self.config.llm.clone())));

        let history = QuizHistory::load(&self.config.history_file);
        log::info!(
            "Quiz history: {} ({} entries)",
            history.path().display(),
            history.entries().len()
        );

        let state = AppState {
            config: self.config.clone(),
            registry: self.registry.clone(),
            analyzer,
            history: Arc::new(Mutex::new(history)),
        };

        Router::new()
            .route(&self.config.ws_path, any(ws_handler))
            .route("/api/analyze", post(analyze_handler))
            .route("/api/quiz", post(submit_quiz_handler))
            .route("/api/history", post(word_history_handler))
            .with_state(state)
    }

    /// Run the server on the configured address until Ctrl-C
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;

        // Setup graceful shutdown
        let shutdown_signal = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to listen for Ctrl-C");
            log::info!("Received shutdown signal");
        };

        self.serve(listener, shutdown_signal).await
    }

    /// Start capture and serve on `listener` until `shutdown` completes
    pub async fn serve<F>(
        mut self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Capture runs regardless of whether anyone is listening
        let capture = self.start_capture()?;

        let app = self.router();
        log::info!(
            "Lingocast server listening on {} (endpoint: {})",
            listener.local_addr()?,
            self.config.ws_path
        );

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        // Shutdown capture
        if tokio::task::spawn_blocking(move || capture.stop()).await.is_err() {
            log::error!("Failed to join capture thread");
        }

        result?;
        log::info!("Server shutdown complete");
        Ok(())
    }
}

impl Default for LingocastServer {
    fn default() -> Self {
        Self::new()
    }
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state.registry, state.config))
}

#[derive(Debug, Deserialize)]
struct AnalyzeRequest {
    sentence: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn analyze_status(err: &AnalyzeError) -> StatusCode {
    match err {
        AnalyzeError::MissingCredentials => StatusCode::SERVICE_UNAVAILABLE,
        AnalyzeError::Upstream(_) | AnalyzeError::MalformedOutput(_) => StatusCode::BAD_GATEWAY,
    }
}

/// `POST /api/analyze {"sentence": ...}`
async fn analyze_handler(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Response {
    let analyzer = state.analyzer.clone();
    let outcome = tokio::task::spawn_blocking(move || analyzer.analyze(&request.sentence)).await;

    match outcome {
        Ok(Ok(result)) => Json(result).into_response(),
        Ok(Err(e)) => {
            log::warn!("Sentence analysis failed: {}", e);
            error_response(analyze_status(&e), e.to_string())
        }
        Err(e) => {
            log::error!("Analysis task failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "analysis task failed")
        }
    }
}

/// `POST /api/quiz` with a [`QuizSubmission`] body
async fn submit_quiz_handler(
    State(state): State<AppState>,
    Json(submission): Json<QuizSubmission>,
) -> Response {
    let history = state.history.clone();
    let outcome = tokio::task::spawn_blocking(move || history.lock().submit(submission)).await;

    match outcome {
        Ok(Ok(outcome)) => Json(outcome).into_response(),
        Ok(Err(e)) => {
            log::warn!("Failed to save quiz history: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => {
            log::error!("Quiz task failed: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "quiz task failed")
        }
    }
}

#[derive(Debug, Deserialize)]
struct WordHistoryRequest {
    words: Vec<String>,
}

/// `POST /api/history {"words": [...]}`: earlier sightings of each word
async fn word_history_handler(
    State(state): State<AppState>,
    Json(request): Json<WordHistoryRequest>,
) -> Response {
    let matches = state.history.lock().find_word_history(&request.words);
    Json(matches).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::audio_source::ToneBackend;

    #[test]
    fn test_capture_starts_once() {
        let mut server = LingocastServer::new().with_backend(Box::new(ToneBackend::silence()));

        let handle = server.start_capture().unwrap();
        assert!(matches!(server.start_capture(), Err(Error::Config(_))));
        handle.stop();
    }

    #[test]
    fn test_analyze_status_mapping() {
        assert_eq!(
            analyze_status(&AnalyzeError::MissingCredentials),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            analyze_status(&AnalyzeError::MalformedOutput("x".into())),
            StatusCode::BAD_GATEWAY
        );
    }
}

// ABOUTME: End-to-end broadcast tests
// ABOUTME: Runs the server on a loopback port and talks to it over real WebSockets

use futures_util::{SinkExt, StreamExt};
use lingocast::protocol::decode_frame;
use lingocast::server::{
    CaptureBackend, CaptureConfig, CaptureError, CaptureFeed, ClientRegistry, LingocastServer,
    ServerClock, ServerConfig, ShutdownSignal, Sink, ToneBackend,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;

type ServerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

struct TestServer {
    addr: SocketAddr,
    registry: Arc<ClientRegistry>,
    shutdown: oneshot::Sender<()>,
    task: tokio::task::JoinHandle<ServerResult>,
}

impl TestServer {
    async fn start(server: LingocastServer) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let registry = server.registry();
        let (shutdown, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(server.serve(listener, async move {
            let _ = rx.await;
        }));

        Self {
            addr,
            registry,
            shutdown,
            task,
        }
    }

    fn ws_url(&self) -> String {
        format!("ws://{}/audio", self.addr)
    }

    async fn stop(self) {
        let _ = self.shutdown.send(());
        let result = tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("server did not shut down");
        result.unwrap().unwrap();
    }
}

fn test_config(history: &std::path::Path) -> ServerConfig {
    ServerConfig::new()
        .restart_backoff(Duration::from_millis(100))
        .history_file(history)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn next_binary<S>(read: &mut S) -> Vec<u8>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match read.next().await {
                Some(Ok(Message::Binary(data))) => return data.to_vec(),
                Some(Ok(_)) => continue,
                other => panic!("unexpected stream item: {:?}", other),
            }
        }
    })
    .await
    .expect("no frame received")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_frame_carries_fixed_timestamp() {
    let dir = tempfile::TempDir::new().unwrap();
    const T: f64 = 1_700_000_000.25;

    let server = LingocastServer::with_config(test_config(&dir.path().join("h.json")))
        .with_backend(Box::new(ToneBackend::silence()))
        .with_clock(ServerClock::fixed(T));
    let server = TestServer::start(server).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url()).await.unwrap();

    let frame = next_binary(&mut ws).await;
    assert_eq!(frame.len(), 8 + 4096);
    let (timestamp, samples) = decode_frame(&frame).unwrap();
    assert_eq!(timestamp, T);
    assert_eq!(samples.len(), 2048);
    assert!(samples.iter().all(|&s| s == 0));

    drop(ws);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_every_client_receives_frames() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = LingocastServer::with_config(test_config(&dir.path().join("h.json")))
        .with_backend(Box::new(ToneBackend::new(440.0)));
    let server = TestServer::start(server).await;

    let mut readers = Vec::new();
    for _ in 0..3 {
        let (ws, _) = tokio_tungstenite::connect_async(server.ws_url()).await.unwrap();
        readers.push(ws);
    }
    let registry = server.registry.clone();
    wait_until(|| registry.len() == 3).await;

    for ws in &mut readers {
        let frame = next_binary(ws).await;
        assert_eq!(frame.len(), 8 + 4096);
    }

    drop(readers);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_message_ends_session() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = LingocastServer::with_config(test_config(&dir.path().join("h.json")))
        .with_backend(Box::new(ToneBackend::silence()));
    let server = TestServer::start(server).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url()).await.unwrap();
    let registry = server.registry.clone();
    wait_until(|| registry.len() == 1).await;

    ws.send(Message::Text("bye".into())).await.unwrap();
    wait_until(|| registry.is_empty()).await;

    // A fresh connection starts a new session
    let (ws2, _) = tokio_tungstenite::connect_async(server.ws_url()).await.unwrap();
    wait_until(|| registry.len() == 1).await;
    drop(ws2);
    wait_until(|| registry.is_empty()).await;

    drop(ws);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pruned_client_is_disconnected() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = LingocastServer::with_config(test_config(&dir.path().join("h.json")))
        .with_backend(Box::new(ToneBackend::silence()));
    let server = TestServer::start(server).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url()).await.unwrap();
    let registry = server.registry.clone();
    wait_until(|| registry.len() == 1).await;
    next_binary(&mut ws).await;

    // Same removal the dispatcher performs after a failed write
    let id = registry.snapshot()[0].id();
    assert!(registry.unregister(id));

    // Frames already queued may still arrive, then the server hangs up
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Binary(_))) | Some(Ok(Message::Ping(_))) => continue,
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(other)) => panic!("unexpected message: {:?}", other),
            }
        }
    })
    .await
    .expect("server kept the pruned connection open");

    assert!(registry.is_empty());
    server.stop().await;
}

/// Fails to open on the first attempt, then behaves like a silent tone
struct FlakyBackend {
    failed_once: bool,
    inner: ToneBackend,
}

impl CaptureBackend for FlakyBackend {
    fn name(&self) -> &str {
        "flaky"
    }

    fn run(
        &mut self,
        config: &CaptureConfig,
        feed: Arc<CaptureFeed>,
        shutdown: &ShutdownSignal,
    ) -> Result<(), CaptureError> {
        if !self.failed_once {
            self.failed_once = true;
            return Err(CaptureError::NoDevice);
        }
        self.inner.run(config, feed, shutdown)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_recovers_from_capture_open_failure() {
    let dir = tempfile::TempDir::new().unwrap();
    let backend = FlakyBackend {
        failed_once: false,
        inner: ToneBackend::silence(),
    };
    let server = LingocastServer::with_config(test_config(&dir.path().join("h.json")))
        .with_backend(Box::new(backend));
    let server = TestServer::start(server).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(server.ws_url()).await.unwrap();

    let frame = next_binary(&mut ws).await;
    assert_eq!(frame.len(), 8 + 4096);

    drop(ws);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_measured_latency_stays_low() {
    let dir = tempfile::TempDir::new().unwrap();
    let server = LingocastServer::with_config(test_config(&dir.path().join("h.json")))
        .with_backend(Box::new(ToneBackend::new(440.0)));
    let server = TestServer::start(server).await;

    let latencies = lingocast::probe::measure(&server.ws_url(), Duration::from_millis(600))
        .await
        .unwrap();

    let stats = lingocast::probe::LatencyStats::from_samples(&latencies).expect("no frames");
    assert!(stats.count >= 3, "only {} frames", stats.count);
    assert!(stats.mean < 0.7, "mean latency {}", stats.mean);

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_quiz_endpoints() {
    let dir = tempfile::TempDir::new().unwrap();
    let history = dir.path().join("history.json");
    let server = LingocastServer::with_config(test_config(&history))
        .with_backend(Box::new(ToneBackend::silence()));
    let server = TestServer::start(server).await;
    let base = format!("http://{}", server.addr);

    let (analyze, quiz, found) = tokio::task::spawn_blocking(move || {
        let analyze = match ureq::post(&format!("{}/api/analyze", base))
            .send_json(serde_json::json!({ "sentence": "Submit it for reimbursement." }))
        {
            Err(ureq::Error::Status(code, response)) => {
                (code, response.into_json::<serde_json::Value>().unwrap())
            }
            other => panic!("expected an error status, got {:?}", other.map(|r| r.status())),
        };

        let quiz: serde_json::Value = ureq::post(&format!("{}/api/quiz", base))
            .send_json(serde_json::json!({
                "sentence": "Submit it for reimbursement.",
                "source": "Friends",
                "results": [
                    { "word": "reimbursement", "is_correct": false },
                    { "word": "submit", "is_correct": true }
                ]
            }))
            .unwrap()
            .into_json()
            .unwrap();

        let found: serde_json::Value = ureq::post(&format!("{}/api/history", base))
            .send_json(serde_json::json!({ "words": ["Reimbursement", "submit"] }))
            .unwrap()
            .into_json()
            .unwrap();

        (analyze, quiz, found)
    })
    .await
    .unwrap();

    // No API key configured
    assert_eq!(analyze.0, 503);
    assert!(analyze.1["error"].as_str().unwrap().contains("API Key"));

    assert_eq!(quiz["status"], "success");
    assert_eq!(quiz["saved_entry"]["vocabulary"]["reimbursement"], 1);
    assert!(history.exists());

    // Only the missed word has earlier sightings
    let sightings = found["Reimbursement"].as_array().unwrap();
    assert_eq!(sightings.len(), 1);
    assert_eq!(sightings[0]["source"], "Friends");
    assert!(found.get("submit").is_none());

    server.stop().await;
}

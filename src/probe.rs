// ABOUTME: Latency probe client
// ABOUTME: Connects to a broadcast endpoint and measures capture-to-receipt delay per frame

use crate::error::Error;
use crate::protocol::decode_frame;
use crate::server::unix_now_secs;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

/// Summary of measured latencies, in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    /// Frames measured
    pub count: usize,
    /// Mean latency
    pub mean: f64,
    /// Smallest latency
    pub min: f64,
    /// Largest latency
    pub max: f64,
}

impl LatencyStats {
    /// Summarize samples; `None` when there are none
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let sum: f64 = samples.iter().sum();
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            count: samples.len(),
            mean: sum / samples.len() as f64,
            min,
            max,
        })
    }
}

/// Listen on `url` for `duration` and return the latency of every frame
/// received (receipt time minus frame timestamp).
pub async fn measure(url: &str, duration: Duration) -> crate::Result<Vec<f64>> {
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| Error::WebSocket(e.to_string()))?;
    log::info!("Connected to {}", url);

    let (mut write, mut read) = ws.split();
    let mut latencies = Vec::new();
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            msg = read.next() => match msg {
                Some(Ok(Message::Binary(data))) => match decode_frame(&data) {
                    Ok((timestamp, _)) => {
                        let latency = unix_now_secs() - timestamp;
                        log::info!("Latency: {:.2} ms", latency * 1000.0);
                        latencies.push(latency);
                    }
                    Err(e) => log::warn!("Error parsing frame: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => {
                    log::info!("Connection closed by server");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(Error::WebSocket(e.to_string())),
            }
        }
    }

    let _ = write.send(Message::Close(None)).await;
    Ok(latencies)
}

// ABOUTME: Frame source supervisor
// ABOUTME: Owns the capture backend on a dedicated thread, re-blocks samples and restarts on failure

use crate::audio::AudioBlock;
use crate::server::clock::ServerClock;
use crate::server::config::CaptureConfig;
use crate::server::dispatcher::BroadcastDispatcher;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;

/// Capture device failures. All of them are recovered by restarting the
/// stream after the backoff.
#[derive(Error, Debug)]
pub enum CaptureError {
    /// Host has no default input device
    #[error("no input device available")]
    NoDevice,

    /// Named input device is not present
    #[error("input device '{0}' not found")]
    DeviceNotFound(String),

    /// Device enumeration failed
    #[error("failed to enumerate input devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    /// Device configuration query failed
    #[error("failed to query input configs: {0}")]
    Configs(#[from] cpal::SupportedStreamConfigsError),

    /// No input configuration covers the capture sample rate
    #[error("no input config supports {0} Hz")]
    UnsupportedRate(u32),

    /// Device only offers sample formats we cannot convert
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// Stream construction failed
    #[error("failed to build input stream: {0}")]
    Build(#[from] cpal::BuildStreamError),

    /// Stream start failed
    #[error("failed to start input stream: {0}")]
    Play(#[from] cpal::PlayStreamError),

    /// Device disappeared while running
    #[error("input device lost")]
    DeviceLost,

    /// Any other backend failure
    #[error("{0}")]
    Backend(String),
}

/// A source of raw samples.
///
/// `run` opens the device, feeds samples into `feed` and blocks until the
/// stream fails fatally or `shutdown` fires. Returning (with or without an
/// error) while not shutting down makes the supervisor reopen the stream
/// after the backoff.
pub trait CaptureBackend: Send + 'static {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Run one stream session
    fn run(
        &mut self,
        config: &CaptureConfig,
        feed: Arc<CaptureFeed>,
        shutdown: &ShutdownSignal,
    ) -> Result<(), CaptureError>;
}

/// Fires when the owning [`CaptureHandle`] is stopped or dropped
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    rx: Receiver<()>,
}

impl ShutdownSignal {
    /// Create a signal; it fires when the returned sender is dropped
    pub fn channel() -> (Sender<()>, Self) {
        let (tx, rx) = channel::bounded(0);
        (tx, Self { rx })
    }

    /// True once shutdown has been requested
    pub fn is_triggered(&self) -> bool {
        matches!(self.rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Sleep up to `timeout`, waking early on shutdown. Returns true if
    /// shutdown was requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        !matches!(self.rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
    }

    /// Receiver for use in `crossbeam::select!`
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

/// Downmix interleaved frames to mono while converting each sample.
///
/// Samples of an incomplete trailing frame stay in `carry` until the next
/// call completes the frame.
fn append_downmixed<T, F>(
    buf: &mut Vec<i16>,
    carry: &mut Vec<i16>,
    data: &[T],
    channels: usize,
    mut convert: F,
) where
    T: Copy,
    F: FnMut(T) -> i16,
{
    if channels <= 1 {
        buf.extend(data.iter().copied().map(&mut convert));
        return;
    }

    for sample in data.iter().copied() {
        carry.push(convert(sample));
        if carry.len() == channels {
            let sum: i32 = carry.iter().map(|&s| i32::from(s)).sum();
            buf.push((sum / channels as i32) as i16);
            carry.clear();
        }
    }
}

/// Cuts an arbitrary stream of callback buffers into fixed-size blocks
struct BlockAssembler {
    block_size: usize,
    pending: Vec<i16>,
    partial_frame: Vec<i16>,
}

impl BlockAssembler {
    fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            block_size,
            pending: Vec::with_capacity(block_size * 2),
            partial_frame: Vec::new(),
        }
    }

    fn push<T, F>(&mut self, data: &[T], channels: usize, convert: F) -> Vec<Vec<i16>>
    where
        T: Copy,
        F: FnMut(T) -> i16,
    {
        append_downmixed(&mut self.pending, &mut self.partial_frame, data, channels, convert);

        let mut blocks = Vec::new();
        while self.pending.len() >= self.block_size {
            blocks.push(self.pending.drain(..self.block_size).collect());
        }
        blocks
    }

    fn clear(&mut self) {
        self.pending.clear();
        self.partial_frame.clear();
    }
}

/// Entry point for backends: turns raw samples into timestamped blocks and
/// broadcasts each one synchronously.
pub struct CaptureFeed {
    assembler: Mutex<BlockAssembler>,
    clock: ServerClock,
    dispatcher: Arc<BroadcastDispatcher>,
}

impl CaptureFeed {
    /// Create a feed producing `block_size`-sample blocks
    pub fn new(block_size: usize, clock: ServerClock, dispatcher: Arc<BroadcastDispatcher>) -> Self {
        Self {
            assembler: Mutex::new(BlockAssembler::new(block_size)),
            clock,
            dispatcher,
        }
    }

    /// Push interleaved samples from a device callback.
    ///
    /// Every completed block is stamped with the current time and broadcast
    /// before this returns. Returns the number of blocks broadcast.
    pub fn push<T, F>(&self, data: &[T], channels: usize, convert: F) -> usize
    where
        T: Copy,
        F: FnMut(T) -> i16,
    {
        let blocks = self.assembler.lock().push(data, channels, convert);
        let count = blocks.len();
        for samples in blocks {
            let block = AudioBlock::new(self.clock.now_secs(), samples);
            self.dispatcher.dispatch(&block);
        }
        count
    }

    /// Record a non-fatal device status such as an overrun
    pub fn report_status(&self, status: &str) {
        log::warn!("Capture status: {}", status);
    }

    /// Drop partial samples left over from a previous stream
    fn reset(&self) {
        self.assembler.lock().clear();
    }
}

/// Counters shared between the capture thread and its handle
#[derive(Debug, Default)]
struct CaptureStats {
    attempts: AtomicU64,
    failures: AtomicU64,
}

/// The single capture pipeline producer.
///
/// Started once at process start and never torn down short of shutdown.
pub struct FrameSource {
    backend: Box<dyn CaptureBackend>,
    config: CaptureConfig,
    backoff: Duration,
    clock: ServerClock,
}

impl FrameSource {
    /// Create a frame source with the default 5 second restart backoff
    pub fn new(backend: Box<dyn CaptureBackend>, config: CaptureConfig) -> Self {
        Self {
            backend,
            config,
            backoff: Duration::from_secs(5),
            clock: ServerClock::new(),
        }
    }

    /// Set the delay between a failure and the next open attempt
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the clock used to stamp blocks
    pub fn with_clock(mut self, clock: ServerClock) -> Self {
        self.clock = clock;
        self
    }

    /// Spawn the capture thread.
    ///
    /// Blocks flow into `dispatcher` from then on, whether or not anyone is
    /// connected.
    pub fn start(self, dispatcher: Arc<BroadcastDispatcher>) -> std::io::Result<CaptureHandle> {
        let (trigger, shutdown) = ShutdownSignal::channel();
        let stats = Arc::new(CaptureStats::default());
        let feed = Arc::new(CaptureFeed::new(self.config.block_size, self.clock, dispatcher));

        let thread_stats = stats.clone();
        let thread = std::thread::Builder::new()
            .name("lingocast-capture".to_string())
            .spawn(move || {
                supervise(
                    self.backend,
                    self.config,
                    self.backoff,
                    feed,
                    shutdown,
                    thread_stats,
                )
            })?;

        Ok(CaptureHandle {
            trigger: Some(trigger),
            thread: Some(thread),
            stats,
        })
    }
}

/// Restart loop: run the backend, and after any exit wait out the backoff and
/// run it again, forever.
fn supervise(
    mut backend: Box<dyn CaptureBackend>,
    config: CaptureConfig,
    backoff: Duration,
    feed: Arc<CaptureFeed>,
    shutdown: ShutdownSignal,
    stats: Arc<CaptureStats>,
) {
    loop {
        if shutdown.is_triggered() {
            break;
        }

        let attempt = stats.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        log::info!(
            "Opening capture stream via {} ({} Hz, {} ch, {} samples/block, attempt {})",
            backend.name(),
            config.sample_rate,
            config.channels,
            config.block_size,
            attempt
        );
        feed.reset();

        let outcome = backend.run(&config, feed.clone(), &shutdown);
        if shutdown.is_triggered() {
            break;
        }

        stats.failures.fetch_add(1, Ordering::Relaxed);
        match outcome {
            Ok(()) => log::warn!("Capture stream ended unexpectedly"),
            Err(e) => log::error!("Capture stream failed: {}", e),
        }
        log::info!("Restarting capture in {:?}", backoff);

        if shutdown.wait(backoff) {
            break;
        }
    }

    log::info!("Capture stopped");
}

/// Handle to the running capture thread.
///
/// Dropping it requests shutdown without waiting; [`stop`](Self::stop) also
/// joins the thread.
#[derive(Debug)]
pub struct CaptureHandle {
    trigger: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
    stats: Arc<CaptureStats>,
}

impl CaptureHandle {
    /// Stream open attempts so far
    pub fn attempts(&self) -> u64 {
        self.stats.attempts.load(Ordering::Relaxed)
    }

    /// Stream sessions that ended in failure
    pub fn failures(&self) -> u64 {
        self.stats.failures.load(Ordering::Relaxed)
    }

    /// Request shutdown and wait for the capture thread to exit
    pub fn stop(mut self) {
        self.trigger.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("Capture thread panicked");
            }
        }
    }
}

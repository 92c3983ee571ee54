// ABOUTME: Capture backends
// ABOUTME: Microphone input through cpal and a synthetic test tone

use crate::server::capture::{CaptureBackend, CaptureError, CaptureFeed, ShutdownSignal};
use crate::server::config::CaptureConfig;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig, StreamError, SupportedBufferSize};
use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Instant;

/// Microphone capture through the host's default audio API
pub struct CpalBackend {
    device_name: Option<String>,
}

impl CpalBackend {
    /// Capture from the default input device
    pub fn new() -> Self {
        Self { device_name: None }
    }

    /// Capture from the input device with the given name
    pub fn with_device(name: impl Into<String>) -> Self {
        Self {
            device_name: Some(name.into()),
        }
    }

    fn open_device(&self) -> Result<cpal::Device, CaptureError> {
        let host = cpal::default_host();
        match &self.device_name {
            Some(name) => host
                .input_devices()?
                .find(|d| d.name().map(|n| n == *name).unwrap_or(false))
                .ok_or_else(|| CaptureError::DeviceNotFound(name.clone())),
            None => host.default_input_device().ok_or(CaptureError::NoDevice),
        }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Rank sample formats by how cheaply they convert to i16
fn format_rank(format: SampleFormat) -> Option<u8> {
    match format {
        SampleFormat::I16 => Some(0),
        SampleFormat::F32 => Some(1),
        SampleFormat::U16 => Some(2),
        _ => None,
    }
}

/// Pick an input configuration at the capture rate, preferring the fewest
/// channels and an i16 sample format. Extra channels are downmixed later.
fn select_config(
    device: &cpal::Device,
    config: &CaptureConfig,
) -> Result<(StreamConfig, SampleFormat), CaptureError> {
    let rate = cpal::SampleRate(config.sample_rate);
    let mut candidates: Vec<_> = device
        .supported_input_configs()?
        .filter(|range| range.min_sample_rate() <= rate && rate <= range.max_sample_rate())
        .collect();

    if candidates.is_empty() {
        return Err(CaptureError::UnsupportedRate(config.sample_rate));
    }

    candidates.retain(|range| format_rank(range.sample_format()).is_some());
    candidates.sort_by_key(|range| (range.channels(), format_rank(range.sample_format())));

    let range = candidates
        .into_iter()
        .next()
        .ok_or_else(|| CaptureError::UnsupportedFormat("no i16, f32 or u16 input".to_string()))?;

    let block = config.block_size as u32;
    let buffer_size = match range.buffer_size() {
        SupportedBufferSize::Range { min, max } if *min <= block && block <= *max => {
            cpal::BufferSize::Fixed(block)
        }
        _ => cpal::BufferSize::Default,
    };

    let format = range.sample_format();
    let mut stream_config = range.with_sample_rate(rate).config();
    stream_config.buffer_size = buffer_size;

    Ok((stream_config, format))
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    feed: Arc<CaptureFeed>,
    errors: crossbeam::channel::Sender<StreamError>,
    convert: fn(T) -> i16,
) -> Result<cpal::Stream, CaptureError>
where
    T: cpal::SizedSample + Send + 'static,
{
    let channels = usize::from(config.channels.max(1));
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            feed.push(data, channels, convert);
        },
        move |err| {
            let _ = errors.send(err);
        },
        None,
    )?;
    Ok(stream)
}

fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

fn u16_to_i16(sample: u16) -> i16 {
    (i32::from(sample) - 32_768) as i16
}

impl CaptureBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn run(
        &mut self,
        config: &CaptureConfig,
        feed: Arc<CaptureFeed>,
        shutdown: &ShutdownSignal,
    ) -> Result<(), CaptureError> {
        let device = self.open_device()?;
        let device_name = device
            .name()
            .unwrap_or_else(|_| "unknown input device".to_string());
        let (stream_config, format) = select_config(&device, config)?;

        log::info!(
            "Capture device '{}': {:?}, {} Hz, {} ch, buffer {:?}",
            device_name,
            format,
            stream_config.sample_rate.0,
            stream_config.channels,
            stream_config.buffer_size
        );

        let (err_tx, err_rx) = crossbeam::channel::unbounded();
        let stream_feed = feed.clone();
        let stream = match format {
            SampleFormat::I16 => {
                build_stream::<i16>(&device, &stream_config, stream_feed, err_tx, |s| s)?
            }
            SampleFormat::F32 => {
                build_stream::<f32>(&device, &stream_config, stream_feed, err_tx, f32_to_i16)?
            }
            SampleFormat::U16 => {
                build_stream::<u16>(&device, &stream_config, stream_feed, err_tx, u16_to_i16)?
            }
            other => return Err(CaptureError::UnsupportedFormat(format!("{other:?}"))),
        };
        stream.play()?;

        // The stream stays alive until this returns
        loop {
            crossbeam::select! {
                recv(err_rx) -> err => match err {
                    Ok(StreamError::BackendSpecific { err }) => {
                        feed.report_status(&err.description);
                    }
                    Ok(StreamError::DeviceNotAvailable) | Err(_) => {
                        return Err(CaptureError::DeviceLost);
                    }
                },
                recv(shutdown.receiver()) -> _ => return Ok(()),
            }
        }
    }
}

/// Synthetic capture source producing a sine tone (or silence) in real time
pub struct ToneBackend {
    frequency: f64,
    amplitude: f64,
    phase: f64,
}

impl ToneBackend {
    /// Create a tone source
    ///
    /// # Arguments
    /// * `frequency` - Tone frequency in Hz (0 for silence)
    pub fn new(frequency: f64) -> Self {
        Self {
            frequency: frequency.max(0.0),
            // Use 50% amplitude to avoid clipping
            amplitude: 0.5 * i16::MAX as f64,
            phase: 0.0,
        }
    }

    /// Silence source
    pub fn silence() -> Self {
        Self::new(0.0)
    }

    /// Set the amplitude (0.0 to 1.0)
    pub fn with_amplitude(mut self, amplitude: f64) -> Self {
        self.amplitude = amplitude.clamp(0.0, 1.0) * i16::MAX as f64;
        self
    }

    fn fill(&mut self, block: &mut [i16], sample_rate: u32) {
        if self.frequency == 0.0 {
            block.fill(0);
            return;
        }

        let phase_increment = 2.0 * PI * self.frequency / sample_rate as f64;
        for sample in block.iter_mut() {
            *sample = (self.phase.sin() * self.amplitude) as i16;
            self.phase += phase_increment;
            if self.phase >= 2.0 * PI {
                self.phase -= 2.0 * PI;
            }
        }
    }
}

impl CaptureBackend for ToneBackend {
    fn name(&self) -> &str {
        "tone"
    }

    fn run(
        &mut self,
        config: &CaptureConfig,
        feed: Arc<CaptureFeed>,
        shutdown: &ShutdownSignal,
    ) -> Result<(), CaptureError> {
        let interval = config.block_duration();
        let mut block = vec![0i16; config.block_size];
        let mut next = Instant::now();

        loop {
            self.fill(&mut block, config.sample_rate);
            feed.push(&block, 1, |s| s);

            next += interval;
            let wait = next.saturating_duration_since(Instant::now());
            if shutdown.wait(wait) {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_generates_samples() {
        let mut source = ToneBackend::new(440.0);
        let mut block = vec![0i16; 2048];
        source.fill(&mut block, 44_100);

        assert!(block.iter().any(|&s| s != 0));
        let peak = block.iter().map(|s| i32::from(*s).abs()).max().unwrap();
        assert!(peak <= i16::MAX as i32 / 2 + 1);
    }

    #[test]
    fn test_silence_generates_zeros() {
        let mut source = ToneBackend::silence();
        let mut block = vec![7i16; 2048];
        source.fill(&mut block, 44_100);

        assert!(block.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_sample_conversion() {
        assert_eq!(f32_to_i16(0.0), 0);
        assert_eq!(f32_to_i16(1.0), i16::MAX);
        assert_eq!(f32_to_i16(-2.0), -i16::MAX);
        assert_eq!(u16_to_i16(32_768), 0);
        assert_eq!(u16_to_i16(0), i16::MIN);
        assert_eq!(u16_to_i16(u16::MAX), i16::MAX);
    }

    #[test]
    fn test_format_preference() {
        assert!(format_rank(SampleFormat::I16) < format_rank(SampleFormat::F32));
        assert!(format_rank(SampleFormat::F32) < format_rank(SampleFormat::U16));
        assert_eq!(format_rank(SampleFormat::I8), None);
    }
}

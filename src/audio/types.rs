// ABOUTME: Core audio type definitions
// ABOUTME: AudioBlock plus the sample rate, channel count and block size used for capture

use std::sync::Arc;

/// Capture sample rate in Hz
pub const SAMPLE_RATE: u32 = 44_100;

/// Captured channel count (mono)
pub const CHANNELS: u16 = 1;

/// Samples per captured block (~46 ms at 44.1 kHz)
pub const BLOCK_SIZE: usize = 2048;

/// One captured block of mono signed 16-bit samples.
///
/// The timestamp is the wall-clock time (seconds since the Unix epoch) at
/// which the block was handed to the broadcast path, not the time its first
/// sample was acquired. Latency measurements on the client side depend on
/// this.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBlock {
    /// Delivery time in seconds since the Unix epoch
    pub timestamp: f64,
    /// Samples in capture order
    pub samples: Arc<[i16]>,
}

impl AudioBlock {
    /// Create a new block
    pub fn new(timestamp: f64, samples: impl Into<Arc<[i16]>>) -> Self {
        Self {
            timestamp,
            samples: samples.into(),
        }
    }

    /// Number of samples in the block
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True if the block holds no samples
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Block duration at the fixed capture rate
    pub fn duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(self.len() as f64 / SAMPLE_RATE as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_duration() {
        let block = AudioBlock::new(0.0, vec![0i16; BLOCK_SIZE]);
        assert_eq!(block.len(), 2048);
        let ms = block.duration().as_secs_f64() * 1000.0;
        assert!((ms - 46.44).abs() < 0.01, "got {ms}");
    }

    #[test]
    fn test_empty_block() {
        let block = AudioBlock::new(1.5, Vec::<i16>::new());
        assert!(block.is_empty());
    }
}

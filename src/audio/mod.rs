// ABOUTME: Audio types module
// ABOUTME: Captured audio blocks and the fixed capture format

mod types;

pub use types::{AudioBlock, BLOCK_SIZE, CHANNELS, SAMPLE_RATE};

// ABOUTME: Broadcast frame encoding
// ABOUTME: [timestamp: f64 LE][samples: i16 LE ...], one frame per captured block

use crate::audio::AudioBlock;
use thiserror::Error;

/// Size of the timestamp header in bytes
pub const HEADER_LEN: usize = 8;

/// Errors produced when decoding a frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Frame is shorter than the timestamp header
    #[error("frame too short: {0} bytes")]
    TooShort(usize),

    /// Sample payload is not a whole number of 16-bit samples
    #[error("sample payload has odd length: {0} bytes")]
    OddPayload(usize),
}

/// Encoded length of a frame carrying `samples` samples
#[inline]
pub const fn frame_len(samples: usize) -> usize {
    HEADER_LEN + samples * 2
}

/// Encode a timestamp and its samples into a single frame.
///
/// Stateless; one allocation per call.
pub fn encode_frame(timestamp: f64, samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(frame_len(samples.len()));
    out.extend_from_slice(&timestamp.to_le_bytes());
    for sample in samples {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Encode an [`AudioBlock`]
pub fn encode_block(block: &AudioBlock) -> Vec<u8> {
    encode_frame(block.timestamp, &block.samples)
}

/// Decode a frame back into its timestamp and samples.
///
/// The server never decodes; this exists for clients such as the latency
/// probe.
pub fn decode_frame(frame: &[u8]) -> Result<(f64, Vec<i16>), FrameError> {
    if frame.len() < HEADER_LEN {
        return Err(FrameError::TooShort(frame.len()));
    }
    let (header, payload) = frame.split_at(HEADER_LEN);
    if payload.len() % 2 != 0 {
        return Err(FrameError::OddPayload(payload.len()));
    }

    let mut ts = [0u8; HEADER_LEN];
    ts.copy_from_slice(header);
    let timestamp = f64::from_le_bytes(ts);

    let samples = payload
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    Ok((timestamp, samples))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::BLOCK_SIZE;

    #[test]
    fn test_frame_layout() {
        let encoded = encode_frame(1.5, &[0x1234, -2]);

        assert_eq!(encoded.len(), 12);
        assert_eq!(&encoded[..8], &1.5f64.to_le_bytes());
        // 0x1234 -> [0x34, 0x12]
        assert_eq!(encoded[8], 0x34);
        assert_eq!(encoded[9], 0x12);
        // -2 -> 0xFFFE -> [0xFE, 0xFF]
        assert_eq!(encoded[10], 0xFE);
        assert_eq!(encoded[11], 0xFF);
    }

    #[test]
    fn test_full_block_length() {
        let block = AudioBlock::new(1_700_000_000.123456, vec![0i16; BLOCK_SIZE]);
        let encoded = encode_block(&block);
        assert_eq!(encoded.len(), 8 + 4096);
        assert_eq!(encoded.len(), frame_len(BLOCK_SIZE));
    }

    #[test]
    fn test_decode_recovers_exact_values() {
        let timestamp = 1_734_567_890.123_456_7_f64;
        let samples = vec![i16::MIN, -1, 0, 1, i16::MAX, 12345];

        let (ts, decoded) = decode_frame(&encode_frame(timestamp, &samples)).unwrap();

        assert_eq!(ts.to_bits(), timestamp.to_bits());
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_header_only_frame() {
        let (ts, samples) = decode_frame(&encode_frame(3.0, &[])).unwrap();
        assert_eq!(ts, 3.0);
        assert!(samples.is_empty());
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert_eq!(decode_frame(&[0u8; 5]), Err(FrameError::TooShort(5)));
        assert_eq!(decode_frame(&[0u8; 11]), Err(FrameError::OddPayload(3)));
    }
}

// ABOUTME: Wire protocol module
// ABOUTME: Binary broadcast frame layout shared by the server and the latency probe

pub mod frame;

pub use frame::{decode_frame, encode_block, encode_frame, frame_len, FrameError, HEADER_LEN};

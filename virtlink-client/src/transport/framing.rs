//! Length-prefixed binary framing.
//!
//! Each message is a 4-byte big-endian payload length followed by the UTF-8
//! JSON payload, with no trailing delimiter. The decoder is a two-state
//! machine: waiting for a complete header, then waiting for the announced
//! body. Announced lengths above the configured cap are a protocol fault;
//! the connection carrying them is closed.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Header size: one big-endian `u32`.
const HEADER_LEN: usize = 4;

/// Default payload cap: 4 MiB.
pub const DEFAULT_MAX_FRAME: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    AwaitingHeader,
    AwaitingBody(usize),
}

/// Codec for the length-prefixed binary framing.
#[derive(Debug)]
pub struct FrameCodec {
    max_frame: usize,
    state: DecodeState,
}

impl FrameCodec {
    pub fn new(max_frame: usize) -> Self {
        Self {
            max_frame,
            state: DecodeState::AwaitingHeader,
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl Decoder for FrameCodec {
    type Item = Vec<u8>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Vec<u8>>, io::Error> {
        loop {
            match self.state {
                DecodeState::AwaitingHeader => {
                    if src.len() < HEADER_LEN {
                        src.reserve(HEADER_LEN - src.len());
                        return Ok(None);
                    }
                    let length = src.get_u32() as usize;
                    if length > self.max_frame {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("frame of {} bytes exceeds cap of {}", length, self.max_frame),
                        ));
                    }
                    src.reserve(length);
                    self.state = DecodeState::AwaitingBody(length);
                }
                DecodeState::AwaitingBody(length) => {
                    if src.len() < length {
                        return Ok(None);
                    }
                    let payload = src.split_to(length).to_vec();
                    self.state = DecodeState::AwaitingHeader;
                    return Ok(Some(payload));
                }
            }
        }
    }
}

impl Encoder<Vec<u8>> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, payload: Vec<u8>, dst: &mut BytesMut) -> Result<(), io::Error> {
        if payload.len() > self.max_frame {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "outgoing frame of {} bytes exceeds cap of {}",
                    payload.len(),
                    self.max_frame
                ),
            ));
        }
        dst.reserve(HEADER_LEN + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);
        Ok(())
    }
}

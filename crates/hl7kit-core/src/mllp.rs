//! MLLP (minimal lower layer protocol) framing
//!
//! A frame is `0x0B <payload> 0x1C 0x0D`. [`MllpCodec`] plugs into
//! `tokio_util::codec::Framed`, so a TCP stream becomes a stream of payloads
//! and a sink that frames whatever is sent through it.

use bytes::{Buf, BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::{debug, trace, warn};

use crate::{Hl7Error, Result};

/// Start block (vertical tab)
pub const START_BLOCK: u8 = 0x0b;
/// End block (file separator)
pub const END_BLOCK: u8 = 0x1c;
/// Trailing carriage return after the end block
pub const CARRIAGE_RETURN: u8 = 0x0d;

/// Largest payload accepted unless configured otherwise (16 MiB)
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;

/// Wrap `payload` in an MLLP frame
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(payload.len() + 3);
    framed.push(START_BLOCK);
    framed.extend_from_slice(payload);
    framed.push(END_BLOCK);
    framed.push(CARRIAGE_RETURN);
    framed
}

/// Frame codec for MLLP streams.
///
/// Decoding drops bytes ahead of a start block. A start block seen before
/// the current frame ends abandons the partial frame and starts over. A
/// frame is complete at `0x1C 0x0D`; a lone `0x1C` inside the payload is
/// kept. Payloads longer than the maximum frame length are an error.
#[derive(Debug, Clone)]
pub struct MllpCodec {
    max_frame_length: usize,
    discarded: usize,
}

impl Default for MllpCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl MllpCodec {
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self {
            max_frame_length,
            discarded: 0,
        }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    /// Total bytes dropped outside a frame or in abandoned frames
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    fn discard(&mut self, src: &mut BytesMut, count: usize) {
        if count == 0 {
            return;
        }
        debug!("Discarding {} bytes outside an MLLP frame", count);
        src.advance(count);
        self.discarded += count;
    }

    fn too_long(&self, length: usize) -> Hl7Error {
        Hl7Error::frame_error(format!(
            "MLLP frame of at least {length} bytes exceeds the {} byte limit",
            self.max_frame_length
        ))
    }
}

impl Decoder for MllpCodec {
    type Item = BytesMut;
    type Error = Hl7Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>> {
        loop {
            let Some(start) = src.iter().position(|&b| b == START_BLOCK) else {
                let len = src.len();
                self.discard(src, len);
                return Ok(None);
            };
            self.discard(src, start);

            let body = &src[1..];
            let restart = body.iter().position(|&b| b == START_BLOCK);
            let end = body
                .windows(2)
                .position(|pair| pair == [END_BLOCK, CARRIAGE_RETURN]);

            if let Some(end) = end
                && restart.is_none_or(|restart| end < restart)
            {
                if end > self.max_frame_length {
                    return Err(self.too_long(end));
                }
                src.advance(1);
                let payload = src.split_to(end);
                src.advance(2);
                trace!("Decoded MLLP frame of {} bytes", payload.len());
                return Ok(Some(payload));
            }

            if let Some(restart) = restart {
                warn!("MLLP frame abandoned after {} bytes by a new start block", restart);
                self.discard(src, restart + 1);
                continue;
            }

            if body.len() > self.max_frame_length {
                return Err(self.too_long(body.len()));
            }
            return Ok(None);
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<BytesMut>> {
        match self.decode(src)? {
            Some(payload) => Ok(Some(payload)),
            None if src.is_empty() => Ok(None),
            None => Err(Hl7Error::frame_error(format!(
                "MLLP stream ended inside a frame ({} bytes pending)",
                src.len()
            ))),
        }
    }
}

impl<T: AsRef<[u8]>> Encoder<T> for MllpCodec {
    type Error = Hl7Error;

    fn encode(&mut self, payload: T, dst: &mut BytesMut) -> Result<()> {
        let payload = payload.as_ref();
        if payload.len() > self.max_frame_length {
            return Err(self.too_long(payload.len()));
        }
        dst.reserve(payload.len() + 3);
        dst.put_u8(START_BLOCK);
        dst.extend_from_slice(payload);
        dst.put_u8(END_BLOCK);
        dst.put_u8(CARRIAGE_RETURN);
        Ok(())
    }
}

/// Frame `io` with a default [`MllpCodec`]
pub fn framed<T>(io: T) -> Framed<T, MllpCodec>
where
    T: AsyncRead + AsyncWrite,
{
    Framed::new(io, MllpCodec::new())
}

/// Decode a frame payload as message text
pub fn payload_text(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload).into_owned()
}

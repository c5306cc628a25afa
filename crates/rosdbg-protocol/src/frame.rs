//! # Framing
//!
//! Envelope shared by commands and events, and the resynchronising decoder
//! that splits an inbound byte stream into frames and raw passthrough bytes.

use tracing::{trace, warn};

use crate::error::{ProtocolError, ProtocolResult};

/// Two-byte marker that opens every frame.
///
/// Both bytes are outside the printable ASCII range so kernel debug output
/// interleaved with frames does not accidentally start one.
pub const MAGIC: [u8; 2] = [0xFE, 0xDB];

/// Magic + kind + length.
pub const HEADER_LEN: usize = 5;

/// Largest payload a single frame may carry.
pub const MAX_PAYLOAD: usize = 4096;

/// Consecutive rejected frames tolerated before the stream is declared lost.
pub const MAX_RESYNC_ATTEMPTS: usize = 8;

/// One protocol frame: a kind byte and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame
{
    pub kind: u8,
    pub payload: Vec<u8>,
}

impl Frame
{
    /// Build a frame, rejecting payloads larger than [`MAX_PAYLOAD`].
    pub fn new(kind: u8, payload: Vec<u8>) -> ProtocolResult<Self>
    {
        if payload.len() > MAX_PAYLOAD {
            return Err(ProtocolError::Oversized {
                size: payload.len(),
                max: MAX_PAYLOAD,
            });
        }
        Ok(Self { kind, payload })
    }

    /// Serialize the frame including magic, header and checksum.
    #[must_use]
    pub fn encode(&self) -> Vec<u8>
    {
        let len = u16::try_from(self.payload.len()).unwrap_or(u16::MAX).to_le_bytes();
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len() + 1);
        out.extend_from_slice(&MAGIC);
        out.push(self.kind);
        out.extend_from_slice(&len);
        out.extend_from_slice(&self.payload);
        out.push(checksum(self.kind, len, &self.payload));
        out
    }
}

/// Wrapping byte sum over kind, length and payload.
#[must_use]
pub fn checksum(kind: u8, len: [u8; 2], payload: &[u8]) -> u8
{
    payload
        .iter()
        .fold(kind.wrapping_add(len[0]).wrapping_add(len[1]), |acc, &b| acc.wrapping_add(b))
}

/// A unit produced by [`FrameDecoder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk
{
    /// A complete, checksum-verified frame.
    Frame(Frame),
    /// Bytes that arrived outside of any frame.
    Raw(Vec<u8>),
}

/// Incremental frame decoder.
///
/// Bytes are pushed as they arrive from the transport; [`FrameDecoder::next_chunk`]
/// hands out whatever can be decoded so far. A truncated frame at the end of
/// the buffer is kept until more bytes arrive. A frame that fails its length or
/// checksum check is skipped by advancing one byte and searching for the next
/// magic; after [`MAX_RESYNC_ATTEMPTS`] consecutive failures the decoder gives
/// up with [`ProtocolError::Desync`].
#[derive(Debug, Default)]
pub struct FrameDecoder
{
    buffer: Vec<u8>,
    rejected: usize,
}

impl FrameDecoder
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Append bytes read from the transport.
    pub fn push(&mut self, bytes: &[u8])
    {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of bytes waiting for the rest of a frame.
    #[must_use]
    pub fn buffered(&self) -> usize
    {
        self.buffer.len()
    }

    /// Drop all buffered bytes and the resync counter.
    pub fn reset(&mut self)
    {
        self.buffer.clear();
        self.rejected = 0;
    }

    /// Decode the next chunk, or `Ok(None)` when more bytes are needed.
    pub fn next_chunk(&mut self) -> ProtocolResult<Option<Chunk>>
    {
        loop {
            if self.buffer.is_empty() {
                return Ok(None);
            }

            let start = find_magic(&self.buffer);
            if start > 0 {
                let raw: Vec<u8> = self.buffer.drain(..start).collect();
                return Ok(Some(Chunk::Raw(raw)));
            }

            if self.buffer.len() < HEADER_LEN {
                return Ok(None);
            }

            let kind = self.buffer[2];
            let len_bytes = [self.buffer[3], self.buffer[4]];
            let len = usize::from(u16::from_le_bytes(len_bytes));
            if len > MAX_PAYLOAD {
                self.reject(format!("frame kind 0x{kind:02x} declares {len} byte payload"))?;
                continue;
            }

            let total = HEADER_LEN + len + 1;
            if self.buffer.len() < total {
                trace!(buffered = self.buffer.len(), needed = total, "partial frame buffered");
                return Ok(None);
            }

            let payload = &self.buffer[HEADER_LEN..HEADER_LEN + len];
            let expected = checksum(kind, len_bytes, payload);
            let received = self.buffer[total - 1];
            if expected != received {
                self.reject(format!(
                    "checksum mismatch on kind 0x{kind:02x} (expected 0x{expected:02x}, got 0x{received:02x})"
                ))?;
                continue;
            }

            let payload = payload.to_vec();
            self.buffer.drain(..total);
            self.rejected = 0;
            return Ok(Some(Chunk::Frame(Frame { kind, payload })));
        }
    }

    fn reject(&mut self, reason: String) -> ProtocolResult<()>
    {
        self.rejected += 1;
        if self.rejected > MAX_RESYNC_ATTEMPTS {
            self.buffer.clear();
            return Err(ProtocolError::Desync(format!(
                "{} consecutive bad frames, last: {reason}",
                self.rejected
            )));
        }
        warn!(attempt = self.rejected, "{reason}; resynchronising");
        // Skip the first magic byte; the scan picks up the next candidate.
        self.buffer.drain(..1);
        Ok(())
    }
}

/// Index of the first byte that could start a frame.
///
/// A lone first magic byte at the very end counts, since its partner may
/// still be in flight.
fn find_magic(buffer: &[u8]) -> usize
{
    buffer
        .iter()
        .enumerate()
        .position(|(i, &b)| b == MAGIC[0] && buffer.get(i + 1).is_none_or(|&next| next == MAGIC[1]))
        .unwrap_or(buffer.len())
}

/// Little-endian cursor over a frame payload.
pub(crate) struct PayloadReader<'a>
{
    kind: &'static str,
    data: &'a [u8],
}

impl<'a> PayloadReader<'a>
{
    pub(crate) fn new(kind: &'static str, data: &'a [u8]) -> Self
    {
        Self { kind, data }
    }

    pub(crate) fn take(&mut self, len: usize) -> ProtocolResult<&'a [u8]>
    {
        if self.data.len() < len {
            return Err(self.malformed(format!("needed {len} more bytes, {} left", self.data.len())));
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    pub(crate) fn u8(&mut self) -> ProtocolResult<u8>
    {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> ProtocolResult<u16>
    {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn u32(&mut self) -> ProtocolResult<u32>
    {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }

    pub(crate) fn u64(&mut self) -> ProtocolResult<u64>
    {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(raw))
    }

    pub(crate) fn string(&mut self) -> ProtocolResult<String>
    {
        let len = usize::from(self.u16()?);
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|err| self.malformed(format!("invalid UTF-8 name: {err}")))
    }

    pub(crate) fn rest(&mut self) -> &'a [u8]
    {
        std::mem::take(&mut self.data)
    }

    pub(crate) fn finish(self) -> ProtocolResult<()>
    {
        if self.data.is_empty() {
            Ok(())
        } else {
            Err(self.malformed(format!("{} trailing bytes", self.data.len())))
        }
    }

    pub(crate) fn malformed(&self, reason: String) -> ProtocolError
    {
        ProtocolError::Malformed { kind: self.kind, reason }
    }
}

/// Append a length-prefixed UTF-8 string.
pub(crate) fn put_string(out: &mut Vec<u8>, value: &str) -> ProtocolResult<()>
{
    let len = u16::try_from(value.len()).map_err(|_| ProtocolError::Oversized {
        size: value.len(),
        max: usize::from(u16::MAX),
    })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn frame_bytes(kind: u8, payload: &[u8]) -> Vec<u8>
    {
        Frame::new(kind, payload.to_vec()).unwrap().encode()
    }

    #[test]
    fn test_encode_layout()
    {
        let bytes = frame_bytes(0x83, &[1]);
        assert_eq!(bytes, vec![0xFE, 0xDB, 0x83, 0x01, 0x00, 0x01, 0x85]);
    }

    #[test]
    fn test_partial_frame_is_buffered()
    {
        let bytes = frame_bytes(0x82, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes[..6]);
        assert_eq!(decoder.next_chunk().unwrap(), None);
        assert_eq!(decoder.buffered(), 6);

        decoder.push(&bytes[6..]);
        let chunk = decoder.next_chunk().unwrap().unwrap();
        assert_eq!(chunk, Chunk::Frame(Frame::new(0x82, vec![1, 2, 3, 4, 5, 6, 7, 8]).unwrap()));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_raw_bytes_before_frame()
    {
        let mut decoder = FrameDecoder::new();
        decoder.push(b"(ntoskrnl) hello\n");
        decoder.push(&frame_bytes(0x83, &[0]));

        assert_eq!(decoder.next_chunk().unwrap(), Some(Chunk::Raw(b"(ntoskrnl) hello\n".to_vec())));
        assert!(matches!(decoder.next_chunk().unwrap(), Some(Chunk::Frame(_))));
        assert_eq!(decoder.next_chunk().unwrap(), None);
    }

    #[test]
    fn test_trailing_magic_byte_waits()
    {
        let mut decoder = FrameDecoder::new();
        decoder.push(&[b'a', MAGIC[0]]);
        assert_eq!(decoder.next_chunk().unwrap(), Some(Chunk::Raw(vec![b'a'])));
        assert_eq!(decoder.next_chunk().unwrap(), None);
        assert_eq!(decoder.buffered(), 1);
    }

    #[test]
    fn test_checksum_mismatch_resyncs()
    {
        let mut corrupt = frame_bytes(0x83, &[1]);
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0xFF;

        let mut decoder = FrameDecoder::new();
        decoder.push(&corrupt);
        decoder.push(&frame_bytes(0x83, &[0]));

        // The damaged frame's tail comes out as raw bytes, then the good frame.
        let mut frames = Vec::new();
        while let Some(chunk) = decoder.next_chunk().unwrap() {
            if let Chunk::Frame(frame) = chunk {
                frames.push(frame);
            }
        }
        assert_eq!(frames, vec![Frame::new(0x83, vec![0]).unwrap()]);
    }

    #[test]
    fn test_repeated_garbage_desyncs()
    {
        let mut decoder = FrameDecoder::new();
        let mut garbage = Vec::new();
        for _ in 0..=MAX_RESYNC_ATTEMPTS {
            garbage.extend_from_slice(&[MAGIC[0], MAGIC[1], 0x83, 0xFF, 0xFF]);
        }
        decoder.push(&garbage);

        let mut result = Ok(None);
        for _ in 0..64 {
            result = decoder.next_chunk();
            if result.is_err() {
                break;
            }
        }
        assert!(matches!(result, Err(ProtocolError::Desync(_))));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_oversized_payload_rejected()
    {
        let err = Frame::new(0x08, vec![0; MAX_PAYLOAD + 1]).unwrap_err();
        assert!(matches!(err, ProtocolError::Oversized { .. }));
    }
}

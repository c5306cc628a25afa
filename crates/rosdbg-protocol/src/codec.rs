//! Stream decoders built on [`FrameDecoder`].

use tracing::trace;

use crate::command::Command;
use crate::error::ProtocolResult;
use crate::event::WireEvent;
use crate::frame::{Chunk, Frame, FrameDecoder};

/// A message type that can be recovered from frames.
pub trait Message: Sized
{
    /// Interpret a verified frame.
    fn from_frame(frame: &Frame) -> ProtocolResult<Vec<Self>>;

    /// Represent bytes that arrived outside any frame, if this side cares.
    fn passthrough(bytes: Vec<u8>) -> Option<Self>;
}

impl Message for WireEvent
{
    fn from_frame(frame: &Frame) -> ProtocolResult<Vec<Self>>
    {
        WireEvent::from_frame(frame)
    }

    fn passthrough(bytes: Vec<u8>) -> Option<Self>
    {
        Some(WireEvent::RawBytes(bytes))
    }
}

impl Message for Command
{
    fn from_frame(frame: &Frame) -> ProtocolResult<Vec<Self>>
    {
        Command::from_frame(frame).map(|command| vec![command])
    }

    fn passthrough(_bytes: Vec<u8>) -> Option<Self>
    {
        None
    }
}

/// Decodes a byte stream into batches of messages, one batch per frame.
///
/// Each batch is complete and in application order; if a frame cannot be
/// interpreted the error is returned instead of its batch, so a caller never
/// sees half of a frame's events.
#[derive(Debug)]
pub struct MessageDecoder<M>
{
    frames: FrameDecoder,
    _message: std::marker::PhantomData<fn() -> M>,
}

/// Host side: decodes what the target sends.
pub type EventDecoder = MessageDecoder<WireEvent>;

/// Target side: decodes what the host sends.
pub type CommandDecoder = MessageDecoder<Command>;

impl<M: Message> MessageDecoder<M>
{
    #[must_use]
    pub fn new() -> Self
    {
        Self {
            frames: FrameDecoder::new(),
            _message: std::marker::PhantomData,
        }
    }

    /// Append bytes read from the transport.
    pub fn push(&mut self, bytes: &[u8])
    {
        self.frames.push(bytes);
    }

    /// Bytes held back waiting for the rest of a frame.
    #[must_use]
    pub fn buffered(&self) -> usize
    {
        self.frames.buffered()
    }

    /// Forget buffered bytes, e.g. when a new session starts.
    pub fn reset(&mut self)
    {
        self.frames.reset();
    }

    /// Next batch of messages, or `Ok(None)` when more input is needed.
    pub fn next_messages(&mut self) -> ProtocolResult<Option<Vec<M>>>
    {
        while let Some(chunk) = self.frames.next_chunk()? {
            match chunk {
                Chunk::Frame(frame) => {
                    trace!(kind = frame.kind, len = frame.payload.len(), "frame decoded");
                    return M::from_frame(&frame).map(Some);
                }
                Chunk::Raw(bytes) => {
                    if let Some(message) = M::passthrough(bytes) {
                        return Ok(Some(vec![message]));
                    }
                }
            }
        }
        Ok(None)
    }
}

impl<M: Message> Default for MessageDecoder<M>
{
    fn default() -> Self
    {
        Self::new()
    }
}

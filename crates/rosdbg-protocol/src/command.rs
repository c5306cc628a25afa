//! Host → target commands.

use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::{Frame, PayloadReader, MAX_PAYLOAD};

pub const KIND_BREAK: u8 = 0x01;
pub const KIND_GO: u8 = 0x02;
pub const KIND_STEP: u8 = 0x03;
pub const KIND_NEXT: u8 = 0x04;
pub const KIND_SET_BREAKPOINT: u8 = 0x05;
pub const KIND_CLEAR_BREAKPOINT: u8 = 0x06;
pub const KIND_READ_MEMORY: u8 = 0x07;
pub const KIND_WRITE_MEMORY: u8 = 0x08;

/// A command sent to the debug stub.
///
/// Run-control commands (`Break`, `Go`, `Step`, `Next`) carry no payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command
{
    /// Interrupt the running target.
    Break,
    /// Resume execution.
    Go,
    /// Step into the next source line.
    Step,
    /// Step over the next source line.
    Next,
    /// Install a breakpoint.
    SetBreakpoint
    {
        id: u32, address: u64
    },
    /// Remove a breakpoint.
    ClearBreakpoint
    {
        id: u32
    },
    /// Ask for `length` bytes at `address`; answered with a memory-data event.
    ReadMemory
    {
        address: u64, length: u32
    },
    /// Overwrite target memory.
    WriteMemory
    {
        address: u64, bytes: Vec<u8>
    },
}

impl Command
{
    /// Frame kind byte for this command.
    #[must_use]
    pub const fn kind(&self) -> u8
    {
        match self {
            Self::Break => KIND_BREAK,
            Self::Go => KIND_GO,
            Self::Step => KIND_STEP,
            Self::Next => KIND_NEXT,
            Self::SetBreakpoint { .. } => KIND_SET_BREAKPOINT,
            Self::ClearBreakpoint { .. } => KIND_CLEAR_BREAKPOINT,
            Self::ReadMemory { .. } => KIND_READ_MEMORY,
            Self::WriteMemory { .. } => KIND_WRITE_MEMORY,
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str
    {
        match self {
            Self::Break => "break",
            Self::Go => "go",
            Self::Step => "step",
            Self::Next => "next",
            Self::SetBreakpoint { .. } => "set-breakpoint",
            Self::ClearBreakpoint { .. } => "clear-breakpoint",
            Self::ReadMemory { .. } => "read-memory",
            Self::WriteMemory { .. } => "write-memory",
        }
    }

    /// Build the frame for this command.
    pub fn to_frame(&self) -> ProtocolResult<Frame>
    {
        let mut payload = Vec::new();
        match self {
            Self::Break | Self::Go | Self::Step | Self::Next => {}
            Self::SetBreakpoint { id, address } => {
                payload.extend_from_slice(&id.to_le_bytes());
                payload.extend_from_slice(&address.to_le_bytes());
            }
            Self::ClearBreakpoint { id } => payload.extend_from_slice(&id.to_le_bytes()),
            Self::ReadMemory { address, length } => {
                payload.extend_from_slice(&address.to_le_bytes());
                payload.extend_from_slice(&length.to_le_bytes());
            }
            Self::WriteMemory { address, bytes } => {
                if bytes.len() + 8 > MAX_PAYLOAD {
                    return Err(ProtocolError::Oversized {
                        size: bytes.len() + 8,
                        max: MAX_PAYLOAD,
                    });
                }
                payload.extend_from_slice(&address.to_le_bytes());
                payload.extend_from_slice(bytes);
            }
        }
        Frame::new(self.kind(), payload)
    }

    /// Encode the command into wire bytes.
    ///
    /// The output depends only on the command value.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>>
    {
        Ok(self.to_frame()?.encode())
    }

    /// Decode a command frame (the target's side of the conversation).
    ///
    /// As for events, a checksum-valid frame with a payload that does not fit
    /// its kind is a desync.
    pub fn from_frame(frame: &Frame) -> ProtocolResult<Self>
    {
        Self::parse(frame).map_err(|err| match err {
            ProtocolError::Malformed { .. } => ProtocolError::Desync(err.to_string()),
            other => other,
        })
    }

    fn parse(frame: &Frame) -> ProtocolResult<Self>
    {
        let command = match frame.kind {
            KIND_BREAK => Self::Break,
            KIND_GO => Self::Go,
            KIND_STEP => Self::Step,
            KIND_NEXT => Self::Next,
            KIND_SET_BREAKPOINT => {
                let mut r = PayloadReader::new("set-breakpoint", &frame.payload);
                let id = r.u32()?;
                let address = r.u64()?;
                r.finish()?;
                return Ok(Self::SetBreakpoint { id, address });
            }
            KIND_CLEAR_BREAKPOINT => {
                let mut r = PayloadReader::new("clear-breakpoint", &frame.payload);
                let id = r.u32()?;
                r.finish()?;
                return Ok(Self::ClearBreakpoint { id });
            }
            KIND_READ_MEMORY => {
                let mut r = PayloadReader::new("read-memory", &frame.payload);
                let address = r.u64()?;
                let length = r.u32()?;
                r.finish()?;
                return Ok(Self::ReadMemory { address, length });
            }
            KIND_WRITE_MEMORY => {
                let mut r = PayloadReader::new("write-memory", &frame.payload);
                let address = r.u64()?;
                let bytes = r.rest().to_vec();
                return Ok(Self::WriteMemory { address, bytes });
            }
            other => return Err(ProtocolError::Desync(format!("unknown command kind 0x{other:02x}"))),
        };

        if frame.payload.is_empty() {
            Ok(command)
        } else {
            Err(ProtocolError::Malformed {
                kind: command.name(),
                reason: format!("{} unexpected payload bytes", frame.payload.len()),
            })
        }
    }
}

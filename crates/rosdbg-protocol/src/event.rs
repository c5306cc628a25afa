//! Target → host events.

use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::{put_string, Frame, PayloadReader};
use crate::registers::Registers;

pub const KIND_MODULE_LOADED: u8 = 0x81;
pub const KIND_MODULE_UNLOADED: u8 = 0x82;
pub const KIND_RUNNING_CHANGED: u8 = 0x83;
pub const KIND_REGISTERS_CHANGED: u8 = 0x84;
pub const KIND_MEMORY_DATA: u8 = 0x85;
pub const KIND_STOP_REPORT: u8 = 0x86;

/// A decoded event reported by the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent
{
    /// A module image was mapped at `address`.
    ModuleLoaded
    {
        address: u64, name: String
    },
    /// The module based at `address` went away.
    ModuleUnloaded
    {
        address: u64
    },
    /// The target started (`true`) or stopped (`false`) executing.
    RunningChanged(bool),
    /// Fresh register snapshot.
    RegistersChanged(Registers),
    /// Answer to a read-memory command.
    MemoryData
    {
        address: u64, bytes: Vec<u8>
    },
    /// Bytes received outside any frame.
    RawBytes(Vec<u8>),
}

/// Everything the stub reports when the target halts, in one frame.
///
/// Decoding yields module events first, then the running flag, then the
/// registers, so register consumers always resolve `eip` against an
/// up-to-date module table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport
{
    pub modules: Vec<(u64, String)>,
    pub running: bool,
    pub registers: Registers,
}

impl StopReport
{
    /// Build the composite frame.
    pub fn to_frame(&self) -> ProtocolResult<Frame>
    {
        let count = u16::try_from(self.modules.len()).map_err(|_| ProtocolError::Oversized {
            size: self.modules.len(),
            max: usize::from(u16::MAX),
        })?;
        let mut payload = Vec::new();
        payload.extend_from_slice(&count.to_le_bytes());
        for (address, name) in &self.modules {
            payload.extend_from_slice(&address.to_le_bytes());
            put_string(&mut payload, name)?;
        }
        payload.push(u8::from(self.running));
        self.registers.write_to(&mut payload);
        Frame::new(KIND_STOP_REPORT, payload)
    }

    /// Encode into wire bytes.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>>
    {
        Ok(self.to_frame()?.encode())
    }

    fn into_events(self) -> Vec<WireEvent>
    {
        let mut events: Vec<WireEvent> = self
            .modules
            .into_iter()
            .map(|(address, name)| WireEvent::ModuleLoaded { address, name })
            .collect();
        events.push(WireEvent::RunningChanged(self.running));
        events.push(WireEvent::RegistersChanged(self.registers));
        events
    }
}

impl WireEvent
{
    /// Encode the event the way a debug stub would send it.
    ///
    /// `RawBytes` is written as-is, without framing.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>>
    {
        let (kind, payload) = match self {
            Self::ModuleLoaded { address, name } => {
                let mut payload = address.to_le_bytes().to_vec();
                put_string(&mut payload, name)?;
                (KIND_MODULE_LOADED, payload)
            }
            Self::ModuleUnloaded { address } => (KIND_MODULE_UNLOADED, address.to_le_bytes().to_vec()),
            Self::RunningChanged(running) => (KIND_RUNNING_CHANGED, vec![u8::from(*running)]),
            Self::RegistersChanged(registers) => {
                let mut payload = Vec::with_capacity(Registers::WIRE_SIZE);
                registers.write_to(&mut payload);
                (KIND_REGISTERS_CHANGED, payload)
            }
            Self::MemoryData { address, bytes } => {
                let mut payload = address.to_le_bytes().to_vec();
                payload.extend_from_slice(bytes);
                (KIND_MEMORY_DATA, payload)
            }
            Self::RawBytes(bytes) => return Ok(bytes.clone()),
        };
        Ok(Frame::new(kind, payload)?.encode())
    }

    /// Decode one frame into the events it carries, in application order.
    ///
    /// A checksum-valid frame that cannot be interpreted means host and stub
    /// disagree about the protocol, so it is reported as a desync rather than
    /// skipped.
    pub fn from_frame(frame: &Frame) -> ProtocolResult<Vec<Self>>
    {
        Self::parse(frame).map_err(|err| match err {
            ProtocolError::Malformed { .. } => ProtocolError::Desync(err.to_string()),
            other => other,
        })
    }

    fn parse(frame: &Frame) -> ProtocolResult<Vec<Self>>
    {
        match frame.kind {
            KIND_MODULE_LOADED => {
                let mut r = PayloadReader::new("module-loaded", &frame.payload);
                let address = r.u64()?;
                let name = r.string()?;
                r.finish()?;
                Ok(vec![Self::ModuleLoaded { address, name }])
            }
            KIND_MODULE_UNLOADED => {
                let mut r = PayloadReader::new("module-unloaded", &frame.payload);
                let address = r.u64()?;
                r.finish()?;
                Ok(vec![Self::ModuleUnloaded { address }])
            }
            KIND_RUNNING_CHANGED => {
                let mut r = PayloadReader::new("running-changed", &frame.payload);
                let running = read_flag(&mut r)?;
                r.finish()?;
                Ok(vec![Self::RunningChanged(running)])
            }
            KIND_REGISTERS_CHANGED => {
                let mut r = PayloadReader::new("registers-changed", &frame.payload);
                let registers = Registers::read_from(&mut r)?;
                r.finish()?;
                Ok(vec![Self::RegistersChanged(registers)])
            }
            KIND_MEMORY_DATA => {
                let mut r = PayloadReader::new("memory-data", &frame.payload);
                let address = r.u64()?;
                let bytes = r.rest().to_vec();
                Ok(vec![Self::MemoryData { address, bytes }])
            }
            KIND_STOP_REPORT => {
                let mut r = PayloadReader::new("stop-report", &frame.payload);
                let count = r.u16()?;
                let mut modules = Vec::with_capacity(usize::from(count));
                for _ in 0..count {
                    let address = r.u64()?;
                    let name = r.string()?;
                    modules.push((address, name));
                }
                let running = read_flag(&mut r)?;
                let registers = Registers::read_from(&mut r)?;
                r.finish()?;
                Ok(StopReport {
                    modules,
                    running,
                    registers,
                }
                .into_events())
            }
            other => Err(ProtocolError::Desync(format!("unknown event kind 0x{other:02x}"))),
        }
    }
}

fn read_flag(r: &mut PayloadReader<'_>) -> ProtocolResult<bool>
{
    match r.u8()? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(r.malformed(format!("flag byte 0x{other:02x}"))),
    }
}

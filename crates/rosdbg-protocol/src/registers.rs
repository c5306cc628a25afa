//! i386 register snapshot reported by the target at every stop.

use std::fmt;

use crate::error::ProtocolResult;
use crate::frame::PayloadReader;

/// CPU register values captured when the target last stopped.
///
/// The snapshot is replaced wholesale on every register-change event; `eip`
/// is what the front-end resolves to a source location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Registers
{
    pub eax: u32,
    pub ecx: u32,
    pub edx: u32,
    pub ebx: u32,
    pub esp: u32,
    pub ebp: u32,
    pub esi: u32,
    pub edi: u32,
    pub eip: u32,
    pub eflags: u32,
    pub cs: u32,
    pub ds: u32,
    pub es: u32,
    pub fs: u32,
    pub gs: u32,
    pub ss: u32,
}

impl Registers
{
    /// Size of the snapshot on the wire (sixteen little-endian `u32`s).
    pub const WIRE_SIZE: usize = 64;

    /// Register names in wire order.
    pub const NAMES: [&'static str; 16] = [
        "eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "eip", "eflags", "cs", "ds", "es", "fs", "gs", "ss",
    ];

    /// Instruction pointer widened to an address.
    #[must_use]
    pub const fn instruction_pointer(&self) -> u64
    {
        self.eip as u64
    }

    /// Values in wire order.
    #[must_use]
    pub const fn values(&self) -> [u32; 16]
    {
        [
            self.eax,
            self.ecx,
            self.edx,
            self.ebx,
            self.esp,
            self.ebp,
            self.esi,
            self.edi,
            self.eip,
            self.eflags,
            self.cs,
            self.ds,
            self.es,
            self.fs,
            self.gs,
            self.ss,
        ]
    }

    /// Iterate `(name, value)` pairs in wire order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, u32)>
    {
        Self::NAMES.into_iter().zip(self.values())
    }

    pub(crate) fn write_to(&self, out: &mut Vec<u8>)
    {
        for value in self.values() {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }

    pub(crate) fn read_from(reader: &mut PayloadReader<'_>) -> ProtocolResult<Self>
    {
        let mut v = [0u32; 16];
        for slot in &mut v {
            *slot = reader.u32()?;
        }
        Ok(Self {
            eax: v[0],
            ecx: v[1],
            edx: v[2],
            ebx: v[3],
            esp: v[4],
            ebp: v[5],
            esi: v[6],
            edi: v[7],
            eip: v[8],
            eflags: v[9],
            cs: v[10],
            ds: v[11],
            es: v[12],
            fs: v[13],
            gs: v[14],
            ss: v[15],
        })
    }
}

impl fmt::Display for Registers
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{name}={value:08x}")?;
        }
        Ok(())
    }
}

//! Target address type.

use std::fmt;
use std::num::ParseIntError;
use std::ops::Add;
use std::str::FromStr;

/// Strongly typed address in the debuggee's address space
///
/// The remote kernel reports 32-bit addresses today, but everything is kept
/// as `u64` so module bases and line tables do not need to care.
///
/// ## Example
///
/// ```rust
/// use rosdbg_core::types::Address;
///
/// let base = Address::from(0x8040_0000);
/// let eip = base + 0x1050;
/// assert_eq!(eip.offset_from(base), Some(0x1050));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(u64);

impl Address
{
    /// The null address
    pub const ZERO: Self = Address(0);

    /// Create an address in const contexts.
    #[must_use]
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Distance from `base` up to this address, `None` if `base` lies above it.
    #[must_use]
    pub fn offset_from(self, base: Address) -> Option<u64>
    {
        self.0.checked_sub(base.0)
    }

    /// Add an offset, saturating at the top of the address space.
    #[must_use]
    pub fn saturating_add(self, offset: u64) -> Self
    {
        Address(self.0.saturating_add(offset))
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl FromStr for Address
{
    type Err = ParseIntError;

    /// Parse `0x`-prefixed hex or plain decimal.
    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let s = s.trim();
        let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16)?,
            None => s.parse()?,
        };
        Ok(Address(value))
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:08x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

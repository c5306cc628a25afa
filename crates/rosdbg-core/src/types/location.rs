//! Source location returned by address resolution.

use std::fmt;

/// File name reported when an address cannot be resolved.
pub const UNKNOWN_FILE: &str = "unknown";

/// A `(file, line)` pair.
///
/// Unresolvable addresses produce the sentinel `("unknown", 0)` rather than
/// an error, since resolution runs on every stop and a miss is routine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation
{
    pub file: String,
    pub line: u32,
}

impl SourceLocation
{
    #[must_use]
    pub fn new(file: impl Into<String>, line: u32) -> Self
    {
        Self { file: file.into(), line }
    }

    /// The `("unknown", 0)` sentinel.
    #[must_use]
    pub fn unknown() -> Self
    {
        Self::new(UNKNOWN_FILE, 0)
    }

    #[must_use]
    pub fn is_known(&self) -> bool
    {
        self.file != UNKNOWN_FILE
    }
}

impl Default for SourceLocation
{
    fn default() -> Self
    {
        Self::unknown()
    }
}

impl fmt::Display for SourceLocation
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}:{}", self.file, self.line)
    }
}

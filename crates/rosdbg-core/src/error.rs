//! # Error Types
//!
//! Error taxonomy for the debug session core.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.
//!
//! Each layer has its own error type so callers can tell how far a failure
//! reached:
//!
//! 1. **Configuration**: [`ConfigError`], raised before any transport is opened
//! 2. **Transport**: [`TransportError`], collapses the session to `Closed`
//! 3. **Protocol**: [`ProtocolError`], a desync also collapses the session
//! 4. **Symbols**: [`SymbolError`], recorded per module, never fatal
//!
//! [`RosdbgError`] wraps all of them for the public session API.

use std::path::PathBuf;

pub use rosdbg_protocol::ProtocolError;
use thiserror::Error;

/// Failures of the byte-stream carrier.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError
{
    /// The port, pipe or host could not be reached when opening
    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    /// An established connection failed mid-session
    ///
    /// The coordinator turns this into a forced transition to `Closed`; it is
    /// never retried automatically.
    #[error("Transport severed: {0}")]
    Severed(String),
}

/// Rejected connection settings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError
{
    /// The connection description names a transport we do not support
    #[error("Unsupported connection mode: {0}")]
    UnsupportedMode(String),

    /// A field of an otherwise supported mode is invalid
    #[error("Invalid {field}: {reason}")]
    Invalid
    {
        field: &'static str, reason: String
    },
}

/// Symbol resolution failures.
///
/// These are kept per module; a module whose symbols fail to load stays in
/// the module table as unresolved and lookups inside it answer `unknown`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SymbolError
{
    /// No output directory has been configured
    #[error("No symbol output directory configured")]
    NoOutputPath,

    /// No symbol file for the module exists under the output directory
    #[error("No symbol file found for module {module}")]
    NotFound
    {
        module: String
    },

    /// The symbol file exists but could not be parsed
    #[error("Corrupt symbol file {}: {reason}", path.display())]
    Corrupt
    {
        path: PathBuf, reason: String
    },

    /// No line table entry matches a source location
    #[error("No code for {file}:{line}")]
    LineNotFound
    {
        file: String, line: u32
    },

    /// Reading a symbol file failed
    #[error("IO error reading symbols: {0}")]
    Io(String),
}

/// Main error type for session operations
#[derive(Error, Debug)]
pub enum RosdbgError
{
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Symbol(#[from] SymbolError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Operation requires an open connection
    #[error("Not connected to a target")]
    NotConnected,

    /// Another thread is already opening a connection
    #[error("A connection attempt is already in progress")]
    Busy,

    /// The notification receiver can only be taken once
    #[error("Session notifications are already being consumed")]
    NotificationsTaken,

    /// I/O error (settings files, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, RosdbgError>`
///
/// ```rust
/// use rosdbg_core::error::RosdbgResult;
/// fn foo() -> RosdbgResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type RosdbgResult<T> = std::result::Result<T, RosdbgError>;

//! # rosdbg-core
//!
//! Debug session coordinator for remote ReactOS kernel debugging.
//!
//! This crate provides:
//! - Transports to the target: serial port, named pipe and TCP socket
//! - A symbol context that maps addresses inside loaded modules to source lines
//! - The [`Session`] state machine that connects the two and numbers every change
//! - An [`ObserverRegistry`] that hands those changes to UI components
//!
//! The wire format lives in the `rosdbg-protocol` crate.
//!
//! ## Why unsafe code is needed
//!
//! Serial ports are configured through `termios` (raw mode, line speed, read
//! timeout), which is only reachable through `libc`. The calls are confined to
//! the serial transport.

#![allow(unsafe_code)] // termios configuration of serial ports

pub mod error;
pub mod events;
pub mod observers;
pub mod prelude;
pub mod session;
pub mod symbols;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use error::{RosdbgError, RosdbgResult};
pub use events::{Notification, SessionEvent};
pub use observers::{ObserverRegistry, SessionObserver, Shell};
pub use session::{BreakpointLocation, Session, SessionSnapshot, SessionState};
pub use symbols::SymbolContext;
pub use transport::{ConnectionMode, PipeMode, TransportConfig};
pub use types::{Address, Module, Registers, SourceLocation};

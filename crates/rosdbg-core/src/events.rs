//! Session notification types and helpers.
//!
//! The session publishes a [`Notification`] for every observable change:
//! connection mode, run state, registers, modules, memory replies, raw target
//! output and source focus. Notifications are numbered under the session lock,
//! so their order is the order in which the state changed.

use std::fmt::Write as _;
use std::sync::mpsc;

use crate::transport::ConnectionMode;
use crate::types::{Address, Module, Registers, SourceLocation};

/// A change in session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent
{
    /// The connection mode changed. `Closed` is emitted exactly once per teardown.
    ModeChanged(ConnectionMode),
    /// The target started (`true`) or stopped (`false`) running.
    RunningChanged(bool),
    /// New register snapshot, with the source location `eip` resolves to.
    RegistersChanged
    {
        registers: Registers,
        location: SourceLocation,
    },
    ModuleLoaded(Module),
    ModuleUnloaded(Module),
    /// Reply to a memory read.
    MemoryData
    {
        address: Address,
        bytes: Vec<u8>,
    },
    /// Bytes the target wrote outside protocol frames (debug prints).
    RawTraffic(Vec<u8>),
    /// The shell moved source focus to a new location.
    FocusChanged
    {
        address: Address,
        location: SourceLocation,
    },
}

impl SessionEvent
{
    /// Human-readable description of the event.
    #[must_use]
    pub fn describe(&self) -> String
    {
        match self {
            Self::ModeChanged(ConnectionMode::Closed) => "Connection closed".to_string(),
            Self::ModeChanged(mode) => format!("Connected ({mode})"),
            Self::RunningChanged(true) => "Target running".to_string(),
            Self::RunningChanged(false) => "Target stopped".to_string(),
            Self::RegistersChanged { registers, location } => {
                format!("Stopped at 0x{:08x} ({location})", registers.eip)
            }
            Self::ModuleLoaded(module) => format!("Loaded {module}"),
            Self::ModuleUnloaded(module) => format!("Unloaded {}", module.short_name),
            Self::MemoryData { address, bytes } => {
                let mut text = format!("{address}:");
                for byte in bytes.iter().take(16) {
                    let _ = write!(text, " {byte:02x}");
                }
                if bytes.len() > 16 {
                    let _ = write!(text, " ... ({} bytes)", bytes.len());
                }
                text
            }
            Self::RawTraffic(bytes) => String::from_utf8_lossy(bytes).trim_end().to_string(),
            Self::FocusChanged { address, location } => format!("Focus {address} ({location})"),
        }
    }
}

/// A [`SessionEvent`] with its position in the session's notification order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification
{
    /// Strictly increasing over the lifetime of a session object
    pub seq: u64,
    pub event: SessionEvent,
}

/// Sender side of the session notification channel.
pub type NotificationSender = mpsc::Sender<Notification>;
/// Receiver side of the session notification channel.
pub type NotificationReceiver = mpsc::Receiver<Notification>;

/// Create a new notification channel.
#[must_use]
pub fn notification_channel() -> (NotificationSender, NotificationReceiver)
{
    mpsc::channel()
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_describe()
    {
        assert_eq!(
            SessionEvent::ModeChanged(ConnectionMode::Closed).describe(),
            "Connection closed"
        );
        assert_eq!(
            SessionEvent::ModeChanged(ConnectionMode::Socket).describe(),
            "Connected (Socket)"
        );
        let event = SessionEvent::MemoryData {
            address: Address::from(0x1000),
            bytes: vec![0x90, 0xcc],
        };
        assert_eq!(event.describe(), "0x00001000: 90 cc");
        assert_eq!(SessionEvent::RawTraffic(b"hello\r\n".to_vec()).describe(), "hello");
    }
}

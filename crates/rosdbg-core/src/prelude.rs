//! Common module for library exports

pub use crate::error::{ConfigError, RosdbgError, RosdbgResult, SymbolError, TransportError};
pub use crate::events::{Notification, NotificationReceiver, SessionEvent};
pub use crate::observers::{ObserverRegistry, SessionObserver, Shell, UsesDebugConnection, UsesShell, UsesSymbols};
pub use crate::session::{BreakpointLocation, Session, SessionSnapshot, SessionState};
pub use crate::symbols::SymbolContext;
pub use crate::transport::{ConnectionMode, PipeMode, TransportConfig};
pub use crate::types::{Address, Module, Registers, SourceLocation};

//! # Types
//!
//! Value types shared by the transport, symbol and session layers.

pub mod address;
pub mod location;
pub mod module;

// Re-export all public types
pub use address::Address;
pub use location::SourceLocation;
pub use module::Module;
pub use rosdbg_protocol::Registers;

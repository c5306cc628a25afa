//! # rosdbg-protocol
//!
//! Binary wire protocol spoken between the rosdbg front-end and the debug stub
//! running inside the remote kernel.
//!
//! The protocol is asymmetric: the host sends [`Command`]s and the target
//! answers with [`WireEvent`]s. Both travel inside the same [`Frame`] envelope:
//!
//! ```text
//! FE DB | kind:u8 | len:u16 LE | payload[len] | checksum:u8
//! ```
//!
//! Anything the target prints outside a frame (kernel debug output, boot
//! banners) is surfaced as [`WireEvent::RawBytes`] so the front-end can show
//! the raw traffic.
//!
//! ## Example
//!
//! ```rust
//! use rosdbg_protocol::{Command, CommandDecoder};
//!
//! let bytes = Command::Break.encode().unwrap();
//! let mut peer = CommandDecoder::new();
//! peer.push(&bytes);
//! assert_eq!(peer.next_messages().unwrap(), Some(vec![Command::Break]));
//! ```

pub mod codec;
pub mod command;
pub mod error;
pub mod event;
pub mod frame;
pub mod registers;

pub use codec::{CommandDecoder, EventDecoder, Message, MessageDecoder};
pub use command::Command;
pub use error::{ProtocolError, ProtocolResult};
pub use event::{StopReport, WireEvent};
pub use frame::{Chunk, Frame, FrameDecoder};
pub use registers::Registers;

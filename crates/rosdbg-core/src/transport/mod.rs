//! # Transports
//!
//! Byte-stream carriers between the debugger and the target kernel.
//!
//! Every transport is a full-duplex stream with the same contract:
//!
//! - [`Transport::read`] blocks until bytes arrive. It returns `Ok(0)` only
//!   after [`Transport::close`] was called locally; a peer hang-up or an I/O
//!   failure is reported as [`TransportError::Severed`].
//! - [`Transport::close`] is idempotent and wakes a reader blocked in `read`,
//!   which is how the session tears down its reader thread.
//!
//! Methods take `&self` so the reader thread and the command path can share
//! one `Arc<dyn Transport>`.

pub mod config;
mod pipe;
mod serial;
mod socket;

use std::fmt::Debug;
use std::io;
use std::sync::Arc;

pub use config::{ConnectionMode, PipeMode, TransportConfig};
pub use pipe::PipeTransport;
pub use serial::SerialTransport;
pub use socket::SocketTransport;

use crate::error::TransportError;

/// A full-duplex byte stream to the target.
pub trait Transport: Send + Sync + Debug
{
    /// Which kind of carrier this is.
    fn mode(&self) -> ConnectionMode;

    /// Block until at least one byte is available and copy it into `buf`.
    ///
    /// ## Errors
    ///
    /// [`TransportError::Severed`] when the peer disconnects or the device fails.
    fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Write all of `bytes`.
    ///
    /// ## Errors
    ///
    /// [`TransportError::Severed`] if the stream is closed or broken.
    fn write(&self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Shut the stream down, waking any blocked reader.
    fn close(&self);

    /// Whether [`Transport::close`] has been called.
    fn is_closed(&self) -> bool;
}

/// Open the transport described by `config`.
///
/// ## Errors
///
/// [`TransportError::Unavailable`] if the port, pipe or host cannot be opened.
pub fn open(config: &TransportConfig) -> Result<Arc<dyn Transport>, TransportError>
{
    tracing::debug!("Opening transport {config}");
    let transport: Arc<dyn Transport> = match config {
        TransportConfig::Serial { port, baud } => Arc::new(SerialTransport::open(port, *baud)?),
        TransportConfig::Pipe { name, mode } => Arc::new(PipeTransport::open(name, *mode)?),
        TransportConfig::Socket { host, port } => Arc::new(SocketTransport::connect(host, *port)?),
    };
    tracing::info!("Transport {config} open");
    Ok(transport)
}

pub(crate) fn unavailable(what: impl std::fmt::Display, err: &io::Error) -> TransportError
{
    TransportError::Unavailable(format!("{what}: {err}"))
}

pub(crate) fn severed(err: &io::Error) -> TransportError
{
    TransportError::Severed(err.to_string())
}

/// Severed error for a clean end-of-stream from the peer.
pub(crate) fn peer_closed() -> TransportError
{
    TransportError::Severed("peer closed the connection".to_string())
}

pub(crate) fn closed_locally() -> TransportError
{
    TransportError::Severed("transport closed".to_string())
}

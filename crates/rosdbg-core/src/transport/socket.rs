//! TCP transport, used with emulators that expose the debug port as a socket.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{closed_locally, peer_closed, severed, unavailable, ConnectionMode, Transport};
use crate::error::TransportError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client end of a TCP connection to the target.
#[derive(Debug)]
pub struct SocketTransport
{
    stream: TcpStream,
    closed: AtomicBool,
}

impl SocketTransport
{
    /// Connect to `host:port`, trying every resolved address in turn.
    ///
    /// ## Errors
    ///
    /// [`TransportError::Unavailable`] if the name does not resolve or no
    /// address accepts the connection.
    pub fn connect(host: &str, port: u16) -> Result<Self, TransportError>
    {
        let target = format!("{host}:{port}");
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|err| unavailable(&target, &err))?;

        let mut last_error = io::Error::new(io::ErrorKind::NotFound, "no addresses resolved");
        for addr in addrs {
            tracing::trace!("Connecting to {addr}");
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    if let Err(err) = stream.set_nodelay(true) {
                        tracing::warn!("Failed to disable Nagle on {addr}: {err}");
                    }
                    return Ok(Self::from_stream(stream));
                }
                Err(err) => {
                    tracing::debug!("Connect to {addr} failed: {err}");
                    last_error = err;
                }
            }
        }
        Err(unavailable(&target, &last_error))
    }

    /// Wrap an already connected stream.
    #[must_use]
    pub fn from_stream(stream: TcpStream) -> Self
    {
        Self {
            stream,
            closed: AtomicBool::new(false),
        }
    }
}

impl Transport for SocketTransport
{
    fn mode(&self) -> ConnectionMode
    {
        ConnectionMode::Socket
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError>
    {
        loop {
            match (&self.stream).read(buf) {
                Ok(0) if self.is_closed() => return Ok(0),
                Ok(0) => return Err(peer_closed()),
                Ok(n) => return Ok(n),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(_) if self.is_closed() => return Ok(0),
                Err(err) => return Err(severed(&err)),
            }
        }
    }

    fn write(&self, bytes: &[u8]) -> Result<(), TransportError>
    {
        if self.is_closed() {
            return Err(closed_locally());
        }
        (&self.stream)
            .write_all(bytes)
            .and_then(|()| (&self.stream).flush())
            .map_err(|err| severed(&err))
    }

    fn close(&self)
    {
        if !self.closed.swap(true, Ordering::AcqRel) {
            if let Err(err) = self.stream.shutdown(Shutdown::Both) {
                tracing::debug!("Socket shutdown: {err}");
            }
        }
    }

    fn is_closed(&self) -> bool
    {
        self.closed.load(Ordering::Acquire)
    }
}

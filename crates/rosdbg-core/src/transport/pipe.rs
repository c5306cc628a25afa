//! Named-pipe transport.
//!
//! Virtual machines usually expose the guest's serial port as a named pipe.
//! On Unix hosts that is a Unix domain socket; on Windows the pipe is opened
//! as a file.

use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use super::{closed_locally, peer_closed, severed, ConnectionMode, PipeMode, Transport};
use crate::error::TransportError;

#[cfg(unix)]
type PipeStream = std::os::unix::net::UnixStream;
#[cfg(not(unix))]
type PipeStream = std::fs::File;

/// One end of a named pipe.
pub struct PipeTransport
{
    stream: PipeStream,
    /// Socket file we created in server mode, removed on close
    owned_path: Option<PathBuf>,
    closed: AtomicBool,
}

impl fmt::Debug for PipeTransport
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("PipeTransport")
            .field("owned_path", &self.owned_path)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl PipeTransport
{
    /// Open `name` as a client, or create it and wait for one peer as a server.
    ///
    /// ## Errors
    ///
    /// [`TransportError::Unavailable`] if the pipe cannot be opened or created.
    pub fn open(name: &Path, mode: PipeMode) -> Result<Self, TransportError>
    {
        let what = name.display();
        match mode {
            PipeMode::Client => {
                let stream = connect_client(name).map_err(|err| super::unavailable(&what, &err))?;
                Ok(Self::new(stream, None))
            }
            PipeMode::Server => {
                let stream = accept_server(name).map_err(|err| super::unavailable(&what, &err))?;
                Ok(Self::new(stream, Some(name.to_path_buf())))
            }
        }
    }

    fn new(stream: PipeStream, owned_path: Option<PathBuf>) -> Self
    {
        Self {
            stream,
            owned_path,
            closed: AtomicBool::new(false),
        }
    }
}

#[cfg(unix)]
fn connect_client(name: &Path) -> io::Result<PipeStream>
{
    PipeStream::connect(name)
}

#[cfg(unix)]
fn accept_server(name: &Path) -> io::Result<PipeStream>
{
    use std::os::unix::net::UnixListener;

    // A stale socket from an earlier run would make bind fail
    if name.exists() {
        std::fs::remove_file(name)?;
    }
    let listener = UnixListener::bind(name)?;
    tracing::info!("Waiting for target on pipe {}", name.display());
    let (stream, _) = listener.accept()?;
    Ok(stream)
}

#[cfg(not(unix))]
fn connect_client(name: &Path) -> io::Result<PipeStream>
{
    std::fs::OpenOptions::new().read(true).write(true).open(name)
}

#[cfg(not(unix))]
fn accept_server(_name: &Path) -> io::Result<PipeStream>
{
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "server pipes are only supported on Unix hosts",
    ))
}

impl Transport for PipeTransport
{
    fn mode(&self) -> ConnectionMode
    {
        ConnectionMode::Pipe
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
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        #[cfg(unix)]
        if let Err(err) = self.stream.shutdown(std::net::Shutdown::Both) {
            tracing::debug!("Pipe shutdown: {err}");
        }
        if let Some(path) = &self.owned_path {
            if let Err(err) = std::fs::remove_file(path) {
                tracing::debug!("Could not remove pipe {}: {err}", path.display());
            }
        }
    }

    fn is_closed(&self) -> bool
    {
        self.closed.load(Ordering::Acquire)
    }
}

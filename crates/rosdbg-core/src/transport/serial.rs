//! Serial-port transport.
//!
//! The port is put into raw mode with a 100 ms read timeout (`VMIN = 0`,
//! `VTIME = 1`), so a blocked reader wakes regularly and notices a local
//! [`Transport::close`]. A serial line has no end-of-stream; only device
//! errors sever it.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{closed_locally, severed, unavailable, ConnectionMode, Transport};
use crate::error::TransportError;

/// An open serial device.
#[derive(Debug)]
pub struct SerialTransport
{
    port: File,
    baud: u32,
    closed: AtomicBool,
}

impl SerialTransport
{
    /// Open `port` and program it for `baud` 8N1 raw I/O.
    ///
    /// ## Errors
    ///
    /// [`TransportError::Unavailable`] if the device cannot be opened or configured.
    pub fn open(port: &Path, baud: u32) -> Result<Self, TransportError>
    {
        let what = port.display();
        let file = open_device(port).map_err(|err| unavailable(&what, &err))?;
        configure(&file, baud).map_err(|err| unavailable(&what, &err))?;
        tracing::debug!("Serial port {what} configured for {baud} baud");
        Ok(Self {
            port: file,
            baud,
            closed: AtomicBool::new(false),
        })
    }

    /// Configured line speed.
    #[must_use]
    pub const fn baud(&self) -> u32
    {
        self.baud
    }
}

#[cfg(unix)]
fn open_device(port: &Path) -> io::Result<File>
{
    use std::os::unix::fs::OpenOptionsExt;

    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(port)
}

#[cfg(not(unix))]
fn open_device(port: &Path) -> io::Result<File>
{
    OpenOptions::new().read(true).write(true).open(port)
}

#[cfg(unix)]
fn configure(file: &File, baud: u32) -> io::Result<()>
{
    use std::os::unix::io::AsRawFd;

    let speed = baud_constant(baud).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("unsupported baud rate {baud}"))
    })?;
    let fd = file.as_raw_fd();

    // SAFETY: `fd` is an open descriptor owned by `file` for the duration of
    // these calls, and `tio` is a plain C struct fully written by tcgetattr.
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            return Err(io::Error::last_os_error());
        }
        libc::cfmakeraw(&mut tio);
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;
        tio.c_cc[libc::VMIN] = 0;
        tio.c_cc[libc::VTIME] = 1;
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(io::Error::last_os_error());
        }
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn configure(_file: &File, _baud: u32) -> io::Result<()>
{
    tracing::warn!("Serial line settings are left as configured by the OS on this host");
    Ok(())
}

#[cfg(unix)]
fn baud_constant(baud: u32) -> Option<libc::speed_t>
{
    Some(match baud {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19_200 => libc::B19200,
        38_400 => libc::B38400,
        57_600 => libc::B57600,
        115_200 => libc::B115200,
        _ => return None,
    })
}

impl Transport for SerialTransport
{
    fn mode(&self) -> ConnectionMode
    {
        ConnectionMode::Serial
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError>
    {
        loop {
            if self.is_closed() {
                return Ok(0);
            }
            match (&self.port).read(buf) {
                // Read timeout, poll the closed flag again
                Ok(0) => {}
                Ok(n) => return Ok(n),
                Err(err) if matches!(err.kind(), io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock) => {}
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
        (&self.port)
            .write_all(bytes)
            .and_then(|()| (&self.port).flush())
            .map_err(|err| severed(&err))
    }

    fn close(&self)
    {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("Serial port closed");
        }
    }

    fn is_closed(&self) -> bool
    {
        self.closed.load(Ordering::Acquire)
    }
}

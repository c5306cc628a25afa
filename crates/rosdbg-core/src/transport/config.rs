//! Connection settings accepted by the coordinator.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::ConfigError;

/// Baud rate used when a serial description omits one.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Baud rates the serial transport can program.
pub const SUPPORTED_BAUD_RATES: [u32; 8] = [1200, 2400, 4800, 9600, 19_200, 38_400, 57_600, 115_200];

/// Which transport a session is using.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionMode
{
    #[default]
    Closed,
    Pipe,
    Serial,
    Socket,
}

impl fmt::Display for ConnectionMode
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(match self {
            Self::Closed => "Closed",
            Self::Pipe => "Pipe",
            Self::Serial => "Serial",
            Self::Socket => "Socket",
        })
    }
}

/// Which end of a pipe we are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PipeMode
{
    /// Connect to a pipe someone else created (the usual case for VMs)
    #[default]
    Client,
    /// Create the pipe and wait for the target to connect
    Server,
}

/// The three connection shapes the coordinator understands.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TransportConfig
{
    Serial
    {
        port: PathBuf, baud: u32
    },
    Pipe
    {
        name: PathBuf, mode: PipeMode
    },
    Socket
    {
        host: String, port: u16
    },
}

impl TransportConfig
{
    /// Mode the session enters once this transport is open.
    #[must_use]
    pub const fn mode(&self) -> ConnectionMode
    {
        match self {
            Self::Serial { .. } => ConnectionMode::Serial,
            Self::Pipe { .. } => ConnectionMode::Pipe,
            Self::Socket { .. } => ConnectionMode::Socket,
        }
    }

    /// Check field values before anything is opened.
    pub fn validate(&self) -> Result<(), ConfigError>
    {
        match self {
            Self::Serial { port, baud } => {
                if port.as_os_str().is_empty() {
                    return Err(invalid("serial port", "empty port name"));
                }
                if !SUPPORTED_BAUD_RATES.contains(baud) {
                    return Err(invalid("baud rate", format!("{baud} is not one of {SUPPORTED_BAUD_RATES:?}")));
                }
            }
            Self::Pipe { name, .. } => {
                if name.as_os_str().is_empty() {
                    return Err(invalid("pipe name", "empty pipe name"));
                }
            }
            Self::Socket { host, port } => {
                if host.trim().is_empty() {
                    return Err(invalid("host", "empty host name"));
                }
                if *port == 0 {
                    return Err(invalid("port", "port 0 cannot be connected to"));
                }
            }
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError
{
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

impl FromStr for TransportConfig
{
    type Err = ConfigError;

    /// Parse a connection description.
    ///
    /// - `tcp:HOST:PORT` (also `socket:`)
    /// - `serial:PORT[:BAUD]`
    /// - `pipe:NAME[:client|server]`
    ///
    /// The trailing field is split off from the right so Windows device names
    /// and paths keep their own separators.
    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| ConfigError::UnsupportedMode(s.to_string()))?;

        let config = match scheme.to_ascii_lowercase().as_str() {
            "tcp" | "socket" => {
                let (host, port) = rest
                    .rsplit_once(':')
                    .ok_or_else(|| invalid("port", format!("missing port in '{rest}'")))?;
                let port = port
                    .parse::<u16>()
                    .map_err(|err| invalid("port", format!("'{port}': {err}")))?;
                Self::Socket {
                    host: host.trim_matches(['[', ']']).to_string(),
                    port,
                }
            }
            "serial" | "com" => match rest.rsplit_once(':') {
                Some((port, baud)) if baud.chars().all(|c| c.is_ascii_digit()) && !baud.is_empty() => {
                    let baud = baud
                        .parse::<u32>()
                        .map_err(|err| invalid("baud rate", format!("'{baud}': {err}")))?;
                    Self::Serial {
                        port: PathBuf::from(port),
                        baud,
                    }
                }
                _ => Self::Serial {
                    port: PathBuf::from(rest),
                    baud: DEFAULT_BAUD,
                },
            },
            "pipe" => match rest.rsplit_once(':') {
                Some((name, "server")) => Self::Pipe {
                    name: PathBuf::from(name),
                    mode: PipeMode::Server,
                },
                Some((name, "client")) => Self::Pipe {
                    name: PathBuf::from(name),
                    mode: PipeMode::Client,
                },
                _ => Self::Pipe {
                    name: PathBuf::from(rest),
                    mode: PipeMode::Client,
                },
            },
            _ => return Err(ConfigError::UnsupportedMode(scheme.to_string())),
        };

        config.validate()?;
        Ok(config)
    }
}

impl fmt::Display for TransportConfig
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Self::Serial { port, baud } => write!(f, "serial:{}:{baud}", port.display()),
            Self::Pipe { name, mode } => {
                let mode = match mode {
                    PipeMode::Client => "client",
                    PipeMode::Server => "server",
                };
                write!(f, "pipe:{}:{mode}", name.display())
            }
            Self::Socket { host, port } => write!(f, "tcp:{host}:{port}"),
        }
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_parse_socket()
    {
        let config: TransportConfig = "tcp:127.0.0.1:5000".parse().unwrap();
        assert_eq!(
            config,
            TransportConfig::Socket {
                host: "127.0.0.1".into(),
                port: 5000
            }
        );
        assert_eq!(config.mode(), ConnectionMode::Socket);
    }

    #[test]
    fn test_parse_serial_with_and_without_baud()
    {
        let config: TransportConfig = "serial:/dev/ttyS0:38400".parse().unwrap();
        assert_eq!(
            config,
            TransportConfig::Serial {
                port: "/dev/ttyS0".into(),
                baud: 38_400
            }
        );

        let config: TransportConfig = "serial:COM1".parse().unwrap();
        assert_eq!(
            config,
            TransportConfig::Serial {
                port: "COM1".into(),
                baud: DEFAULT_BAUD
            }
        );
    }

    #[test]
    fn test_parse_pipe_modes()
    {
        let config: TransportConfig = "pipe:/tmp/reactos.sock:server".parse().unwrap();
        assert_eq!(
            config,
            TransportConfig::Pipe {
                name: "/tmp/reactos.sock".into(),
                mode: PipeMode::Server
            }
        );

        let config: TransportConfig = "pipe:\\\\.\\pipe\\com_1".parse().unwrap();
        assert!(matches!(config, TransportConfig::Pipe { mode: PipeMode::Client, .. }));
    }

    #[test]
    fn test_unknown_scheme_is_unsupported()
    {
        assert_eq!(
            "usb:0".parse::<TransportConfig>(),
            Err(ConfigError::UnsupportedMode("usb".into()))
        );
        assert!(matches!(
            "no-scheme".parse::<TransportConfig>(),
            Err(ConfigError::UnsupportedMode(_))
        ));
    }

    #[test]
    fn test_invalid_fields()
    {
        assert!(matches!(
            "tcp:localhost:0".parse::<TransportConfig>(),
            Err(ConfigError::Invalid { field: "port", .. })
        ));
        assert!(matches!(
            "serial:/dev/ttyS0:12345".parse::<TransportConfig>(),
            Err(ConfigError::Invalid { field: "baud rate", .. })
        ));
        assert!(matches!(
            "tcp::5000".parse::<TransportConfig>(),
            Err(ConfigError::Invalid { field: "host", .. })
        ));
    }

    #[test]
    fn test_display_round_trips()
    {
        for text in ["tcp:localhost:5000", "serial:/dev/ttyUSB0:9600", "pipe:/tmp/vm:server"] {
            let config: TransportConfig = text.parse().unwrap();
            assert_eq!(config.to_string(), text);
        }
    }
}

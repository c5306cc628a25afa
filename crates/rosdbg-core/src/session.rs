//! # Debug Session
//!
//! The coordinator between one target connection, the symbol context and
//! everything observing the session.
//!
//! ## State machine
//!
//! ```text
//!            start()              open ok
//!  Closed ───────────▶ Connecting ─────────▶ Stopped ◀──┐
//!    ▲                    │ open failed        │        │ RunningChanged(false)
//!    │◀───────────────────┘                    ▼        │
//!    │◀──────── close() / severed / desync ── Running ──┘
//! ```
//!
//! `Stopped` and `Running` only ever change on a `RunningChanged` event from
//! the wire; sending `go` does not by itself mark the target as running.
//!
//! ## Threads
//!
//! A reader thread per connection blocks on the transport, decodes frames
//! and applies each frame's events under the session lock. Symbol files for
//! the frame's module loads are parsed before that lock is taken. Every connection
//! gets a new generation number; a batch decoded for an older generation is
//! dropped, so nothing from a previous connection leaks into the next one.
//!
//! Notifications go out through an `mpsc` channel (see
//! [`Session::take_notification_receiver`]); observers run on whichever thread
//! drains it, never on the reader thread.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, JoinHandle};

use rosdbg_protocol::{Command, EventDecoder, WireEvent};

use crate::error::{RosdbgError, RosdbgResult};
use crate::events::{notification_channel, Notification, NotificationReceiver, NotificationSender, SessionEvent};
use crate::observers::Shell;
use crate::symbols::{PreparedModule, SymbolContext};
use crate::transport::{self, ConnectionMode, PipeMode, Transport, TransportConfig};
use crate::types::{Address, Module, Registers, SourceLocation};

const READ_BUFFER_SIZE: usize = 4096;

/// Coarse session state, as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState
{
    Closed,
    Connecting,
    /// Connected, target halted and accepting commands
    Stopped,
    /// Connected, target executing
    Running,
}

impl fmt::Display for SessionState
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.write_str(match self {
            Self::Closed => "Not connected",
            Self::Connecting => "Connecting",
            Self::Stopped => "Waiting",
            Self::Running => "Debug",
        })
    }
}

/// Where a breakpoint goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointLocation
{
    Address(Address),
    SourceLine
    {
        file: String, line: u32
    },
}

/// Consistent copy of the session state.
///
/// `sequence` is the number of the last notification already reflected in
/// this snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot
{
    pub sequence: u64,
    pub mode: ConnectionMode,
    pub state: SessionState,
    pub running: bool,
    pub registers: Option<Registers>,
    pub location: SourceLocation,
    pub modules: Vec<Module>,
    pub last_error: Option<String>,
}

impl SessionSnapshot
{
    #[must_use]
    pub fn is_connected(&self) -> bool
    {
        self.mode != ConnectionMode::Closed
    }

    #[must_use]
    pub fn can_break(&self) -> bool
    {
        self.state == SessionState::Running
    }

    #[must_use]
    pub fn can_go(&self) -> bool
    {
        self.state == SessionState::Stopped
    }

    #[must_use]
    pub fn can_step(&self) -> bool
    {
        self.state == SessionState::Stopped
    }
}

struct State
{
    mode: ConnectionMode,
    connecting: bool,
    running: bool,
    registers: Option<Registers>,
    location: SourceLocation,
    generation: u64,
    sequence: u64,
    transport: Option<Arc<dyn Transport>>,
    reader: Option<JoinHandle<()>>,
    last_error: Option<String>,
    sender: NotificationSender,
}

impl State
{
    fn session_state(&self) -> SessionState
    {
        match (self.mode, self.connecting, self.running) {
            (ConnectionMode::Closed, true, _) => SessionState::Connecting,
            (ConnectionMode::Closed, false, _) => SessionState::Closed,
            (_, _, true) => SessionState::Running,
            (_, _, false) => SessionState::Stopped,
        }
    }

    fn emit(&mut self, event: SessionEvent)
    {
        self.sequence += 1;
        tracing::trace!(seq = self.sequence, "{}", event.describe());
        // Nobody listening is fine; the state itself is still updated
        let _ = self.sender.send(Notification {
            seq: self.sequence,
            event,
        });
    }
}

struct Inner
{
    state: Mutex<State>,
    symbols: Arc<SymbolContext>,
    receiver: Mutex<Option<NotificationReceiver>>,
}

impl Inner
{
    fn lock(&self) -> MutexGuard<'_, State>
    {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move to `Closed`. Caller holds the lock and has checked there is something to close.
    fn teardown(&self, state: &mut State, reason: Option<String>) -> Option<JoinHandle<()>>
    {
        state.generation += 1;
        state.connecting = false;
        state.mode = ConnectionMode::Closed;
        state.running = false;
        state.registers = None;
        state.location = SourceLocation::unknown();
        if let Some(transport) = state.transport.take() {
            transport.close();
        }
        self.symbols.clear();
        if reason.is_some() {
            state.last_error = reason;
        }
        state.emit(SessionEvent::ModeChanged(ConnectionMode::Closed));
        state.reader.take()
    }

    /// Tear down after a transport or protocol failure on connection `generation`.
    fn collapse(&self, generation: u64, err: &RosdbgError)
    {
        let reader = {
            let mut state = self.lock();
            if state.generation != generation || state.mode == ConnectionMode::Closed {
                return;
            }
            tracing::error!("Connection lost: {err}");
            self.teardown(&mut state, Some(err.to_string()))
        };
        // Called from the reader thread itself or a command path; never join here
        drop(reader);
    }

    fn is_current(&self, generation: u64) -> bool
    {
        let state = self.lock();
        state.generation == generation && state.mode != ConnectionMode::Closed
    }

    /// Apply one decoded frame. Returns `false` once the connection is stale.
    ///
    /// Symbol files for loaded modules are parsed before the session lock is
    /// taken, so a slow parse never blocks `close` or the command paths.
    fn apply(&self, generation: u64, batch: Vec<WireEvent>) -> bool
    {
        if !self.is_current(generation) {
            tracing::debug!("Discarding {} events from a closed connection", batch.len());
            return false;
        }
        let batch: Vec<(WireEvent, Option<PreparedModule>)> = batch
            .into_iter()
            .map(|event| {
                let prepared = match &event {
                    WireEvent::ModuleLoaded { address, name } => {
                        self.symbols.prepare_module(name, Address::from(*address))
                    }
                    _ => None,
                };
                (event, prepared)
            })
            .collect();

        let mut state = self.lock();
        if state.generation != generation || state.mode == ConnectionMode::Closed {
            tracing::debug!("Connection closed while loading symbols, discarding {} events", batch.len());
            return false;
        }
        for (event, prepared) in batch {
            self.apply_event(&mut state, event, prepared);
        }
        true
    }

    /// `prepared` is the symbol lookup for a `ModuleLoaded` event, `None`
    /// when the module was already loaded.
    fn apply_event(&self, state: &mut State, event: WireEvent, prepared: Option<PreparedModule>)
    {
        match event {
            WireEvent::ModuleLoaded { .. } => {
                if let Some(module) = prepared.and_then(|prepared| self.symbols.commit_module(prepared)) {
                    state.emit(SessionEvent::ModuleLoaded(module));
                }
            }
            WireEvent::ModuleUnloaded { address } => {
                if let Some(module) = self.symbols.unload_module(Address::from(address)) {
                    state.emit(SessionEvent::ModuleUnloaded(module));
                }
            }
            WireEvent::RunningChanged(running) => {
                if state.running != running {
                    state.running = running;
                    state.emit(SessionEvent::RunningChanged(running));
                }
            }
            WireEvent::RegistersChanged(registers) => {
                let location = self
                    .symbols
                    .file_and_line(Address::from(registers.instruction_pointer()));
                state.registers = Some(registers);
                state.location = location.clone();
                state.emit(SessionEvent::RegistersChanged { registers, location });
            }
            WireEvent::MemoryData { address, bytes } => {
                state.emit(SessionEvent::MemoryData {
                    address: Address::from(address),
                    bytes,
                });
            }
            WireEvent::RawBytes(bytes) => state.emit(SessionEvent::RawTraffic(bytes)),
        }
    }
}

impl Drop for Inner
{
    fn drop(&mut self)
    {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(transport) = state.transport.take() {
            transport.close();
        }
    }
}

fn reader_loop(inner: &Weak<Inner>, transport: &Arc<dyn Transport>, generation: u64)
{
    let mut decoder = EventDecoder::new();
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        let n = match transport.read(&mut buf) {
            Ok(0) => {
                tracing::debug!("Reader for connection {generation} stopping");
                return;
            }
            Ok(n) => n,
            Err(err) => {
                if let Some(inner) = inner.upgrade() {
                    inner.collapse(generation, &RosdbgError::from(err));
                }
                return;
            }
        };
        tracing::trace!("Read {n} bytes");
        decoder.push(&buf[..n]);

        loop {
            match decoder.next_messages() {
                Ok(Some(batch)) => {
                    let Some(inner) = inner.upgrade() else {
                        return;
                    };
                    if !inner.apply(generation, batch) {
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    if let Some(inner) = inner.upgrade() {
                        inner.collapse(generation, &RosdbgError::from(err));
                    }
                    return;
                }
            }
        }
    }
}

/// Wait for a torn-down connection's reader, unless `force` or we are it.
fn join_reader(reader: Option<JoinHandle<()>>, force: bool)
{
    let Some(reader) = reader else {
        return;
    };
    if force || reader.thread().id() == thread::current().id() {
        drop(reader);
    } else if reader.join().is_err() {
        tracing::error!("Reader thread panicked");
    }
}

/// Handle to a debug session. Clones share the same session.
///
/// ## Example
///
/// ```rust,no_run
/// use rosdbg_core::session::Session;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>>
/// {
///     let session = Session::new();
///     let notifications = session.take_notification_receiver()?;
///     session.start_tcp("127.0.0.1", 5000)?;
///     for notification in notifications {
///         println!("{}", notification.event.describe());
///     }
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Session
{
    inner: Arc<Inner>,
}

impl fmt::Debug for Session
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let state = self.inner.lock();
        f.debug_struct("Session")
            .field("mode", &state.mode)
            .field("state", &state.session_state())
            .field("sequence", &state.sequence)
            .finish_non_exhaustive()
    }
}

impl Default for Session
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl Session
{
    /// New closed session with its own symbol context.
    #[must_use]
    pub fn new() -> Self
    {
        Self::with_symbols(Arc::new(SymbolContext::new()))
    }

    /// New closed session sharing `symbols`.
    #[must_use]
    pub fn with_symbols(symbols: Arc<SymbolContext>) -> Self
    {
        let (sender, receiver) = notification_channel();
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    mode: ConnectionMode::Closed,
                    connecting: false,
                    running: false,
                    registers: None,
                    location: SourceLocation::unknown(),
                    generation: 0,
                    sequence: 0,
                    transport: None,
                    reader: None,
                    last_error: None,
                    sender,
                }),
                symbols,
                receiver: Mutex::new(Some(receiver)),
            }),
        }
    }

    /// Take the notification receiver. Only the first call succeeds.
    ///
    /// ## Errors
    ///
    /// [`RosdbgError::NotificationsTaken`] on every later call.
    pub fn take_notification_receiver(&self) -> RosdbgResult<NotificationReceiver>
    {
        self.inner
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(RosdbgError::NotificationsTaken)
    }

    /// Symbol context of this session.
    #[must_use]
    pub fn symbols(&self) -> Arc<SymbolContext>
    {
        Arc::clone(&self.inner.symbols)
    }

    #[must_use]
    pub fn mode(&self) -> ConnectionMode
    {
        self.inner.lock().mode
    }

    #[must_use]
    pub fn state(&self) -> SessionState
    {
        self.inner.lock().session_state()
    }

    #[must_use]
    pub fn is_running(&self) -> bool
    {
        self.inner.lock().running
    }

    /// Reason for the last connection failure, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<String>
    {
        self.inner.lock().last_error.clone()
    }

    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot
    {
        let state = self.inner.lock();
        SessionSnapshot {
            sequence: state.sequence,
            mode: state.mode,
            state: state.session_state(),
            running: state.running,
            registers: state.registers,
            location: state.location.clone(),
            modules: self.inner.symbols.modules(),
            last_error: state.last_error.clone(),
        }
    }

    /// Connect using `config`.
    ///
    /// Any previous connection is closed first (its reader joined). Invalid
    /// settings are rejected before anything changes and produce no
    /// notification, as is a start while another attempt is still connecting
    /// (that attempt is left alone). A transport that fails to open leaves the
    /// session `Closed` with one `ModeChanged(Closed)`.
    ///
    /// ## Errors
    ///
    /// - [`RosdbgError::Config`] for invalid settings
    /// - [`RosdbgError::Busy`] if another connection attempt is in flight
    /// - [`RosdbgError::Transport`] if the transport could not be opened
    pub fn start(&self, config: &TransportConfig) -> RosdbgResult<()>
    {
        config.validate()?;

        // Busy check and teardown of the old connection share one lock
        let (started, previous) = {
            let mut state = self.inner.lock();
            if state.connecting {
                return Err(RosdbgError::Busy);
            }
            let previous = if state.mode == ConnectionMode::Closed && state.transport.is_none() {
                None
            } else {
                tracing::info!("Closing previous connection");
                self.inner.teardown(&mut state, None)
            };
            state.connecting = true;
            (state.generation, previous)
        };
        join_reader(previous, false);
        tracing::info!("Connecting to {config}");

        let opened = transport::open(config);

        let mut state = self.inner.lock();
        if state.generation != started {
            // Closed while we were connecting; that close already notified
            if let Ok(transport) = opened {
                transport.close();
            }
            return Err(RosdbgError::NotConnected);
        }
        state.connecting = false;

        let transport = match opened {
            Ok(transport) => transport,
            Err(err) => {
                tracing::error!("Failed to connect to {config}: {err}");
                state.last_error = Some(err.to_string());
                state.emit(SessionEvent::ModeChanged(ConnectionMode::Closed));
                return Err(err.into());
            }
        };

        state.generation += 1;
        let generation = state.generation;
        let reader = {
            let inner = Arc::downgrade(&self.inner);
            let transport = Arc::clone(&transport);
            thread::Builder::new()
                .name(format!("rosdbg-reader-{generation}"))
                .spawn(move || reader_loop(&inner, &transport, generation))
        };
        let reader = match reader {
            Ok(reader) => reader,
            Err(err) => {
                transport.close();
                state.emit(SessionEvent::ModeChanged(ConnectionMode::Closed));
                return Err(err.into());
            }
        };

        let mode = config.mode();
        self.inner.symbols.initialize();
        state.mode = mode;
        state.running = false;
        state.registers = None;
        state.location = SourceLocation::unknown();
        state.last_error = None;
        state.transport = Some(transport);
        state.reader = Some(reader);
        state.emit(SessionEvent::ModeChanged(mode));
        tracing::info!("Connected via {mode}");
        Ok(())
    }

    /// Connect over a serial port.
    ///
    /// ## Errors
    ///
    /// See [`Session::start`].
    pub fn start_serial(&self, port: impl Into<PathBuf>, baud: u32) -> RosdbgResult<()>
    {
        self.start(&TransportConfig::Serial {
            port: port.into(),
            baud,
        })
    }

    /// Connect over a named pipe.
    ///
    /// ## Errors
    ///
    /// See [`Session::start`].
    pub fn start_pipe(&self, name: impl Into<PathBuf>, mode: PipeMode) -> RosdbgResult<()>
    {
        self.start(&TransportConfig::Pipe {
            name: name.into(),
            mode,
        })
    }

    /// Connect over TCP.
    ///
    /// ## Errors
    ///
    /// See [`Session::start`].
    pub fn start_tcp(&self, host: &str, port: u16) -> RosdbgResult<()>
    {
        self.start(&TransportConfig::Socket {
            host: host.to_string(),
            port,
        })
    }

    /// Close the session.
    ///
    /// Emits exactly one `ModeChanged(Closed)` unless already closed. With
    /// `force` the reader thread is abandoned instead of joined, for shutdown
    /// paths that must not wait.
    pub fn close(&self, force: bool)
    {
        let reader = {
            let mut state = self.inner.lock();
            if state.mode == ConnectionMode::Closed && state.transport.is_none() && !state.connecting {
                return;
            }
            tracing::info!("Closing session{}", if force { " (forced)" } else { "" });
            self.inner.teardown(&mut state, None)
        };
        join_reader(reader, force);
    }

    /// Interrupt the target. Only sent while it is running.
    ///
    /// Returns whether a command went out.
    ///
    /// ## Errors
    ///
    /// [`RosdbgError::NotConnected`] when closed, [`RosdbgError::Transport`]
    /// if the write fails (which also closes the session).
    pub fn break_in(&self) -> RosdbgResult<bool>
    {
        self.run_control(&Command::Break, true)
    }

    /// Resume the target. Only sent while it is stopped.
    ///
    /// ## Errors
    ///
    /// As for [`Session::break_in`].
    pub fn go(&self) -> RosdbgResult<bool>
    {
        self.run_control(&Command::Go, false)
    }

    /// Step into. Only sent while stopped.
    ///
    /// ## Errors
    ///
    /// As for [`Session::break_in`].
    pub fn step(&self) -> RosdbgResult<bool>
    {
        self.run_control(&Command::Step, false)
    }

    /// Step over. Only sent while stopped.
    ///
    /// ## Errors
    ///
    /// As for [`Session::break_in`].
    pub fn next(&self) -> RosdbgResult<bool>
    {
        self.run_control(&Command::Next, false)
    }

    fn run_control(&self, command: &Command, when_running: bool) -> RosdbgResult<bool>
    {
        let (transport, generation) = {
            let state = self.inner.lock();
            let transport = state.transport.clone().ok_or(RosdbgError::NotConnected)?;
            if state.running != when_running {
                tracing::debug!(
                    "Ignoring {} while the target is {}",
                    command.name(),
                    if state.running { "running" } else { "stopped" }
                );
                return Ok(false);
            }
            (transport, state.generation)
        };
        self.send(&transport, generation, command)?;
        Ok(true)
    }

    /// Install breakpoint `id`, returning the address it was placed at.
    ///
    /// ## Errors
    ///
    /// [`RosdbgError::Symbol`] if a source line has no code, otherwise as for
    /// [`Session::break_in`].
    pub fn set_breakpoint(&self, id: u32, location: &BreakpointLocation) -> RosdbgResult<Address>
    {
        let (transport, generation) = self.connection()?;
        let address = match location {
            BreakpointLocation::Address(address) => *address,
            BreakpointLocation::SourceLine { file, line } => self.inner.symbols.address_for_line(file, *line)?,
        };
        tracing::debug!("Breakpoint {id} at {address}");
        self.send(
            &transport,
            generation,
            &Command::SetBreakpoint {
                id,
                address: address.value(),
            },
        )?;
        Ok(address)
    }

    /// Remove breakpoint `id`.
    ///
    /// ## Errors
    ///
    /// As for [`Session::break_in`].
    pub fn clear_breakpoint(&self, id: u32) -> RosdbgResult<()>
    {
        let (transport, generation) = self.connection()?;
        self.send(&transport, generation, &Command::ClearBreakpoint { id })
    }

    /// Request `length` bytes at `address`; the answer arrives as `MemoryData`.
    ///
    /// ## Errors
    ///
    /// As for [`Session::break_in`].
    pub fn read_memory(&self, address: Address, length: u32) -> RosdbgResult<()>
    {
        let (transport, generation) = self.connection()?;
        self.send(
            &transport,
            generation,
            &Command::ReadMemory {
                address: address.value(),
                length,
            },
        )
    }

    /// Write `bytes` to target memory at `address`.
    ///
    /// ## Errors
    ///
    /// [`RosdbgError::Protocol`] if `bytes` does not fit in one frame,
    /// otherwise as for [`Session::break_in`].
    pub fn write_memory(&self, address: Address, bytes: &[u8]) -> RosdbgResult<()>
    {
        let (transport, generation) = self.connection()?;
        self.send(
            &transport,
            generation,
            &Command::WriteMemory {
                address: address.value(),
                bytes: bytes.to_vec(),
            },
        )
    }

    /// Resolve `address` and make it the current source focus.
    pub fn focus_address(&self, address: Address) -> SourceLocation
    {
        let location = self.inner.symbols.file_and_line(address);
        let mut state = self.inner.lock();
        state.location = location.clone();
        state.emit(SessionEvent::FocusChanged {
            address,
            location: location.clone(),
        });
        location
    }

    fn connection(&self) -> RosdbgResult<(Arc<dyn Transport>, u64)>
    {
        let state = self.inner.lock();
        let transport = state.transport.clone().ok_or(RosdbgError::NotConnected)?;
        Ok((transport, state.generation))
    }

    fn send(&self, transport: &Arc<dyn Transport>, generation: u64, command: &Command) -> RosdbgResult<()>
    {
        let bytes = command.encode()?;
        tracing::debug!("Sending {}", command.name());
        if let Err(err) = transport.write(&bytes) {
            let err = RosdbgError::from(err);
            self.inner.collapse(generation, &err);
            return Err(err);
        }
        Ok(())
    }
}

impl Shell for Session
{
    fn focus_address(&self, address: Address) -> SourceLocation
    {
        Session::focus_address(self, address)
    }
}

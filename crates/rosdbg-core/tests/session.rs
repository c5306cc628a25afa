//! Session tests against a fake target on a local TCP socket

use std::cell::RefCell;
use std::fs;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rosdbg_core::prelude::*;
use rosdbg_core::symbols::{LineMapFormat, LineTable, ModuleFormat};
use rosdbg_protocol::{Command, CommandDecoder, Frame, StopReport, WireEvent};

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

/// Target end of a connection, speaking the wire protocol by hand.
struct FakeTarget
{
    stream: TcpStream,
    commands: CommandDecoder,
}

impl FakeTarget
{
    fn send(&mut self, events: &[WireEvent])
    {
        for event in events {
            self.stream.write_all(&event.encode().unwrap()).unwrap();
        }
        self.stream.flush().unwrap();
    }

    fn send_bytes(&mut self, bytes: &[u8])
    {
        self.stream.write_all(bytes).unwrap();
        self.stream.flush().unwrap();
    }

    fn expect_command(&mut self) -> Command
    {
        self.stream.set_read_timeout(Some(TIMEOUT)).unwrap();
        loop {
            if let Some(mut batch) = self.commands.next_messages().unwrap() {
                assert_eq!(batch.len(), 1);
                return batch.remove(0);
            }
            let mut buf = [0u8; 256];
            let n = self.stream.read(&mut buf).unwrap();
            assert!(n > 0, "session hung up");
            self.commands.push(&buf[..n]);
        }
    }
}

/// Connect `session` to a fresh fake target.
fn connect(session: &Session) -> FakeTarget
{
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    session.start_tcp("127.0.0.1", port).unwrap();
    let (stream, _) = listener.accept().unwrap();
    FakeTarget {
        stream,
        commands: CommandDecoder::new(),
    }
}

fn next_event(notifications: &Receiver<Notification>) -> SessionEvent
{
    notifications.recv_timeout(TIMEOUT).expect("expected a notification").event
}

fn assert_quiet(notifications: &Receiver<Notification>)
{
    match notifications.recv_timeout(QUIET) {
        Err(RecvTimeoutError::Timeout) => {}
        other => panic!("unexpected notification: {other:?}"),
    }
}

fn registers_at(eip: u32) -> Registers
{
    Registers {
        eip,
        esp: 0x8000_f000,
        ..Registers::default()
    }
}

fn symbol_dir() -> tempfile::TempDir
{
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("ntoskrnl.lines"),
        "size 0x100\n0x00 ntoskrnl/ke/main.c 10\n0x40 ntoskrnl/ke/main.c 12\n0x60 ntoskrnl/ke/i386/kiinit.c 120\n",
    )
    .unwrap();
    dir
}

#[test]
fn test_ntoskrnl_scenario_with_symbols()
{
    let dir = symbol_dir();
    let session = Session::new();
    session.symbols().set_output_path(dir.path());
    let notifications = session.take_notification_receiver().unwrap();

    let mut target = connect(&session);
    assert_eq!(next_event(&notifications), SessionEvent::ModeChanged(ConnectionMode::Socket));
    assert_eq!(session.state(), SessionState::Stopped);

    target.send(&[
        WireEvent::ModuleLoaded {
            address: 0x1000,
            name: "ntoskrnl".to_string(),
        },
        WireEvent::RegistersChanged(registers_at(0x1050)),
    ]);

    let SessionEvent::ModuleLoaded(module) = next_event(&notifications) else {
        panic!("expected ModuleLoaded");
    };
    assert_eq!(module.short_name, "ntoskrnl");
    assert!(module.resolved);
    assert_eq!(module.size, 0x100);

    let expected = SourceLocation::new("ntoskrnl/ke/main.c", 12);
    assert_eq!(
        next_event(&notifications),
        SessionEvent::RegistersChanged {
            registers: registers_at(0x1050),
            location: expected.clone(),
        }
    );
    assert_eq!(session.symbols().file_and_line(Address::from(0x1050)), expected);

    let snapshot = session.snapshot();
    assert_eq!(snapshot.location, expected);
    assert_eq!(snapshot.registers.map(|regs| regs.eip), Some(0x1050));
    assert_eq!(snapshot.modules.len(), 1);

    session.close(false);
}

#[test]
fn test_ntoskrnl_scenario_without_symbols()
{
    let dir = tempfile::tempdir().unwrap();
    let session = Session::new();
    session.symbols().set_output_path(dir.path());
    let notifications = session.take_notification_receiver().unwrap();

    let mut target = connect(&session);
    next_event(&notifications);
    target.send(&[
        WireEvent::ModuleLoaded {
            address: 0x1000,
            name: "ntoskrnl".to_string(),
        },
        WireEvent::RegistersChanged(registers_at(0x1050)),
    ]);

    let SessionEvent::ModuleLoaded(module) = next_event(&notifications) else {
        panic!("expected ModuleLoaded");
    };
    assert!(!module.resolved);
    assert!(matches!(
        session.symbols().module_error(module.base),
        Some(SymbolError::NotFound { .. })
    ));
    assert_eq!(
        next_event(&notifications),
        SessionEvent::RegistersChanged {
            registers: registers_at(0x1050),
            location: SourceLocation::unknown(),
        }
    );
    assert_eq!(
        session.symbols().file_and_line(Address::from(0x1050)),
        SourceLocation::unknown()
    );
}

#[test]
fn test_stop_report_applies_modules_before_registers()
{
    let dir = symbol_dir();
    let session = Session::new();
    session.symbols().set_output_path(dir.path());
    let notifications = session.take_notification_receiver().unwrap();

    let mut target = connect(&session);
    next_event(&notifications);
    target.send(&[WireEvent::RunningChanged(true)]);
    assert_eq!(next_event(&notifications), SessionEvent::RunningChanged(true));

    let report = StopReport {
        modules: vec![(0x1000, "ntoskrnl.exe".to_string())],
        running: false,
        registers: registers_at(0x1065),
    };
    target.send_bytes(&report.encode().unwrap());

    assert!(matches!(next_event(&notifications), SessionEvent::ModuleLoaded(_)));
    assert_eq!(next_event(&notifications), SessionEvent::RunningChanged(false));
    assert_eq!(
        next_event(&notifications),
        SessionEvent::RegistersChanged {
            registers: registers_at(0x1065),
            location: SourceLocation::new("ntoskrnl/ke/i386/kiinit.c", 120),
        }
    );
}

#[test]
fn test_repeated_module_load_is_silent()
{
    let session = Session::new();
    let notifications = session.take_notification_receiver().unwrap();
    let mut target = connect(&session);
    next_event(&notifications);

    let load = WireEvent::ModuleLoaded {
        address: 0x1000,
        name: "ntoskrnl.exe".to_string(),
    };
    target.send(&[load.clone(), load]);
    assert!(matches!(next_event(&notifications), SessionEvent::ModuleLoaded(_)));
    assert_quiet(&notifications);

    // A different image at the same base replaces the entry
    target.send(&[WireEvent::ModuleLoaded {
        address: 0x1000,
        name: "hal.dll".to_string(),
    }]);
    let SessionEvent::ModuleLoaded(module) = next_event(&notifications) else {
        panic!("expected ModuleLoaded");
    };
    assert_eq!(module.short_name, "hal");
    assert_eq!(session.symbols().modules().len(), 1);

    target.send(&[WireEvent::ModuleUnloaded { address: 0x1000 }]);
    assert!(matches!(next_event(&notifications), SessionEvent::ModuleUnloaded(_)));
    assert!(session.symbols().modules().is_empty());
}

#[test]
fn test_run_control_follows_run_state()
{
    let session = Session::new();
    let notifications = session.take_notification_receiver().unwrap();
    let mut target = connect(&session);
    next_event(&notifications);

    // Stopped: break is a no-op, go is sent
    assert!(!session.break_in().unwrap());
    assert!(session.go().unwrap());
    assert_eq!(target.expect_command(), Command::Go);

    // Sending go does not change the run state by itself
    assert_eq!(session.state(), SessionState::Stopped);
    target.send(&[WireEvent::RunningChanged(true)]);
    assert_eq!(next_event(&notifications), SessionEvent::RunningChanged(true));
    assert_eq!(session.state(), SessionState::Running);
    assert!(session.snapshot().can_break());

    // Running: go, step and next are no-ops, break is sent
    assert!(!session.go().unwrap());
    assert!(!session.step().unwrap());
    assert!(!session.next().unwrap());
    assert!(session.break_in().unwrap());
    assert_eq!(target.expect_command(), Command::Break);

    target.send(&[WireEvent::RunningChanged(false)]);
    assert_eq!(next_event(&notifications), SessionEvent::RunningChanged(false));
    assert!(session.step().unwrap());
    assert_eq!(target.expect_command(), Command::Step);
    assert!(session.next().unwrap());
    assert_eq!(target.expect_command(), Command::Next);
}

#[test]
fn test_duplicate_running_state_is_not_notified()
{
    let session = Session::new();
    let notifications = session.take_notification_receiver().unwrap();
    let mut target = connect(&session);
    next_event(&notifications);

    target.send(&[WireEvent::RunningChanged(false), WireEvent::RunningChanged(true)]);
    assert_eq!(next_event(&notifications), SessionEvent::RunningChanged(true));
    target.send(&[WireEvent::RunningChanged(true)]);
    assert_quiet(&notifications);
}

#[test]
fn test_breakpoints_and_memory()
{
    let dir = symbol_dir();
    let session = Session::new();
    session.symbols().set_output_path(dir.path());
    let notifications = session.take_notification_receiver().unwrap();
    let mut target = connect(&session);
    next_event(&notifications);

    target.send(&[WireEvent::ModuleLoaded {
        address: 0x1000,
        name: "ntoskrnl".to_string(),
    }]);
    next_event(&notifications);

    let address = session
        .set_breakpoint(
            1,
            &BreakpointLocation::SourceLine {
                file: "main.c".to_string(),
                line: 12,
            },
        )
        .unwrap();
    assert_eq!(address, Address::from(0x1040));
    assert_eq!(
        target.expect_command(),
        Command::SetBreakpoint {
            id: 1,
            address: 0x1040
        }
    );

    assert!(matches!(
        session.set_breakpoint(
            2,
            &BreakpointLocation::SourceLine {
                file: "nowhere.c".to_string(),
                line: 1,
            },
        ),
        Err(RosdbgError::Symbol(SymbolError::LineNotFound { .. }))
    ));

    session
        .set_breakpoint(3, &BreakpointLocation::Address(Address::from(0x2000)))
        .unwrap();
    assert_eq!(
        target.expect_command(),
        Command::SetBreakpoint {
            id: 3,
            address: 0x2000
        }
    );
    session.clear_breakpoint(3).unwrap();
    assert_eq!(target.expect_command(), Command::ClearBreakpoint { id: 3 });

    session.read_memory(Address::from(0x1000), 4).unwrap();
    assert_eq!(
        target.expect_command(),
        Command::ReadMemory {
            address: 0x1000,
            length: 4
        }
    );
    target.send(&[WireEvent::MemoryData {
        address: 0x1000,
        bytes: vec![0x4d, 0x5a, 0x90, 0x00],
    }]);
    assert_eq!(
        next_event(&notifications),
        SessionEvent::MemoryData {
            address: Address::from(0x1000),
            bytes: vec![0x4d, 0x5a, 0x90, 0x00],
        }
    );

    session.write_memory(Address::from(0x1050), &[0xcc]).unwrap();
    assert_eq!(
        target.expect_command(),
        Command::WriteMemory {
            address: 0x1050,
            bytes: vec![0xcc]
        }
    );
    assert!(matches!(
        session.write_memory(Address::from(0x1050), &vec![0u8; 8192]),
        Err(RosdbgError::Protocol(_))
    ));
}

#[test]
fn test_raw_target_output_is_forwarded()
{
    let session = Session::new();
    let notifications = session.take_notification_receiver().unwrap();
    let mut target = connect(&session);
    next_event(&notifications);

    target.send_bytes(b"(ntoskrnl/ke/main.c:42) KiSystemStartup\n");
    let SessionEvent::RawTraffic(bytes) = next_event(&notifications) else {
        panic!("expected RawTraffic");
    };
    assert!(String::from_utf8_lossy(&bytes).contains("KiSystemStartup"));
}

#[test]
fn test_forced_close_emits_one_closed()
{
    let session = Session::new();
    let notifications = session.take_notification_receiver().unwrap();
    let mut target = connect(&session);
    next_event(&notifications);
    target.send(&[WireEvent::RunningChanged(true)]);
    next_event(&notifications);

    session.close(true);
    assert_eq!(next_event(&notifications), SessionEvent::ModeChanged(ConnectionMode::Closed));
    session.close(true);
    session.close(false);
    assert_quiet(&notifications);

    let snapshot = session.snapshot();
    assert_eq!(snapshot.state, SessionState::Closed);
    assert!(!snapshot.running);
    assert!(snapshot.registers.is_none());
    assert!(snapshot.modules.is_empty());
    assert!(matches!(session.go(), Err(RosdbgError::NotConnected)));
}

/// Line maps that take a long time to parse.
#[derive(Debug, Default)]
struct SlowLineMaps
{
    parsing: Arc<AtomicBool>,
}

const SLOW_PARSE: Duration = Duration::from_millis(1500);

impl ModuleFormat for SlowLineMaps
{
    fn name(&self) -> &'static str
    {
        "slow line map"
    }

    fn candidates(&self, module: &str) -> Vec<String>
    {
        LineMapFormat.candidates(module)
    }

    fn parse(&self, path: &Path) -> Result<LineTable, SymbolError>
    {
        self.parsing.store(true, Ordering::SeqCst);
        std::thread::sleep(SLOW_PARSE);
        LineMapFormat.parse(path)
    }
}

#[test]
fn test_close_does_not_wait_for_symbol_parsing()
{
    let dir = symbol_dir();
    let format = SlowLineMaps::default();
    let parsing = Arc::clone(&format.parsing);
    let symbols = Arc::new(SymbolContext::with_formats(vec![Box::new(format)]));
    symbols.set_output_path(dir.path());
    let session = Session::with_symbols(symbols);
    let notifications = session.take_notification_receiver().unwrap();

    let mut target = connect(&session);
    next_event(&notifications);
    target.send(&[WireEvent::ModuleLoaded {
        address: 0x1000,
        name: "ntoskrnl".to_string(),
    }]);
    let deadline = Instant::now() + TIMEOUT;
    while !parsing.load(Ordering::SeqCst) {
        assert!(Instant::now() < deadline, "symbols never parsed");
        std::thread::sleep(Duration::from_millis(10));
    }

    // The reader is inside the parse; the session must stay responsive
    let started = Instant::now();
    assert_eq!(session.state(), SessionState::Stopped);
    session.close(true);
    assert!(started.elapsed() < Duration::from_millis(200), "close blocked for {:?}", started.elapsed());
    assert_eq!(next_event(&notifications), SessionEvent::ModeChanged(ConnectionMode::Closed));

    // Once the parse finishes its result belongs to a closed connection
    std::thread::sleep(SLOW_PARSE);
    assert_quiet(&notifications);
    assert!(session.symbols().modules().is_empty());
    assert_eq!(session.state(), SessionState::Closed);
}

#[test]
fn test_severed_transport_collapses_once()
{
    let session = Session::new();
    let notifications = session.take_notification_receiver().unwrap();
    let mut target = connect(&session);
    next_event(&notifications);
    target.send(&[
        WireEvent::ModuleLoaded {
            address: 0x1000,
            name: "ntoskrnl".to_string(),
        },
        WireEvent::RunningChanged(true),
    ]);
    next_event(&notifications);
    next_event(&notifications);

    drop(target);
    assert_eq!(next_event(&notifications), SessionEvent::ModeChanged(ConnectionMode::Closed));
    assert_quiet(&notifications);

    assert_eq!(session.state(), SessionState::Closed);
    assert!(session.last_error().is_some_and(|reason| reason.contains("severed")));
    assert!(session.symbols().modules().is_empty());
    assert!(matches!(session.break_in(), Err(RosdbgError::NotConnected)));
}

#[test]
fn test_unknown_frame_desyncs_before_applying()
{
    let session = Session::new();
    let notifications = session.take_notification_receiver().unwrap();
    let mut target = connect(&session);
    next_event(&notifications);

    target.send_bytes(&Frame::new(0x7f, vec![1, 2, 3]).unwrap().encode());
    assert_eq!(next_event(&notifications), SessionEvent::ModeChanged(ConnectionMode::Closed));
    assert_quiet(&notifications);
    assert!(session.last_error().is_some());
}

#[cfg(unix)]
#[test]
fn test_start_while_connecting_leaves_attempt_alone()
{
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vm.sock");
    let session = Session::new();
    let notifications = session.take_notification_receiver().unwrap();

    let waiting = {
        let session = session.clone();
        let path = path.clone();
        std::thread::spawn(move || session.start_pipe(path, PipeMode::Server))
    };
    let deadline = Instant::now() + TIMEOUT;
    while session.state() != SessionState::Connecting {
        assert!(Instant::now() < deadline, "pipe server never started");
        std::thread::sleep(Duration::from_millis(10));
    }

    assert!(matches!(session.start_tcp("127.0.0.1", 9), Err(RosdbgError::Busy)));
    assert_eq!(session.state(), SessionState::Connecting);
    assert_quiet(&notifications);

    let _peer = loop {
        match std::os::unix::net::UnixStream::connect(&path) {
            Ok(stream) => break stream,
            Err(_) => std::thread::sleep(Duration::from_millis(10)),
        }
    };
    waiting.join().unwrap().unwrap();
    assert_eq!(next_event(&notifications), SessionEvent::ModeChanged(ConnectionMode::Pipe));
    assert_eq!(session.state(), SessionState::Stopped);

    session.close(false);
    assert_eq!(next_event(&notifications), SessionEvent::ModeChanged(ConnectionMode::Closed));
}

#[test]
fn test_reconnect_discards_previous_connection()
{
    let session = Session::new();
    let notifications = session.take_notification_receiver().unwrap();
    let mut first = connect(&session);
    assert_eq!(next_event(&notifications), SessionEvent::ModeChanged(ConnectionMode::Socket));

    let mut second = connect(&session);
    assert_eq!(next_event(&notifications), SessionEvent::ModeChanged(ConnectionMode::Closed));
    assert_eq!(next_event(&notifications), SessionEvent::ModeChanged(ConnectionMode::Socket));

    // The first connection was shut down; whatever it still sends goes nowhere
    let _ = first.stream.write_all(&WireEvent::RunningChanged(true).encode().unwrap());
    assert_quiet(&notifications);

    second.send(&[WireEvent::RunningChanged(true)]);
    assert_eq!(next_event(&notifications), SessionEvent::RunningChanged(true));
}

#[test]
fn test_sequence_numbers_increase()
{
    let session = Session::new();
    let notifications = session.take_notification_receiver().unwrap();
    let mut target = connect(&session);
    target.send(&[WireEvent::RunningChanged(true), WireEvent::RunningChanged(false)]);

    let seqs: Vec<u64> = (0..3)
        .map(|_| notifications.recv_timeout(TIMEOUT).unwrap().seq)
        .collect();
    assert_eq!(seqs, vec![1, 2, 3]);
    assert_eq!(session.snapshot().sequence, 3);
}

#[derive(Default)]
struct StatusLine
{
    text: RefCell<String>,
    joined: RefCell<Option<SessionSnapshot>>,
}

impl SessionObserver for StatusLine
{
    fn on_event(&self, event: &SessionEvent)
    {
        *self.text.borrow_mut() = event.describe();
    }

    fn on_registered(&self, snapshot: &SessionSnapshot)
    {
        *self.joined.borrow_mut() = Some(snapshot.clone());
    }
}

#[test]
fn test_late_observer_starts_from_snapshot()
{
    let session = Session::new();
    let mut registry = ObserverRegistry::new(&session, Arc::new(session.clone())).unwrap();
    let early = Rc::new(StatusLine::default());
    registry.register(&early);

    let mut target = connect(&session);
    target.send(&[WireEvent::RunningChanged(true)]);
    while session.snapshot().sequence < 2 {
        std::thread::sleep(Duration::from_millis(10));
    }

    // Joins after both notifications were queued but before they are dispatched
    let late = Rc::new(StatusLine::default());
    registry.register(&late);
    let joined = late.joined.borrow().clone().unwrap();
    assert_eq!(joined.state, SessionState::Running);
    assert_eq!(joined.sequence, 2);

    assert_eq!(registry.dispatch_pending(), 2);
    assert_eq!(*early.text.borrow(), "Target running");
    assert!(late.text.borrow().is_empty());

    session.close(false);
    assert!(registry.dispatch_next(TIMEOUT));
    assert_eq!(*early.text.borrow(), "Connection closed");
    assert_eq!(*late.text.borrow(), "Connection closed");
}

//! Panels: the shell's views, each registered with the session as an observer.
//!
//! Panels are owned by the [`App`](crate::App) as `Rc`s and keep their state
//! in `RefCell`s, since observers receive notifications through `&self`.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use rosdbg_core::observers::{SessionObserver, Shell, UsesDebugConnection, UsesShell, UsesSymbols};
use rosdbg_core::session::{BreakpointLocation, Session, SessionSnapshot, SessionState};
use rosdbg_core::symbols::SymbolContext;
use rosdbg_core::transport::ConnectionMode;
use rosdbg_core::types::{Address, Module, Registers, SourceLocation};
use rosdbg_core::{RosdbgResult, SessionEvent};

/// Maximum number of raw traffic lines retained in memory.
const MAX_TRAFFIC_LINES: usize = 4096;

/// Bytes requested by a memory panel read.
pub const MEMORY_READ_SIZE: u32 = 128;

/// Connection mode, run state and current source location.
pub struct StatusPanel
{
    session: RefCell<Option<Session>>,
    mode: Cell<ConnectionMode>,
    location: RefCell<SourceLocation>,
    last_event: RefCell<Option<String>>,
}

impl Default for StatusPanel
{
    fn default() -> Self
    {
        Self {
            session: RefCell::new(None),
            mode: Cell::new(ConnectionMode::Closed),
            location: RefCell::new(SourceLocation::unknown()),
            last_event: RefCell::new(None),
        }
    }
}

impl StatusPanel
{
    #[must_use]
    pub fn mode(&self) -> ConnectionMode
    {
        self.mode.get()
    }

    #[must_use]
    pub fn state(&self) -> SessionState
    {
        self.session
            .borrow()
            .as_ref()
            .map_or(SessionState::Closed, Session::state)
    }

    #[must_use]
    pub fn location(&self) -> SourceLocation
    {
        self.location.borrow().clone()
    }

    #[must_use]
    pub fn last_event(&self) -> Option<String>
    {
        self.last_event.borrow().clone()
    }

    /// `rosdbg - <mode> - <state> - <file>:<line>`
    #[must_use]
    pub fn title(&self) -> String
    {
        let mut title = format!("rosdbg - {} - {}", self.mode(), self.state());
        let location = self.location.borrow();
        if location.is_known() {
            title.push_str(&format!(" - {location}"));
        }
        title
    }
}

impl UsesDebugConnection for StatusPanel
{
    fn set_debug_connection(&self, session: Session)
    {
        *self.session.borrow_mut() = Some(session);
    }
}

impl SessionObserver for StatusPanel
{
    fn on_event(&self, event: &SessionEvent)
    {
        match event {
            SessionEvent::ModeChanged(mode) => {
                self.mode.set(*mode);
                if *mode == ConnectionMode::Closed {
                    *self.location.borrow_mut() = SourceLocation::unknown();
                }
            }
            SessionEvent::RegistersChanged { location, .. } | SessionEvent::FocusChanged { location, .. } => {
                *self.location.borrow_mut() = location.clone();
            }
            SessionEvent::RawTraffic(_) | SessionEvent::MemoryData { .. } => return,
            SessionEvent::RunningChanged(_) | SessionEvent::ModuleLoaded(_) | SessionEvent::ModuleUnloaded(_) => {}
        }
        *self.last_event.borrow_mut() = Some(event.describe());
    }

    fn on_registered(&self, snapshot: &SessionSnapshot)
    {
        self.mode.set(snapshot.mode);
        *self.location.borrow_mut() = snapshot.location.clone();
        *self.last_event.borrow_mut() = snapshot.last_error.clone();
    }

    fn connection_user(&self) -> Option<&dyn UsesDebugConnection>
    {
        Some(self)
    }
}

/// Register snapshot, remembering the previous stop to highlight changes.
#[derive(Default)]
pub struct RegisterPanel
{
    current: Cell<Option<Registers>>,
    previous: Cell<Option<Registers>>,
}

impl RegisterPanel
{
    #[must_use]
    pub fn registers(&self) -> Option<Registers>
    {
        self.current.get()
    }

    /// `(name, value, changed since the previous stop)` in wire order.
    #[must_use]
    pub fn rows(&self) -> Vec<(&'static str, u32, bool)>
    {
        let Some(current) = self.current.get() else {
            return Vec::new();
        };
        let previous = self.previous.get();
        current
            .iter()
            .enumerate()
            .map(|(index, (name, value))| {
                let changed = previous.is_some_and(|previous| previous.values()[index] != value);
                (name, value, changed)
            })
            .collect()
    }
}

impl SessionObserver for RegisterPanel
{
    fn on_event(&self, event: &SessionEvent)
    {
        match event {
            SessionEvent::RegistersChanged { registers, .. } => {
                self.previous.set(self.current.get());
                self.current.set(Some(*registers));
            }
            SessionEvent::ModeChanged(ConnectionMode::Closed) => {
                self.previous.set(None);
                self.current.set(None);
            }
            _ => {}
        }
    }

    fn on_registered(&self, snapshot: &SessionSnapshot)
    {
        self.current.set(snapshot.registers);
    }
}

/// Loaded modules with their symbol status.
#[derive(Default)]
pub struct ModulePanel
{
    modules: RefCell<Vec<Module>>,
    symbols: RefCell<Option<Arc<SymbolContext>>>,
}

impl ModulePanel
{
    /// Modules sorted by base address.
    #[must_use]
    pub fn modules(&self) -> Vec<Module>
    {
        self.modules.borrow().clone()
    }

    /// Why `module` has no symbols, if it has none.
    #[must_use]
    pub fn symbol_status(&self, module: &Module) -> String
    {
        if module.resolved {
            return format!("0x{:x} bytes", module.size);
        }
        self.symbols
            .borrow()
            .as_ref()
            .and_then(|symbols| symbols.module_error(module.base))
            .map_or_else(|| "no symbols".to_string(), |err| err.to_string())
    }

    fn insert(&self, module: &Module)
    {
        let mut modules = self.modules.borrow_mut();
        modules.retain(|existing| existing.base != module.base);
        let index = modules.partition_point(|existing| existing.base < module.base);
        modules.insert(index, module.clone());
    }
}

impl UsesSymbols for ModulePanel
{
    fn set_symbol_provider(&self, symbols: Arc<SymbolContext>)
    {
        *self.symbols.borrow_mut() = Some(symbols);
    }
}

impl SessionObserver for ModulePanel
{
    fn on_event(&self, event: &SessionEvent)
    {
        match event {
            SessionEvent::ModuleLoaded(module) => self.insert(module),
            SessionEvent::ModuleUnloaded(module) => {
                self.modules.borrow_mut().retain(|existing| existing.base != module.base);
            }
            SessionEvent::ModeChanged(ConnectionMode::Closed) => self.modules.borrow_mut().clear(),
            _ => {}
        }
    }

    fn on_registered(&self, snapshot: &SessionSnapshot)
    {
        for module in &snapshot.modules {
            self.insert(module);
        }
    }

    fn symbol_user(&self) -> Option<&dyn UsesSymbols>
    {
        Some(self)
    }
}

/// Debug print output of the target.
#[derive(Default)]
pub struct TrafficPanel
{
    lines: RefCell<VecDeque<String>>,
    /// Text after the last newline, waiting for the rest of its line
    partial: RefCell<String>,
    scrollback: Cell<usize>,
}

impl TrafficPanel
{
    /// Completed lines followed by the pending partial one.
    #[must_use]
    pub fn lines(&self) -> Vec<String>
    {
        let mut lines: Vec<String> = self.lines.borrow().iter().cloned().collect();
        let partial = self.partial.borrow();
        if !partial.is_empty() {
            lines.push(partial.clone());
        }
        lines
    }

    /// Number of lines scrolled back from the end.
    #[must_use]
    pub fn scrollback(&self) -> usize
    {
        self.scrollback.get()
    }

    pub fn scroll_up(&self)
    {
        let max_scroll = self.lines.borrow().len().saturating_sub(1);
        if self.scrollback.get() < max_scroll {
            self.scrollback.set(self.scrollback.get() + 1);
        }
    }

    pub fn scroll_down(&self)
    {
        self.scrollback.set(self.scrollback.get().saturating_sub(1));
    }

    fn push(&self, bytes: &[u8])
    {
        let text = String::from_utf8_lossy(bytes);
        let mut partial = self.partial.borrow_mut();
        let mut lines = self.lines.borrow_mut();
        for ch in text.chars() {
            match ch {
                '\n' => {
                    lines.push_back(std::mem::take(&mut *partial));
                    if lines.len() > MAX_TRAFFIC_LINES {
                        lines.pop_front();
                    }
                }
                '\r' => {}
                _ => partial.push(ch),
            }
        }
        let max_scroll = lines.len().saturating_sub(1);
        if self.scrollback.get() > max_scroll {
            self.scrollback.set(max_scroll);
        }
    }
}

impl SessionObserver for TrafficPanel
{
    fn on_event(&self, event: &SessionEvent)
    {
        if let SessionEvent::RawTraffic(bytes) = event {
            self.push(bytes);
        }
    }
}

/// Source file of the current location with the current line highlighted.
pub struct SourcePanel
{
    source_root: Option<PathBuf>,
    shell: RefCell<Option<Arc<dyn Shell>>>,
    location: RefCell<SourceLocation>,
    /// Instruction pointer of the last stop
    stop_address: Cell<Option<Address>>,
    file: RefCell<Option<SourceFile>>,
    scroll: Cell<usize>,
}

/// A loaded source file, or why it could not be loaded.
struct SourceFile
{
    name: String,
    contents: Result<Rc<[String]>, String>,
}

impl SourcePanel
{
    /// Panel opening files relative to `source_root`.
    #[must_use]
    pub fn new(source_root: Option<PathBuf>) -> Self
    {
        Self {
            source_root,
            shell: RefCell::new(None),
            location: RefCell::new(SourceLocation::unknown()),
            stop_address: Cell::new(None),
            file: RefCell::new(None),
            scroll: Cell::new(0),
        }
    }

    #[must_use]
    pub fn location(&self) -> SourceLocation
    {
        self.location.borrow().clone()
    }

    /// Lines of the current file, or the reason it cannot be shown.
    ///
    /// The file is read once and shared until the location moves to another
    /// file.
    ///
    /// ## Errors
    ///
    /// A message when there is no location or the file cannot be read.
    pub fn lines(&self) -> Result<Rc<[String]>, String>
    {
        let location = self.location.borrow();
        if !location.is_known() {
            return Err("No source location".to_string());
        }
        let mut file = self.file.borrow_mut();
        if !file.as_ref().is_some_and(|file| file.name == location.file) {
            *file = Some(SourceFile {
                name: location.file.clone(),
                contents: self.read(&location.file),
            });
        }
        file.as_ref()
            .map_or_else(|| Err("No source location".to_string()), |file| file.contents.clone())
    }

    /// Offset from the current line at which the view starts.
    #[must_use]
    pub fn scroll(&self) -> usize
    {
        self.scroll.get()
    }

    pub fn scroll_up(&self)
    {
        self.scroll.set(self.scroll.get().saturating_sub(1));
    }

    pub fn scroll_down(&self)
    {
        self.scroll.set(self.scroll.get() + 1);
    }

    /// Move focus back to where the target last stopped.
    ///
    /// Returns `None` if the target has not stopped or no shell is attached.
    pub fn refocus(&self) -> Option<SourceLocation>
    {
        let address = self.stop_address.get()?;
        let shell = self.shell.borrow().clone()?;
        Some(shell.focus_address(address))
    }

    fn read(&self, file: &str) -> Result<Rc<[String]>, String>
    {
        let root = self
            .source_root
            .as_ref()
            .ok_or_else(|| format!("{file}: no source directory configured"))?;
        let path = root.join(file.replace('\\', "/"));
        fs::read_to_string(&path)
            .map(|text| text.lines().map(str::to_string).collect())
            .map_err(|err| format!("{}: {err}", path.display()))
    }

    fn show(&self, location: &SourceLocation)
    {
        *self.location.borrow_mut() = location.clone();
        self.scroll.set(0);
    }
}

impl UsesShell for SourcePanel
{
    fn set_shell(&self, shell: Arc<dyn Shell>)
    {
        *self.shell.borrow_mut() = Some(shell);
    }
}

impl SessionObserver for SourcePanel
{
    fn on_event(&self, event: &SessionEvent)
    {
        match event {
            SessionEvent::RegistersChanged { registers, location } => {
                self.stop_address
                    .set(Some(Address::from(registers.instruction_pointer())));
                self.show(location);
            }
            SessionEvent::FocusChanged { location, .. } => self.show(location),
            SessionEvent::ModeChanged(ConnectionMode::Closed) => {
                self.stop_address.set(None);
                self.show(&SourceLocation::unknown());
            }
            _ => {}
        }
    }

    fn on_registered(&self, snapshot: &SessionSnapshot)
    {
        self.stop_address.set(
            snapshot
                .registers
                .map(|registers| Address::from(registers.instruction_pointer())),
        );
        self.show(&snapshot.location);
    }

    fn shell_user(&self) -> Option<&dyn UsesShell>
    {
        Some(self)
    }
}

/// Last memory read reply.
#[derive(Default)]
pub struct MemoryPanel
{
    session: RefCell<Option<Session>>,
    data: RefCell<Option<(Address, Vec<u8>)>>,
}

impl MemoryPanel
{
    /// Ask the target for [`MEMORY_READ_SIZE`] bytes at `address`.
    ///
    /// ## Errors
    ///
    /// [`rosdbg_core::RosdbgError::NotConnected`] without a session, or
    /// whatever the session reports for the read.
    pub fn request(&self, address: Address) -> RosdbgResult<()>
    {
        let session = self.session.borrow();
        let session = session.as_ref().ok_or(rosdbg_core::RosdbgError::NotConnected)?;
        session.read_memory(address, MEMORY_READ_SIZE)
    }

    /// `(address, hex bytes, printable text)` rows of 16 bytes.
    #[must_use]
    pub fn rows(&self) -> Vec<(Address, String, String)>
    {
        let data = self.data.borrow();
        let Some((base, bytes)) = data.as_ref() else {
            return Vec::new();
        };
        bytes
            .chunks(16)
            .enumerate()
            .map(|(index, chunk)| {
                let address = base.saturating_add(index as u64 * 16);
                let text = chunk
                    .iter()
                    .map(|&byte| if byte.is_ascii_graphic() || byte == b' ' { byte as char } else { '.' })
                    .collect();
                (address, hex::encode(chunk), text)
            })
            .collect()
    }
}

impl UsesDebugConnection for MemoryPanel
{
    fn set_debug_connection(&self, session: Session)
    {
        *self.session.borrow_mut() = Some(session);
    }
}

impl SessionObserver for MemoryPanel
{
    fn on_event(&self, event: &SessionEvent)
    {
        match event {
            SessionEvent::MemoryData { address, bytes } => {
                *self.data.borrow_mut() = Some((*address, bytes.clone()));
            }
            SessionEvent::ModeChanged(ConnectionMode::Closed) => *self.data.borrow_mut() = None,
            _ => {}
        }
    }

    fn connection_user(&self) -> Option<&dyn UsesDebugConnection>
    {
        Some(self)
    }
}

/// A breakpoint placed from the source view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Breakpoint
{
    pub id: u32,
    pub location: SourceLocation,
    /// Where the target put it
    pub address: Address,
}

/// Breakpoints of the current connection, by source line.
#[derive(Default)]
pub struct BreakpointPanel
{
    session: RefCell<Option<Session>>,
    breakpoints: RefCell<Vec<Breakpoint>>,
    last_id: Cell<u32>,
}

impl BreakpointPanel
{
    /// Set a breakpoint on `location`, or clear the one already there.
    ///
    /// Returns the new breakpoint, or `None` if one was cleared.
    ///
    /// ## Errors
    ///
    /// [`rosdbg_core::RosdbgError::NotConnected`] without a connection,
    /// [`rosdbg_core::RosdbgError::Symbol`] if the line has no code, or
    /// whatever the session reports for the command.
    pub fn toggle(&self, location: &SourceLocation) -> RosdbgResult<Option<Breakpoint>>
    {
        let session = self.session.borrow();
        let session = session.as_ref().ok_or(rosdbg_core::RosdbgError::NotConnected)?;

        let existing = self
            .breakpoints
            .borrow()
            .iter()
            .position(|breakpoint| breakpoint.location == *location);
        if let Some(index) = existing {
            let id = self.breakpoints.borrow()[index].id;
            session.clear_breakpoint(id)?;
            self.breakpoints.borrow_mut().remove(index);
            return Ok(None);
        }

        let id = self.last_id.get() + 1;
        let address = session.set_breakpoint(
            id,
            &BreakpointLocation::SourceLine {
                file: location.file.clone(),
                line: location.line,
            },
        )?;
        self.last_id.set(id);
        let breakpoint = Breakpoint {
            id,
            location: location.clone(),
            address,
        };
        self.breakpoints.borrow_mut().push(breakpoint.clone());
        Ok(Some(breakpoint))
    }

    #[must_use]
    pub fn breakpoints(&self) -> Vec<Breakpoint>
    {
        self.breakpoints.borrow().clone()
    }

    /// Whether `file:line` has a breakpoint.
    #[must_use]
    pub fn is_set(&self, file: &str, line: u32) -> bool
    {
        self.breakpoints
            .borrow()
            .iter()
            .any(|breakpoint| breakpoint.location.line == line && breakpoint.location.file == file)
    }
}

impl UsesDebugConnection for BreakpointPanel
{
    fn set_debug_connection(&self, session: Session)
    {
        *self.session.borrow_mut() = Some(session);
    }
}

impl SessionObserver for BreakpointPanel
{
    fn on_event(&self, event: &SessionEvent)
    {
        // The target forgets its breakpoints with the connection
        if *event == SessionEvent::ModeChanged(ConnectionMode::Closed) {
            self.breakpoints.borrow_mut().clear();
        }
    }

    fn connection_user(&self) -> Option<&dyn UsesDebugConnection>
    {
        Some(self)
    }
}

#[cfg(test)]
mod tests
{
    use std::io::Read;
    use std::net::TcpListener;
    use std::time::Duration;

    use super::*;

    fn registers(eip: u32, eax: u32) -> Registers
    {
        Registers {
            eip,
            eax,
            ..Registers::default()
        }
    }

    #[test]
    fn test_status_title_follows_events()
    {
        let panel = StatusPanel::default();
        assert_eq!(panel.title(), "rosdbg - Closed - Not connected");

        panel.on_event(&SessionEvent::ModeChanged(ConnectionMode::Socket));
        panel.on_event(&SessionEvent::RegistersChanged {
            registers: registers(0x1000, 0),
            location: SourceLocation::new("ntoskrnl/ke/main.c", 10),
        });
        assert_eq!(panel.mode(), ConnectionMode::Socket);
        assert!(panel.title().ends_with(" - ntoskrnl/ke/main.c:10"));
        assert_eq!(panel.last_event().as_deref(), Some("Stopped at 0x00001000 (ntoskrnl/ke/main.c:10)"));

        panel.on_event(&SessionEvent::RawTraffic(b"hello".to_vec()));
        assert!(panel.last_event().unwrap().starts_with("Stopped"));

        panel.on_event(&SessionEvent::ModeChanged(ConnectionMode::Closed));
        assert!(!panel.location().is_known());
    }

    #[test]
    fn test_register_panel_marks_changes()
    {
        let panel = RegisterPanel::default();
        assert!(panel.rows().is_empty());

        panel.on_event(&SessionEvent::RegistersChanged {
            registers: registers(0x1000, 1),
            location: SourceLocation::unknown(),
        });
        assert!(panel.rows().iter().all(|(_, _, changed)| !changed));

        panel.on_event(&SessionEvent::RegistersChanged {
            registers: registers(0x1004, 1),
            location: SourceLocation::unknown(),
        });
        let rows = panel.rows();
        assert_eq!(rows[0], ("eax", 1, false));
        assert_eq!(rows[8], ("eip", 0x1004, true));

        panel.on_event(&SessionEvent::ModeChanged(ConnectionMode::Closed));
        assert!(panel.registers().is_none());
    }

    #[test]
    fn test_module_panel_keeps_one_module_per_base()
    {
        let panel = ModulePanel::default();
        let kernel = Module::new("ntoskrnl.exe", Address::from(0x8000_0000));
        let hal = Module::new("hal.dll", Address::from(0x7000_0000));
        panel.on_event(&SessionEvent::ModuleLoaded(kernel.clone()));
        panel.on_event(&SessionEvent::ModuleLoaded(hal.clone()));
        let replacement = Module::new("kdcom.dll", Address::from(0x8000_0000));
        panel.on_event(&SessionEvent::ModuleLoaded(replacement));

        let names: Vec<String> = panel.modules().into_iter().map(|module| module.short_name).collect();
        assert_eq!(names, ["hal", "kdcom"]);
        assert_eq!(panel.symbol_status(&hal), "no symbols");

        panel.on_event(&SessionEvent::ModuleUnloaded(hal));
        assert_eq!(panel.modules().len(), 1);
        panel.on_event(&SessionEvent::ModeChanged(ConnectionMode::Closed));
        assert!(panel.modules().is_empty());
    }

    #[test]
    fn test_traffic_panel_joins_partial_lines()
    {
        let panel = TrafficPanel::default();
        panel.on_event(&SessionEvent::RawTraffic(b"(ntoskrnl/ke/bug.c:2".to_vec()));
        panel.on_event(&SessionEvent::RawTraffic(b"50) KeBugCheck\r\nnext".to_vec()));
        assert_eq!(panel.lines(), ["(ntoskrnl/ke/bug.c:250) KeBugCheck", "next"]);

        panel.on_event(&SessionEvent::RawTraffic(b"\nthird\n".to_vec()));
        panel.scroll_up();
        panel.scroll_up();
        panel.scroll_up();
        assert_eq!(panel.scrollback(), 2);
        panel.scroll_down();
        assert_eq!(panel.scrollback(), 1);
    }

    #[test]
    fn test_source_panel_reads_relative_to_root()
    {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("ntoskrnl/ke")).unwrap();
        fs::write(dir.path().join("ntoskrnl/ke/main.c"), "int a;\nint b;\n").unwrap();

        let panel = SourcePanel::new(Some(dir.path().to_path_buf()));
        assert!(panel.lines().is_err());

        panel.on_event(&SessionEvent::FocusChanged {
            address: Address::from(0x1000),
            location: SourceLocation::new("ntoskrnl/ke/main.c", 2),
        });
        let lines = panel.lines().unwrap();
        assert_eq!(lines.to_vec(), ["int a;", "int b;"]);

        // Moving within the file reuses the loaded lines
        panel.on_event(&SessionEvent::FocusChanged {
            address: Address::from(0x1004),
            location: SourceLocation::new("ntoskrnl/ke/main.c", 1),
        });
        assert!(Rc::ptr_eq(&lines, &panel.lines().unwrap()));

        panel.on_event(&SessionEvent::FocusChanged {
            address: Address::from(0x2000),
            location: SourceLocation::new("hal/missing.c", 1),
        });
        assert!(panel.lines().unwrap_err().contains("missing.c"));
    }

    #[test]
    fn test_source_panel_refocus_needs_a_stop()
    {
        struct FixedShell;
        impl Shell for FixedShell
        {
            fn focus_address(&self, address: Address) -> SourceLocation
            {
                SourceLocation::new("main.c", u32::try_from(address.value()).unwrap_or(0))
            }
        }

        let panel = SourcePanel::new(None);
        panel.set_shell(Arc::new(FixedShell));
        assert!(panel.refocus().is_none());

        panel.on_event(&SessionEvent::RegistersChanged {
            registers: registers(42, 0),
            location: SourceLocation::unknown(),
        });
        assert_eq!(panel.refocus(), Some(SourceLocation::new("main.c", 42)));
    }

    #[test]
    fn test_memory_panel_rows()
    {
        let panel = MemoryPanel::default();
        assert!(panel.request(Address::from(0x1000)).is_err());

        let mut bytes = b"MZ\x90\x00".to_vec();
        bytes.resize(20, b'A');
        panel.on_event(&SessionEvent::MemoryData {
            address: Address::from(0x1000),
            bytes,
        });
        let rows = panel.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, Address::from(0x1000));
        assert!(rows[0].1.starts_with("4d5a9000"));
        assert!(rows[0].2.starts_with("MZ.."));
        assert_eq!(rows[1], (Address::from(0x1010), "41414141".to_string(), "AAAA".to_string()));
    }

    #[test]
    fn test_breakpoint_needs_a_connection()
    {
        let panel = BreakpointPanel::default();
        let location = SourceLocation::new("ntoskrnl/ke/main.c", 12);
        assert!(matches!(panel.toggle(&location), Err(rosdbg_core::RosdbgError::NotConnected)));

        panel.set_debug_connection(Session::new());
        assert!(matches!(panel.toggle(&location), Err(rosdbg_core::RosdbgError::NotConnected)));
        assert!(panel.breakpoints().is_empty());
    }

    #[test]
    fn test_breakpoint_toggles_on_source_line()
    {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("ntoskrnl.lines"),
            "size 0x100\n0x00 ntoskrnl/ke/main.c 10\n0x40 ntoskrnl/ke/main.c 12\n",
        )
        .unwrap();
        let session = Session::new();
        session.symbols().set_output_path(dir.path());
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        session.start_tcp("127.0.0.1", listener.local_addr().unwrap().port()).unwrap();
        let (mut target, _) = listener.accept().unwrap();
        target.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        session.symbols().load_module("ntoskrnl.exe", Address::from(0x1000));

        let panel = BreakpointPanel::default();
        panel.set_debug_connection(session.clone());
        let location = SourceLocation::new("ntoskrnl/ke/main.c", 12);

        let breakpoint = panel.toggle(&location).unwrap().unwrap();
        assert_eq!(breakpoint.id, 1);
        assert_eq!(breakpoint.address, Address::from(0x1040));
        assert!(panel.is_set("ntoskrnl/ke/main.c", 12));
        let mut buf = [0u8; 64];
        let n = target.read(&mut buf).unwrap();
        assert!(n > 2 && buf[..2] == [0xFE, 0xDB]);

        // No code on that line; nothing is recorded
        let nowhere = SourceLocation::new("ntoskrnl/ke/main.c", 99);
        assert!(matches!(panel.toggle(&nowhere), Err(rosdbg_core::RosdbgError::Symbol(_))));
        assert_eq!(panel.breakpoints().len(), 1);

        assert!(panel.toggle(&location).unwrap().is_none());
        assert!(!panel.is_set("ntoskrnl/ke/main.c", 12));
        assert!(target.read(&mut buf).unwrap() > 0);

        let again = panel.toggle(&location).unwrap().unwrap();
        assert_eq!(again.id, 2);
        panel.on_event(&SessionEvent::ModeChanged(ConnectionMode::Closed));
        assert!(panel.breakpoints().is_empty());
        session.close(true);
    }
}

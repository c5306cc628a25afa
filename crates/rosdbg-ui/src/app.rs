//! Application state and logic

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use rosdbg_core::observers::{ObserverRegistry, Shell};
use rosdbg_core::session::{Session, SessionState};
use rosdbg_core::transport::TransportConfig;
use rosdbg_core::types::Address;
use rosdbg_core::{RosdbgError, RosdbgResult};
use ratatui::widgets::TableState;

use crate::panels::{
    BreakpointPanel, MemoryPanel, ModulePanel, RegisterPanel, SourcePanel, StatusPanel, TrafficPanel,
};

/// Application state
pub struct App
{
    pub session: Session,
    registry: ObserverRegistry,
    pub status: Rc<StatusPanel>,
    pub registers: Rc<RegisterPanel>,
    pub modules: Rc<ModulePanel>,
    pub traffic: Rc<TrafficPanel>,
    pub source: Rc<SourcePanel>,
    pub memory: Rc<MemoryPanel>,
    pub breakpoints: Rc<BreakpointPanel>,
    /// Target used by the connect key
    connection: Option<TransportConfig>,
    /// Connection attempt running off the UI thread
    connecting: Option<JoinHandle<RosdbgResult<()>>>,
    /// Whether the application should exit
    pub should_quit: bool,
    /// Current view mode
    pub view_mode: ViewMode,
    /// State for the modules table
    pub modules_state: TableState,
    /// Error message to display (if any)
    pub error_message: Option<String>,
}

/// Different view modes in the TUI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode
{
    /// Status, registers and modules side by side
    Overview,
    Source,
    Modules,
    Memory,
    /// Debug print output of the target
    Traffic,
    Breakpoints,
}

impl App
{
    /// Create the application and register its panels with `session`.
    ///
    /// `connection` is the target the connect key dials; nothing is dialled
    /// until [`App::connect`] or the key is used.
    ///
    /// ## Errors
    ///
    /// [`RosdbgError::NotificationsTaken`] if something else already consumes
    /// the session's notifications.
    pub fn new(
        session: Session,
        source_root: Option<PathBuf>,
        connection: Option<TransportConfig>,
    ) -> RosdbgResult<Self>
    {
        // The session is its own shell: focus changes go out as notifications
        let shell: Arc<dyn Shell> = Arc::new(session.clone());
        let mut registry = ObserverRegistry::new(&session, shell)?;

        let status = Rc::new(StatusPanel::default());
        let registers = Rc::new(RegisterPanel::default());
        let modules = Rc::new(ModulePanel::default());
        let traffic = Rc::new(TrafficPanel::default());
        let source = Rc::new(SourcePanel::new(source_root));
        let memory = Rc::new(MemoryPanel::default());
        let breakpoints = Rc::new(BreakpointPanel::default());
        registry.register(&status);
        registry.register(&registers);
        registry.register(&modules);
        registry.register(&traffic);
        registry.register(&source);
        registry.register(&memory);
        registry.register(&breakpoints);

        let mut modules_state = TableState::default();
        modules_state.select(Some(0));

        Ok(Self {
            session,
            registry,
            status,
            registers,
            modules,
            traffic,
            source,
            memory,
            breakpoints,
            connection,
            connecting: None,
            should_quit: false,
            view_mode: ViewMode::Overview,
            modules_state,
            error_message: None,
        })
    }

    /// Handle a keyboard event
    ///
    /// Returns `true` if the application should quit, `false` otherwise.
    pub fn handle_key_event(&mut self, key_event: KeyEvent) -> bool
    {
        self.error_message = None;

        match key_event.code {
            KeyCode::Char('q' | 'Q') | KeyCode::Esc => {
                self.quit();
                return true;
            }
            KeyCode::Char('c') if key_event.modifiers.contains(KeyModifiers::CONTROL) => {
                self.quit();
                return true;
            }
            KeyCode::Char('1') => self.view_mode = ViewMode::Overview,
            KeyCode::Char('2') => self.view_mode = ViewMode::Source,
            KeyCode::Char('3') => self.view_mode = ViewMode::Modules,
            KeyCode::Char('4') => self.view_mode = ViewMode::Memory,
            KeyCode::Char('5') => self.view_mode = ViewMode::Traffic,
            KeyCode::Char('6') => self.view_mode = ViewMode::Breakpoints,
            KeyCode::Char('o') => self.toggle_connection(),
            KeyCode::Char('t') | KeyCode::F(9) => self.toggle_breakpoint(),
            KeyCode::Char('b') => self.run_control("break", Session::break_in),
            KeyCode::Char('g' | 'c') => self.run_control("go", Session::go),
            KeyCode::Char('s') => self.run_control("step", Session::step),
            KeyCode::Char('n') => self.run_control("next", Session::next),
            KeyCode::Char('m') => self.read_memory_at_stop(),
            KeyCode::Char('f') => {
                if self.source.refocus().is_none() {
                    self.error_message = Some("Target has not stopped yet".to_string());
                }
            }
            KeyCode::Up => self.navigate_up(),
            KeyCode::Down => self.navigate_down(),
            _ => {}
        }

        false
    }

    /// Deliver queued session notifications to the panels (called on each tick).
    pub fn tick(&mut self)
    {
        self.registry.dispatch_pending();
        self.finish_connect();
    }

    /// Target the connect key dials.
    #[must_use]
    pub fn connection(&self) -> Option<&TransportConfig>
    {
        self.connection.as_ref()
    }

    /// Whether a connection attempt is still running.
    #[must_use]
    pub fn is_connecting(&self) -> bool
    {
        self.connecting.is_some()
    }

    /// Start connecting to the configured target in the background.
    ///
    /// A pipe server waits for its peer, so the attempt never runs on the UI
    /// thread; its outcome arrives as notifications, and a failure is shown
    /// on a later [`App::tick`].
    pub fn connect(&mut self)
    {
        if self.connecting.is_some() {
            self.error_message = Some("Already connecting".to_string());
            return;
        }
        let Some(config) = self.connection.clone() else {
            self.error_message = Some("No target configured; pass one to `rosdbg connect`".to_string());
            return;
        };

        let session = self.session.clone();
        let spawned = thread::Builder::new()
            .name("rosdbg-connect".to_string())
            .spawn(move || session.start(&config));
        match spawned {
            Ok(handle) => self.connecting = Some(handle),
            Err(e) => self.error_message = Some(format!("Failed to connect: {e}")),
        }
    }

    /// Connect when closed; otherwise close, which also abandons an attempt
    /// still waiting for its peer.
    fn toggle_connection(&mut self)
    {
        if self.session.state() == SessionState::Closed && self.connecting.is_none() {
            self.connect();
        } else {
            self.session.close(false);
        }
    }

    /// Reap a finished connection attempt and report how it went.
    fn finish_connect(&mut self)
    {
        if !self.connecting.as_ref().is_some_and(JoinHandle::is_finished) {
            return;
        }
        let Some(handle) = self.connecting.take() else {
            return;
        };
        match handle.join() {
            // NotConnected: cancelled by a close while connecting
            Ok(Ok(()) | Err(RosdbgError::NotConnected)) => {}
            Ok(Err(e)) => self.error_message = Some(format!("Failed to connect: {e}")),
            Err(_) => self.error_message = Some("Connection attempt panicked".to_string()),
        }
    }

    fn toggle_breakpoint(&mut self)
    {
        let location = self.source.location();
        if !location.is_known() {
            self.error_message = Some("No source line to put a breakpoint on".to_string());
            return;
        }
        if let Err(e) = self.breakpoints.toggle(&location) {
            self.error_message = Some(format!("Failed to toggle breakpoint at {location}: {e}"));
        }
    }

    fn quit(&mut self)
    {
        self.error_message = Some("Quitting...".to_string());
        self.should_quit = true;
        self.session.close(true);
    }

    fn run_control(&mut self, what: &str, command: fn(&Session) -> RosdbgResult<bool>)
    {
        match command(&self.session) {
            Ok(true) => {}
            Ok(false) => {
                self.error_message = Some(format!("Cannot {what}: target is {}", self.session.state()));
            }
            Err(e) => self.error_message = Some(format!("Failed to {what}: {e}")),
        }
    }

    fn read_memory_at_stop(&mut self)
    {
        let Some(registers) = self.registers.registers() else {
            self.error_message = Some("No registers to read memory from".to_string());
            return;
        };
        let address = Address::from(registers.instruction_pointer());
        if let Err(e) = self.memory.request(address) {
            self.error_message = Some(format!("Failed to read memory: {e}"));
        } else {
            self.view_mode = ViewMode::Memory;
        }
    }

    /// Navigate up in the current view
    fn navigate_up(&mut self)
    {
        match self.view_mode {
            ViewMode::Modules => {
                let i = self.modules_state.selected().unwrap_or(0);
                let max = self.modules.modules().len().saturating_sub(1);
                if max == 0 {
                    return;
                }
                let next = if i == 0 { max } else { i - 1 };
                self.modules_state.select(Some(next));
            }
            ViewMode::Traffic => self.traffic.scroll_up(),
            ViewMode::Source => self.source.scroll_up(),
            ViewMode::Overview | ViewMode::Memory | ViewMode::Breakpoints => {}
        }
    }

    /// Navigate down in the current view
    fn navigate_down(&mut self)
    {
        match self.view_mode {
            ViewMode::Modules => {
                let i = self.modules_state.selected().unwrap_or(0);
                let max = self.modules.modules().len().saturating_sub(1);
                if max == 0 {
                    return;
                }
                let next = if i >= max { 0 } else { i + 1 };
                self.modules_state.select(Some(next));
            }
            ViewMode::Traffic => self.traffic.scroll_down(),
            ViewMode::Source => self.source.scroll_down(),
            ViewMode::Overview | ViewMode::Memory | ViewMode::Breakpoints => {}
        }
    }
}

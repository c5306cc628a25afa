//! Terminal User Interface initialization and management

use std::io::{self, Stdout, Write};
use std::panic;

use crossterm::event::{DisableMouseCapture, EnableMouseCapture};
use crossterm::execute;
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use rosdbg_utils::info;

use crate::app::App;
use crate::event::{Event, EventHandler};

/// Terminal User Interface for rosdbg
///
/// Owns the terminal while the shell runs: raw mode, alternate screen and a
/// panic hook that puts both back.
pub struct Tui
{
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl Tui
{
    /// Enter raw mode and the alternate screen.
    ///
    /// # Errors
    ///
    /// Returns an error if terminal initialization fails (raw mode, alternate screen, etc.)
    pub fn new() -> io::Result<Self>
    {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;

        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;

        let original_hook = panic::take_hook();
        panic::set_hook(Box::new(move |panic_info| {
            let _ = Self::restore();
            original_hook(panic_info);
        }));

        Ok(Self { terminal })
    }

    /// Run the event loop until the user quits.
    ///
    /// Connects to the app's configured target, if any, once the shell is up.
    ///
    /// Quitting closes the session with `force`, so a target that stopped
    /// answering cannot hold up the exit.
    ///
    /// # Errors
    ///
    /// Returns an error if terminal drawing fails or terminal restoration fails
    pub async fn run(&mut self, mut app: App) -> io::Result<()>
    {
        info!("rosdbg shell started");

        let mut events = EventHandler::new();
        app.tick();
        // Dial in the background so the shell is up while a pipe server waits
        if app.connection().is_some() {
            app.connect();
        }

        while !app.should_quit {
            self.terminal.draw(|frame| crate::ui::draw(frame, &mut app))?;

            match events.next().await {
                Some(Event::Key(key_event)) => {
                    if app.handle_key_event(key_event) {
                        break;
                    }
                }
                Some(Event::Tick) => app.tick(),
                None => break,
            }
        }

        info!("rosdbg shell closing");
        Self::restore()?;
        events.stop();

        // Pick up the final Closed notification for the summary below
        app.tick();
        let _ = io::stdout().flush();

        match app.status.last_event() {
            Some(last) => println!("\nSession closed. Last event: {last}"),
            None => println!("\nSession closed."),
        }
        Ok(())
    }

    /// Restore the terminal to its original state
    ///
    /// # Errors
    ///
    /// Returns an error if terminal restoration fails (disabling raw mode, leaving alternate screen, etc.)
    pub fn restore() -> io::Result<()>
    {
        disable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, LeaveAlternateScreen, DisableMouseCapture)?;
        Ok(())
    }
}

impl Drop for Tui
{
    fn drop(&mut self)
    {
        let _ = Self::restore();
    }
}

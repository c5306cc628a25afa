//! Terminal input and tick events

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event as CrosstermEvent, KeyEvent, KeyEventKind};
use tokio::sync::mpsc;

/// How often queued session notifications are drained and the screen redrawn.
pub const TICK_RATE: Duration = Duration::from_millis(100);

/// Events that can occur in the TUI
#[derive(Debug, Clone)]
pub enum Event
{
    /// Keyboard input event
    Key(KeyEvent),
    /// Periodic tick; session notifications are dispatched on it
    Tick,
}

/// Reads crossterm input on a blocking task and interleaves ticks.
pub struct EventHandler
{
    receiver: mpsc::Receiver<Event>,
    should_stop: Arc<AtomicBool>,
}

impl EventHandler
{
    /// Spawn the input task.
    #[must_use]
    pub fn new() -> Self
    {
        let (sender, receiver) = mpsc::channel(100);
        let should_stop = Arc::new(AtomicBool::new(false));

        let stop = Arc::clone(&should_stop);
        tokio::task::spawn_blocking(move || {
            let mut last_tick = Instant::now();
            while !stop.load(Ordering::Relaxed) {
                let timeout = TICK_RATE.saturating_sub(last_tick.elapsed());

                if event::poll(timeout).unwrap_or(false) {
                    if let Ok(CrosstermEvent::Key(key)) = event::read() {
                        // Receiver dropped means the UI is gone
                        if key.kind == KeyEventKind::Press && sender.blocking_send(Event::Key(key)).is_err() {
                            break;
                        }
                    }
                }

                if last_tick.elapsed() >= TICK_RATE {
                    if sender.blocking_send(Event::Tick).is_err() {
                        break;
                    }
                    last_tick = Instant::now();
                }
            }
        });

        Self { receiver, should_stop }
    }

    /// Ask the input task to exit on its next poll.
    pub fn stop(&mut self)
    {
        self.should_stop.store(true, Ordering::Relaxed);
        self.receiver.close();
    }

    /// Get the next event (async)
    pub async fn next(&mut self) -> Option<Event>
    {
        self.receiver.recv().await
    }
}

impl Default for EventHandler
{
    fn default() -> Self
    {
        Self::new()
    }
}

impl Drop for EventHandler
{
    fn drop(&mut self)
    {
        self.stop();
    }
}

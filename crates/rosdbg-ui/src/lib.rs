//! # rosdbg-ui
//!
//! Terminal shell for the rosdbg kernel debugger.
//!
//! Each view is a panel registered with the session's
//! [`ObserverRegistry`](rosdbg_core::ObserverRegistry); the event loop drains
//! queued notifications on every tick, so panels only ever run on the UI
//! thread.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rosdbg_core::Session;
//! use rosdbg_ui::run_tui;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::new();
//! let target = "tcp:localhost:5000".parse()?;
//! run_tui(session, Some("/src/reactos".into()), Some(target)).await?;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod event;
pub mod panels;
pub mod tui;
pub mod ui;
pub mod widgets;

use std::io;
use std::path::PathBuf;

pub use app::App;
use rosdbg_core::transport::TransportConfig;
use rosdbg_core::Session;
pub use tui::Tui;

/// Run the shell on `session` until the user quits.
///
/// Source files are opened relative to `source_root`. The shell connects to
/// `target` once it is running, and the connect key dials it again later.
///
/// ## Errors
///
/// Terminal failures, or the session's notifications already being taken.
pub async fn run_tui(session: Session, source_root: Option<PathBuf>, target: Option<TransportConfig>) -> io::Result<()>
{
    let app = App::new(session, source_root, target).map_err(io::Error::other)?;
    let mut tui = Tui::new()?;
    tui.run(app).await
}

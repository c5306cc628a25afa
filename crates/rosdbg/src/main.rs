use std::cell::Cell;
use std::path::PathBuf;
use std::process;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use rosdbg_core::prelude::*;
use rosdbg_utils::{info, init_logging, init_logging_for_tui, init_logging_with_level, LogFormat, LogGuard, LogLevel};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Remote kernel debugger for ReactOS targets.
#[derive(Parser, Debug)]
#[command(name = "rosdbg")]
#[command(version)]
#[command(about = "Remote kernel debugger for ReactOS targets over serial, pipe or TCP", long_about = None)]
struct Cli
{
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Connect to a target and debug it
    Connect
    {
        /// `tcp:HOST:PORT`, `serial:DEVICE[:BAUD]` or `pipe:PATH[:client|server]`;
        /// defaults to the saved connection
        target: Option<String>,
        /// Print notifications instead of starting the terminal shell
        #[arg(long, default_value_t = false)]
        headless: bool,
        /// Build output directory searched for symbol files
        #[arg(long)]
        output_dir: Option<PathBuf>,
        /// Source tree root for the source view
        #[arg(long)]
        source_dir: Option<PathBuf>,
        /// error, warn, info, debug or trace
        #[arg(long)]
        log_level: Option<String>,
    },
    /// Resolve an address against a module's symbols without a target
    Resolve
    {
        /// Module name as the target reports it (e.g. ntoskrnl.exe)
        #[arg(long)]
        module: String,
        /// Load base of the module (hex with 0x, or decimal)
        #[arg(long)]
        base: Address,
        /// Address to resolve
        address: Address,
        /// Build output directory searched for symbol files
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Show or update saved settings
    Settings
    {
        #[arg(long)]
        source_dir: Option<PathBuf>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long)]
        connection: Option<String>,
        #[arg(long)]
        log_level: Option<String>,
    },
}

fn main()
{
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Connect {
            target,
            headless,
            output_dir,
            source_dir,
            log_level,
        } => {
            let flags = rosdbg_utils::Settings {
                source_directory: source_dir,
                output_directory: output_dir,
                connection: target,
                log_level,
            };
            connect(flags, headless)
        }
        Commands::Resolve {
            module,
            base,
            address,
            output_dir,
        } => resolve(&module, base, address, output_dir),
        Commands::Settings {
            source_dir,
            output_dir,
            connection,
            log_level,
        } => settings(rosdbg_utils::Settings {
            source_directory: source_dir,
            output_directory: output_dir,
            connection,
            log_level,
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// Saved settings with command-line flags on top.
fn effective_settings(flags: rosdbg_utils::Settings) -> CliResult<rosdbg_utils::Settings>
{
    Ok(rosdbg_utils::Settings::load()?.merged(flags))
}

/// Console logging for headless commands, file logging under the shell.
fn start_logging(level: Option<&str>, headless: bool) -> CliResult<LogGuard>
{
    let level = level.map(str::parse::<LogLevel>).transpose()?;
    if headless {
        return Ok(match level {
            Some(level) => init_logging_with_level(level, LogFormat::default())?,
            None => init_logging()?,
        });
    }
    let (path, guard) = init_logging_for_tui(level)?;
    eprintln!("Logging to {}", path.display());
    Ok(guard)
}

fn connect(flags: rosdbg_utils::Settings, headless: bool) -> CliResult<()>
{
    let settings = effective_settings(flags)?;
    let _log_guard = start_logging(settings.log_level.as_deref(), headless)?;

    let target = settings
        .connection
        .as_deref()
        .ok_or("No target given and no saved connection; pass e.g. tcp:localhost:5000")?;
    let config: TransportConfig = target.parse()?;

    let session = Session::new();
    if let Some(dir) = &settings.output_directory {
        session.symbols().set_output_path(dir);
    }

    info!("Connecting to {config}");
    if headless {
        return run_headless(&session, &config);
    }

    // The shell dials the target itself and reports failures in its footer
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(rosdbg_ui::run_tui(session, settings.source_directory, Some(config)))?;
    Ok(())
}

/// Prints every notification to stdout.
#[derive(Default)]
struct ConsoleObserver
{
    closed: Cell<bool>,
}

impl SessionObserver for ConsoleObserver
{
    fn on_event(&self, event: &SessionEvent)
    {
        if *event == SessionEvent::ModeChanged(ConnectionMode::Closed) {
            self.closed.set(true);
        }
        println!("{}", event.describe());
    }

    fn on_registered(&self, snapshot: &SessionSnapshot)
    {
        println!("{} ({})", snapshot.state, snapshot.mode);
    }
}

fn run_headless(session: &Session, config: &TransportConfig) -> CliResult<()>
{
    let shell: Arc<dyn Shell> = Arc::new(session.clone());
    let mut registry = ObserverRegistry::new(session, shell)?;
    let console = Rc::new(ConsoleObserver::default());
    registry.register(&console);

    let interrupted = session.clone();
    ctrlc::set_handler(move || interrupted.close(true))?;

    session.start(config)?;
    while !console.closed.get() {
        registry.dispatch_next(Duration::from_millis(250));
    }
    registry.dispatch_pending();

    if let Some(reason) = session.last_error() {
        println!("Last error: {reason}");
    }
    Ok(())
}

fn resolve(module: &str, base: Address, address: Address, output_dir: Option<PathBuf>) -> CliResult<()>
{
    let settings = effective_settings(rosdbg_utils::Settings {
        output_directory: output_dir,
        ..rosdbg_utils::Settings::default()
    })?;
    let _log_guard = start_logging(settings.log_level.as_deref(), true)?;
    let output_dir = settings
        .output_directory
        .ok_or("No output directory given and none saved; pass --output-dir")?;

    let symbols = SymbolContext::new();
    symbols.set_output_path(&output_dir);
    symbols.initialize();
    let Some(module) = symbols.load_module(module, base) else {
        return Err(format!("{module} is already loaded").into());
    };

    println!("{module}");
    if let Some(reason) = symbols.module_error(module.base) {
        println!("  symbols: {reason}");
    }
    println!("{address} -> {}", symbols.file_and_line(address));
    Ok(())
}

fn settings(flags: rosdbg_utils::Settings) -> CliResult<()>
{
    let changed = flags != rosdbg_utils::Settings::default();
    if let Some(connection) = &flags.connection {
        // Reject connection strings that would fail later
        connection.parse::<TransportConfig>()?.validate()?;
    }
    let settings = effective_settings(flags)?;

    if changed {
        let path = settings.save()?;
        println!("Saved {}", path.display());
    }

    let show = |value: Option<String>| value.unwrap_or_else(|| "(not set)".to_string());
    println!(
        "source directory: {}",
        show(settings.source_directory.map(|dir| dir.display().to_string()))
    );
    println!(
        "output directory: {}",
        show(settings.output_directory.map(|dir| dir.display().to_string()))
    );
    println!("connection:       {}", show(settings.connection));
    println!("log level:        {}", show(settings.log_level));
    Ok(())
}

//! taskring - run several programs in one terminal
//!
//! Each program runs as a cooperative task with its own virtual screen.
//! One task is focused at a time; the status bar on the last row lists them
//! all.
//!
//! # Quick Start
//!
//! ```text
//! taskring              # Start the programs listed in config.toml
//! taskring clock ps     # Start clock and ps
//! taskring --list       # Show builtin programs
//! ```
//!
//! # Keybindings
//!
//! | Key | Action |
//! |-----|--------|
//! | Ctrl+T | New task |
//! | Ctrl+Right / Ctrl+Left | Next/Previous task |
//! | Ctrl+W | Close focused task |
//! | Ctrl+Q | Quit |

use std::env;
use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Mutex;

use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use taskring::config::{self, Config};
use taskring::core::host::{Display, ProgramLoader, SystemClock};
use taskring::programs::ProgramRegistry;
use taskring::ui::{Chord, CrosstermDisplay, CrosstermEvents, HotkeyInterceptor};
use taskring::wm::{Scheduler, SessionExit};

/// Command line options
#[derive(Default)]
struct Options {
    /// Explicit config file
    config: Option<PathBuf>,
    /// Programs to start instead of `startup`
    programs: Vec<String>,
}

/// Version string from Cargo.toml
const VERSION: &str = env!("CARGO_PKG_VERSION");

fn print_version() {
    eprintln!("taskring {}", VERSION);
}

fn print_help() {
    eprintln!("taskring {} - cooperative multitasking in one terminal", VERSION);
    eprintln!();
    eprintln!("Usage: taskring [OPTIONS] [PROGRAM]...");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <PATH>   Read configuration from PATH");
    eprintln!("  -l, --list            List builtin programs");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Keybindings (defaults):");
    eprintln!("  Ctrl+T                New task (default program)");
    eprintln!("  Ctrl+Right            Next task");
    eprintln!("  Ctrl+Left             Previous task");
    eprintln!("  Ctrl+W                Close focused task");
    eprintln!("  Ctrl+Q                Quit");
    eprintln!();
    eprintln!("Configuration: ~/.taskring/config.toml");
    eprintln!("Log:           ~/.taskring/taskring.log (level from TASKRING_LOG)");
}

fn print_programs(registry: &ProgramRegistry) {
    for name in registry.catalogue() {
        println!("{}", name);
    }
}

fn parse_args() -> Result<Options, String> {
    let args: Vec<String> = env::args().collect();
    let mut options = Options::default();
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-l" | "--list" => {
                print_programs(&ProgramRegistry::builtin());
                std::process::exit(0);
            }
            "-c" | "--config" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing config path".to_string());
                }
                options.config = Some(PathBuf::from(&args[i]));
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
            program => options.programs.push(program.to_string()),
        }
        i += 1;
    }

    Ok(options)
}

/// Log to `~/.taskring/taskring.log`; stdout belongs to the compositor
fn init_logging() -> Result<(), String> {
    // Task panics are caught by the scheduler; keep their text off the screen
    std::panic::set_hook(Box::new(|info| {
        error!("{}", info);
    }));

    let log_path = config::config_dir()
        .map(|dir| dir.join("taskring.log"))
        .unwrap_or_else(|| PathBuf::from("taskring.log"));

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Cannot open log file {}: {}", log_path.display(), e))?;

    install_subscriber(log_file)
}

fn install_subscriber(file: File) -> Result<(), String> {
    let filter = EnvFilter::try_from_env("TASKRING_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Cannot install logger: {}", e))
}

fn main() -> anyhow::Result<()> {
    let options = match parse_args() {
        Ok(o) => o,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    // Still on the normal screen, so stderr is visible
    if let Err(e) = init_logging() {
        eprintln!("Warning: {}; running without a log", e);
    }
    info!("taskring {} starting...", VERSION);

    let config = match &options.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };

    let hotkeys = HotkeyInterceptor::from_config(&config.hotkeys);
    let quit = Chord::parse(&config.hotkeys.quit)
        .map_err(|e| warn!("Invalid quit chord {:?}: {}", config.hotkeys.quit, e))
        .ok();

    let mut display = CrosstermDisplay::new();
    let (width, height) = display.size()?;
    info!("Terminal size: {}x{}", width, height);

    let mut scheduler = Scheduler::new(
        Box::new(ProgramRegistry::builtin()),
        Rc::new(SystemClock::new()),
        width,
        height,
    )
    .with_hotkeys(hotkeys)
    .with_status_bar(config.status_bar.clone())
    .with_default_program(config.default_program.clone());

    display.init()?;

    let startup = if options.programs.is_empty() {
        &config.startup
    } else {
        &options.programs
    };
    for name in startup {
        if let Err(e) = scheduler.spawn(name, &[]) {
            error!("Startup program {}: {}", name, e);
        }
    }

    let mut events = CrosstermEvents::new(quit);
    let result = scheduler.run(&mut events, &mut display);

    if let Err(e) = display.cleanup() {
        eprintln!("Failed to restore terminal: {}", e);
    }

    match result? {
        SessionExit::Idle => info!("All tasks finished"),
        SessionExit::Terminated => info!("Session terminated"),
    }
    Ok(())
}

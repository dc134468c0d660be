//! cpmsd - Run CP/M programs against a host directory tree.
//!
//! Usage:
//!   cpmsd [OPTIONS] [PROGRAM] [-- command args]
//!
//! Examples:
//!   cpmsd --disk sd --ccp sd/CCP.BIN        # Boot the CCP over ./sd
//!   cpmsd --disk sd hello.com               # Run hello.com directly (no shell)
//!   cpmsd --disk sd -- STAT A:              # Run A:STAT.COM from the disk
//!   cpmsd --config cpmsd.json --read-only B # Write-protect drive B:

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;

use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use log::{LevelFilter, Log, Metadata, Record};
use tokio::sync::mpsc as tokio_mpsc;

use cpmsd_core::bdos::addr;
use cpmsd_core::{CpmConsole, CpmEmulator, EmulatorConfig, ExitReason};

/// CP/M emulator over a host directory tree
#[derive(Parser, Debug)]
#[command(name = "cpmsd")]
#[command(about = "Run CP/M programs with a host directory as their disks")]
struct Args {
    /// .COM executable to run at 0x0100
    program: Option<PathBuf>,

    /// Root of the drive tree (<DIR>/A/0/...)
    #[arg(short, long, value_name = "DIR")]
    disk: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// CCP image loaded at boot and on every warm boot
    #[arg(long, value_name = "FILE")]
    ccp: Option<PathBuf>,

    /// Drive letters to write-protect, e.g. "BC"
    #[arg(long, value_name = "LETTERS")]
    read_only: Option<String>,

    /// Enable syscall tracing
    #[arg(short, long)]
    trace: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Command and arguments to run (instead of shell)
    #[arg(last = true)]
    command: Vec<String>,
}

/// Log records to stderr with raw-mode safe line endings.
struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprint!("[{}] {}\r\n", record.level(), record.args());
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: StderrLogger = StderrLogger;

fn init_logging(args: &Args) {
    let level = if args.trace {
        LevelFilter::Trace
    } else if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

/// Channel-based console that communicates via tokio channels.
struct ChannelConsole {
    /// Receiver for keyboard input
    key_rx: mpsc::Receiver<u8>,
    /// Keys received but not consumed yet
    key_buffer: RefCell<VecDeque<u8>>,
}

impl ChannelConsole {
    fn new(key_rx: mpsc::Receiver<u8>) -> Self {
        Self {
            key_rx,
            key_buffer: RefCell::new(VecDeque::new()),
        }
    }

    /// Move anything already sent into the buffer.
    fn drain(&self) {
        let mut buffer = self.key_buffer.borrow_mut();
        while let Ok(ch) = self.key_rx.try_recv() {
            buffer.push_back(ch);
        }
    }
}

impl CpmConsole for ChannelConsole {
    fn write(&mut self, ch: u8) {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();

        match ch {
            0x00 => {}
            _ => {
                let _ = handle.write_all(&[ch & 0x7F]);
            }
        }
        let _ = handle.flush();
    }

    fn print(&mut self, ch: u8) {
        eprint!("{}", (ch & 0x7F) as char);
    }

    fn has_key(&self) -> bool {
        self.drain();
        !self.key_buffer.borrow().is_empty()
    }

    fn get_key(&mut self) -> Option<u8> {
        self.drain();
        self.key_buffer.get_mut().pop_front()
    }

    fn wait_for_key(&mut self) -> u8 {
        // First check buffer
        if let Some(ch) = self.key_buffer.get_mut().pop_front() {
            return ch;
        }

        // Blocking receive
        match self.key_rx.recv() {
            Ok(ch) => ch,
            Err(_) => 0, // Channel closed
        }
    }
}

/// Translate crossterm key events to CP/M key codes.
fn translate_key(code: KeyCode, modifiers: KeyModifiers) -> Option<u8> {
    // Handle control characters
    if modifiers.contains(KeyModifiers::CONTROL) {
        if let KeyCode::Char(c) = code {
            let upper = c.to_ascii_uppercase();
            if upper.is_ascii_uppercase() {
                return Some(upper as u8 - 64); // Ctrl+A=1, Ctrl+C=3, etc.
            }
        }
    }

    match code {
        KeyCode::Char(c) if c.is_ascii() => Some(c as u8),
        KeyCode::Enter => Some(13),
        KeyCode::Backspace => Some(8),
        KeyCode::Tab => Some(9),
        KeyCode::Esc => Some(27),
        KeyCode::Up => Some(11),
        KeyCode::Down => Some(10),
        KeyCode::Left => Some(8),
        KeyCode::Right => Some(12),
        _ => None,
    }
}

/// Merge the configuration file with command-line overrides.
fn build_config(args: &Args) -> Result<EmulatorConfig, Box<dyn std::error::Error>> {
    let mut config = match &args.config {
        Some(path) => EmulatorConfig::load(path)?,
        None => EmulatorConfig::default(),
    };
    if let Some(disk) = &args.disk {
        config.base_dir = disk.clone();
    }
    if let Some(ccp) = &args.ccp {
        config.ccp = Some(ccp.clone());
    }
    if let Some(letters) = &args.read_only {
        config.read_only.extend(letters.chars().filter(|c| c.is_ascii_alphabetic()));
    }
    config.validate()?;
    Ok(config)
}

/// What to put at the TPA, and the command tail to give it.
struct Program {
    data: Vec<u8>,
    tail: String,
}

/// Pick the transient program: an explicit .COM, or the first command word
/// looked up as A:<WORD>.COM in user area 0.
fn find_program(args: &Args, base: &Path) -> Result<Option<Program>, Box<dyn std::error::Error>> {
    if let Some(path) = &args.program {
        let data = std::fs::read(path)
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
        return Ok(Some(Program {
            data,
            tail: args.command.join(" "),
        }));
    }
    let Some((name, rest)) = args.command.split_first() else {
        return Ok(None);
    };
    let path = base.join("A").join("0").join(format!("{}.COM", name.to_uppercase()));
    let data = std::fs::read(&path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    Ok(Some(Program {
        data,
        tail: rest.join(" "),
    }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&args);

    let config = build_config(&args)?;
    if !config.base_dir.is_dir() {
        return Err(format!("Disk directory not found: {}", config.base_dir.display()).into());
    }

    let has_shell = config.ccp.is_some();
    let program = if has_shell && args.program.is_none() {
        None
    } else {
        find_program(&args, &config.base_dir)?
    };
    if program.is_none() && !has_shell {
        eprintln!("No CCP and no .COM file given.");
        return Err("Nothing to run".into());
    }
    log::info!("drive tree at {}", config.base_dir.display());

    // Create channel for keyboard input
    let (key_tx, key_rx) = mpsc::channel::<u8>();

    // Create shutdown signal
    let (shutdown_tx, mut shutdown_rx) = tokio_mpsc::channel::<()>(1);

    // Create console
    let console = ChannelConsole::new(key_rx);

    // Enable raw mode (gracefully handle non-TTY)
    let raw_mode_enabled = enable_raw_mode().is_ok();

    let command = args.command.join(" ");

    // Spawn emulator in blocking task
    let emu_handle = tokio::task::spawn_blocking(move || {
        let mut emu = CpmEmulator::new(console, &config)?;

        match program {
            Some(program) => {
                // Direct mode: load program at TPA; warm boot goes to the CCP if one is set
                emu.load_com(&program.data);
                emu.set_args(&program.tail);
                emu.run_from(addr::TPA)
            }
            None => {
                // Shell mode: pass the command as args
                emu.set_args(&command);
                emu.run_from(config.ccp_address)
            }
        }
    });

    // Spawn terminal input reader
    let input_handle = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(10)) => {
                    // Poll for terminal events
                    if event::poll(Duration::from_millis(0)).unwrap_or(false) {
                        if let Ok(Event::Key(key_event)) = event::read() {
                            if let Some(ch) = translate_key(key_event.code, key_event.modifiers) {
                                if key_tx.send(ch).is_err() {
                                    break; // Channel closed
                                }
                            }
                        }
                    }
                }
            }
        }
    });

    // Wait for emulator to finish
    let result = emu_handle.await?;

    // Signal input handler to stop
    let _ = shutdown_tx.send(()).await;
    let _ = input_handle.await;

    // Disable raw mode if we enabled it
    if raw_mode_enabled {
        let _ = disable_raw_mode();
    }

    match result {
        Ok(info) => {
            log::debug!("program exited: {:?} at {:#06X}", info.reason, info.pc);
            if let ExitReason::Error(message) = info.reason {
                eprintln!("\nError: {}", message);
            }
        }
        Err(e) => {
            eprintln!("\nError: {}", e);
        }
    }

    Ok(())
}

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver};
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, size as terminal_size};

use ptystream::logging::init_tracing;
use ptystream::pty::ResizeWatcher;
use ptystream::{PtyConfig, PtyError, PtyProcess, SpawnOptions};

/// Bytes requested from the pty per relay iteration.
const RELAY_CHUNK: usize = 4096;

#[derive(Parser, Debug)]
#[command(name = "ptyctl")]
#[command(about = "Run a command in a pseudo-terminal and relay it to this terminal")]
#[command(version)]
struct Args {
    /// Terminal rows (defaults to the current terminal height)
    #[arg(long)]
    rows: Option<u16>,

    /// Terminal columns (defaults to the current terminal width)
    #[arg(long)]
    cols: Option<u16>,

    /// Working directory for the command
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Ask the command not to emit cursor-movement sequences
    #[arg(long)]
    no_cursor_hints: bool,

    /// Config file (defaults to the user config file)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Command to run, with its arguments
    #[arg(trailing_var_arg = true, required = true, num_args = 1..)]
    command: Vec<String>,
}

/// Restores cooked mode when dropped, including on early returns.
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> io::Result<Self> {
        enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let code = run(args)?;
    std::process::exit(code);
}

fn run(args: Args) -> Result<i32> {
    let config = match &args.config {
        Some(path) => {
            let mut config = PtyConfig::load_from(path)?;
            config.apply_env_overrides();
            config
        }
        None => PtyConfig::load()?,
    };

    let (term_cols, term_rows) = terminal_size().unwrap_or((config.cols, config.rows));
    let rows = args.rows.unwrap_or(term_rows);
    let cols = args.cols.unwrap_or(term_cols);

    let mut options = SpawnOptions::new(args.command.clone())
        .dimensions(rows, cols)
        .emit_cursor_hints(!args.no_cursor_hints)
        .config(config);
    if let Some(cwd) = args.cwd {
        options = options.cwd(cwd);
    }

    let mut process = PtyProcess::spawn(options)
        .with_context(|| format!("failed to spawn {:?}", args.command))?;
    tracing::info!(pid = ?process.pid(), "Relaying pty");

    let raw_mode = RawModeGuard::enable().context("failed to enable raw mode")?;
    let input = spawn_stdin_reader()?;
    let (size_tx, sizes) = mpsc::channel();
    let watcher = ResizeWatcher::start(size_tx)?;

    let relayed = relay(&mut process, &input, &sizes);

    if let Some(watcher) = watcher {
        watcher.stop();
    }
    drop(raw_mode);
    relayed?;

    let status = process.wait()?;
    process.close(false)?;
    tracing::info!(?status, "Child exited");
    Ok(i32::try_from(status.exit_code()).unwrap_or(1))
}

/// Forward stdin in the background; the relay loop owns all pty writes.
fn spawn_stdin_reader() -> io::Result<Receiver<Vec<u8>>> {
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            let mut stdin = io::stdin();
            let mut buffer = [0u8; 1024];
            loop {
                let read_bytes = match stdin.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(count) => count,
                    Err(_) => break,
                };
                if tx.send(buffer[..read_bytes].to_vec()).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

fn relay(
    process: &mut PtyProcess,
    input: &Receiver<Vec<u8>>,
    sizes: &Receiver<(u16, u16)>,
) -> Result<()> {
    let mut stdout = io::stdout();
    loop {
        while let Ok((rows, cols)) = sizes.try_recv() {
            if let Err(e) = process.setwinsize(rows, cols) {
                tracing::debug!("Resize to {}x{} failed: {}", rows, cols, e);
            }
        }

        while let Ok(bytes) = input.try_recv() {
            match process.write_bytes(&bytes) {
                Ok(_) | Err(PtyError::EndOfStream) => {}
                Err(e) => return Err(e.into()),
            }
        }

        match process.read(RELAY_CHUNK) {
            Ok(text) if text.is_empty() => {}
            Ok(text) => {
                stdout.write_all(text.as_bytes())?;
                stdout.flush()?;
            }
            Err(PtyError::EndOfStream) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
    }
}

//! Decoupled logging pipeline for staging runs.
//!
//! Every `log::*` record is turned into a tagged console line and a timestamped
//! disk line by a single background thread, so slow terminals or disks never stall
//! the sequence.
//!
//! ```text
//! log::info!/warn!/...
//!     |
//! [LogCollector] (log::Log impl, non-blocking)
//!     | (crossbeam unbounded channel)
//!     v
//! [writer thread] --> stdout        "[+] Tunnel active."
//!                 --> logs/<ts>_run.log "[12:00:01.234] [INFO] Tunnel active."
//! ```
//!
//! Targets select the console tag: `success`, `phase` and `detail`; everything
//! else is tagged by level. Debug and trace records are written to disk only.

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{Level, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Internal log line or special marker
enum LogMessage {
    Line(LogLine),
    /// Flush marker with channel sender to signal completion
    Flush(std::sync::mpsc::Sender<()>),
}

/// Get the global logs path relative to the current working directory: ./logs
pub fn get_global_logs_path() -> Result<PathBuf, String> {
    let cwd = std::env::current_dir()
        .map_err(|e| format!("Failed to get current working directory: {}", e))?;
    Ok(cwd.join("logs"))
}

/// Console tag of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Info,
    Success,
    Warn,
    Error,
    Phase,
    Detail,
    /// Disk only
    Debug,
}

impl LineKind {
    /// Classify a `log` record by level and target.
    pub fn classify(level: Level, target: &str) -> Self {
        match level {
            Level::Error => LineKind::Error,
            Level::Warn => LineKind::Warn,
            Level::Info => match target {
                "success" => LineKind::Success,
                "phase" => LineKind::Phase,
                "detail" => LineKind::Detail,
                _ => LineKind::Info,
            },
            Level::Debug | Level::Trace => LineKind::Debug,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            LineKind::Info | LineKind::Phase | LineKind::Detail => "INFO",
            LineKind::Success => "OK",
            LineKind::Warn => "WARN",
            LineKind::Error => "ERROR",
            LineKind::Debug => "DEBUG",
        }
    }
}

/// A log line with metadata
#[derive(Clone, Debug)]
pub struct LogLine {
    pub message: String,
    pub kind: LineKind,
    /// Timestamp of when the log was created
    pub timestamp: String,
}

impl LogLine {
    pub fn new(kind: LineKind, message: impl Into<String>) -> Self {
        LogLine {
            message: message.into(),
            kind,
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
        }
    }

    /// Console rendering, `None` for disk-only lines.
    pub fn render_console(&self) -> Option<String> {
        let text = match self.kind {
            LineKind::Info => format!("[*] {}", self.message),
            LineKind::Success => format!("[+] {}", self.message),
            LineKind::Warn => format!("[!] {}", self.message),
            LineKind::Error => format!("[-] {}", self.message),
            LineKind::Phase => format!("\n=== {} ===", self.message),
            LineKind::Detail => format!("    -> {}", self.message),
            LineKind::Debug => return None,
        };
        Some(text)
    }

    /// Disk rendering: `[HH:MM:SS.mmm] [LEVEL] message`
    pub fn render_disk(&self) -> String {
        format!("[{}] [{}] {}\n", self.timestamp, self.kind.label(), self.message)
    }
}

/// Unified logger that handles console and disk dispatch
#[derive(Clone)]
pub struct LogCollector {
    tx: Sender<LogMessage>,
    log_path: Option<PathBuf>,
    console: bool,
}

impl LogCollector {
    /// Create the log directory, open `<ts>_run.log` and start the writer thread.
    pub fn new(log_dir: &Path, console: bool) -> Result<Self, String> {
        std::fs::create_dir_all(log_dir)
            .map_err(|e| format!("Failed to create logs directory: {}", e))?;

        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        let log_path = log_dir.join(format!("{}_run.log", timestamp));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .map_err(|e| format!("Failed to open log file {}: {}", log_path.display(), e))?;

        let sink: Option<Box<dyn Write + Send>> = if console {
            Some(Box::new(std::io::stdout()) as Box<dyn Write + Send>)
        } else {
            None
        };
        Ok(Self::start(Some(file), Some(log_path), sink))
    }

    /// Console rendering without a run log.
    pub fn console_only() -> Self {
        let sink: Box<dyn Write + Send> = Box::new(std::io::stdout());
        Self::start(None, None, Some(sink))
    }

    /// `new(log_dir, true)`, or a console-only collector plus the reason the
    /// run log could not be opened.
    pub fn open_or_console_only(log_dir: &Path) -> (Self, Option<String>) {
        match Self::new(log_dir, true) {
            Ok(collector) => (collector, None),
            Err(reason) => (Self::console_only(), Some(reason)),
        }
    }

    fn start(file: Option<File>, log_path: Option<PathBuf>, console: Option<Box<dyn Write + Send>>) -> Self {
        let (tx, rx) = unbounded::<LogMessage>();
        let echoes = console.is_some();

        // OS thread rather than a tokio task: records arrive from any runtime or thread
        std::thread::spawn(move || {
            let mut file = file;
            let mut console = console;
            while let Ok(msg) = rx.recv() {
                match msg {
                    LogMessage::Line(line) => {
                        if let Some(file) = file.as_mut() {
                            let _ = file.write_all(line.render_disk().as_bytes());
                        }
                        if let (Some(out), Some(text)) = (console.as_mut(), line.render_console()) {
                            let _ = writeln!(out, "{}", text);
                            let _ = out.flush();
                        }
                    }
                    LogMessage::Flush(done) => {
                        if let Some(file) = file.as_mut() {
                            let _ = file.flush();
                            let _ = file.sync_data();
                        }
                        let _ = done.send(());
                    }
                }
            }
        });

        LogCollector {
            tx,
            log_path,
            console: echoes,
        }
    }

    /// Path of the run log on disk, `None` when logging to the console only.
    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    pub fn echoes_to_console(&self) -> bool {
        self.console
    }

    /// Queue a line (non-blocking)
    pub fn log_line(&self, line: LogLine) {
        let _ = self.tx.send(LogMessage::Line(line));
    }

    /// Install as the global `log` backend.
    pub fn install(&self, max_level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
        log::set_boxed_logger(Box::new(self.clone()))?;
        log::set_max_level(max_level);
        Ok(())
    }

    /// Wait for all pending lines to reach disk
    ///
    /// Sends a flush marker down the channel and waits for the writer thread to
    /// process it, so every line logged before this call is durable afterwards.
    pub async fn wait_for_empty(&self) -> Result<(), String> {
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(done_tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;

        tokio::task::spawn_blocking(move || done_rx.recv())
            .await
            .map_err(|e| format!("Flush waiter failed: {}", e))?
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }
}

/// Wires all log::info!(), log::warn!(), log::error!() calls into LogCollector
impl Log for LogCollector {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let kind = LineKind::classify(record.level(), record.target());
            self.log_line(LogLine::new(kind, record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

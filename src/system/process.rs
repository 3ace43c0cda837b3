//! External process invocation: one-shot commands and long-running piped children.
//!
//! A nonzero exit is never an error here. The exit-code semantics of the device
//! tool are not trusted, so `invoke` only logs a warning (see `stderr_diagnostic`)
//! and hands the captured output back; the calling phase decides what is fatal.
//! Failing to spawn at all is an error, and so is a command outliving its bound.

use crate::error::{Result, StagingError};
use std::collections::VecDeque;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

/// Lines kept by `drain_lines` for diagnostics
pub const TAIL_LINES: usize = 20;

/// Fully captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Warning text for an unsuccessful exit, if the heuristic flags one.
///
/// Flags when the exit was unsuccessful, stderr is not blank, and stderr does not
/// mention "warn" in any case. Whether a "warn" stderr can hide a real failure is
/// unresolved; such output is passed through silently.
pub fn stderr_diagnostic(output: &CommandOutput) -> Option<String> {
    if output.success() {
        return None;
    }
    let stderr = output.stderr.trim();
    if stderr.is_empty() || stderr.to_lowercase().contains("warn") {
        return None;
    }
    Some(stderr.to_string())
}

fn describe<S: AsRef<OsStr>>(program: &Path, args: &[S]) -> String {
    let mut text = program.display().to_string();
    for arg in args {
        text.push(' ');
        text.push_str(&arg.as_ref().to_string_lossy());
    }
    text
}

/// Run `program args`, wait at most `limit` for exit, capture both streams.
///
/// A command still running at `limit` is killed and reported as
/// `StagingError::CommandTimeout`.
pub async fn invoke<S: AsRef<OsStr>>(program: &Path, args: &[S], limit: Duration) -> Result<CommandOutput> {
    let description = describe(program, args);
    log::debug!("[Process] invoke: {}", description);

    let running = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = match tokio::time::timeout(limit, running).await {
        Ok(finished) => finished.map_err(|source| StagingError::Spawn {
            command: description.clone(),
            source,
        })?,
        Err(_) => {
            return Err(StagingError::CommandTimeout {
                command: description,
                waited_secs: limit.as_secs(),
            })
        }
    };

    let captured = CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code(),
    };

    if let Some(message) = stderr_diagnostic(&captured) {
        log::warn!("Command '{}' error: {}", description, message);
    }
    log::debug!(
        "[Process] '{}' exited with {:?} ({} bytes stdout)",
        description,
        captured.exit_code,
        captured.stdout.len()
    );

    Ok(captured)
}

/// Spawn a long-running child with piped stdout/stderr.
///
/// The child is killed when its handle is dropped.
pub fn spawn_piped<S: AsRef<OsStr>>(program: &Path, args: &[S]) -> Result<Child> {
    let description = describe(program, args);
    log::debug!("[Process] spawn: {}", description);

    Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| StagingError::Spawn {
            command: description,
            source,
        })
}

/// Bounded tail of lines read from a child stream.
#[derive(Debug, Clone, Default)]
pub struct LineTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl LineTail {
    fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            if lines.len() == TAIL_LINES {
                lines.pop_front();
            }
            lines.push_back(line);
        }
    }

    /// Joined snapshot of the retained lines.
    pub fn snapshot(&self) -> String {
        self.lines
            .lock()
            .map(|lines| lines.iter().cloned().collect::<Vec<_>>().join("\n"))
            .unwrap_or_default()
    }
}

/// Forward a child stream to debug logging until EOF, keeping the last lines.
///
/// Keeps the pipe drained so a chatty daemon never blocks on a full buffer.
pub fn drain_lines<R>(reader: R, label: &'static str) -> (JoinHandle<()>, LineTail)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let tail = LineTail::default();
    let sink = tail.clone();
    let handle = tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                    log::debug!("[{}] {}", label, line);
                    sink.push(line);
                }
                Err(e) => {
                    log::debug!("[{}] read error: {}", label, e);
                    break;
                }
            }
        }
    });
    (handle, tail)
}

/// Locate `program`: a path with a separator must be an existing file, a bare
/// name is searched along `PATH`.
pub fn resolve_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        return program.is_file().then(|| program.to_path_buf());
    }

    if program.is_file() {
        return Some(program.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let candidate = dir.join(program);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) && candidate.extension().is_none() {
            let with_exe = candidate.with_extension("exe");
            if with_exe.is_file() {
                return Some(with_exe);
            }
        }
        None
    })
}

/// `resolve_program` as an environment check.
pub fn check_environment(program: &Path) -> Result<PathBuf> {
    resolve_program(program).ok_or_else(|| {
        StagingError::Environment(format!(
            "Cannot find {}. Place it next to this program or on PATH.",
            program.display()
        ))
    })
}

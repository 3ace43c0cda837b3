//! Device bridge: the external device-management tool and everything built on it.
//!
//! - [`discovery`] decodes device listings (several tolerated shapes).
//! - [`files`] provides push/remove/exists and marker-file polling.
//! - [`syslog`] scans the live device log for the identity marker.
//! - [`session`] owns the bound device and the tunnel daemon.
//!
//! Everything talks to the tool through the [`DeviceTool`] trait. Production uses
//! [`ExternalTool`]; tests substitute in-memory fakes.

pub mod discovery;
pub mod files;
pub mod session;
pub mod syslog;

use crate::error::Result;
use crate::system::process::{self, CommandOutput};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Child;

pub use discovery::decode_device_listing;
pub use files::{interpret_listing, ListingVerdict, RemoteFileBridge};
pub use session::DeviceSession;
pub use syslog::{LogMarker, ScanOutcome};

/// The command surface consumed from the device tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCommand {
    /// `list --details`
    ListDevices,
    /// `reboot`
    Reboot,
    /// `tunnel start` (long-running)
    StartTunnel,
    /// `syslog` (long-running)
    Syslog,
    /// `fsync push --srcPath=<local> --dstPath=<remote>`
    Push { local: PathBuf, remote: String },
    /// `fsync rm --path=<remote>`
    Remove { remote: String },
    /// `fsync tree --path=<remote>`
    Tree { remote: String },
}

impl ToolCommand {
    /// argv passed to the tool, one entry per argument.
    pub fn args(&self) -> Vec<String> {
        match self {
            ToolCommand::ListDevices => vec!["list".into(), "--details".into()],
            ToolCommand::Reboot => vec!["reboot".into()],
            ToolCommand::StartTunnel => vec!["tunnel".into(), "start".into()],
            ToolCommand::Syslog => vec!["syslog".into()],
            ToolCommand::Push { local, remote } => vec![
                "fsync".into(),
                "push".into(),
                format!("--srcPath={}", local.display()),
                format!("--dstPath={}", remote),
            ],
            ToolCommand::Remove { remote } => {
                vec!["fsync".into(), "rm".into(), format!("--path={}", remote)]
            }
            ToolCommand::Tree { remote } => {
                vec!["fsync".into(), "tree".into(), format!("--path={}", remote)]
            }
        }
    }

    /// Whether the command keeps running until killed.
    pub fn is_long_running(&self) -> bool {
        matches!(self, ToolCommand::StartTunnel | ToolCommand::Syslog)
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.args().join(" "))
    }
}

/// Trait for the device-management tool (one-shot commands and long-running children)
pub trait DeviceTool: Send + Sync {
    /// Run a one-shot command to completion and capture its output.
    fn run<'a>(&'a self, command: &'a ToolCommand) -> BoxFuture<'a, Result<CommandOutput>>;

    /// Spawn a long-running command with piped stdout/stderr.
    fn spawn(&self, command: &ToolCommand) -> Result<Child>;
}

/// Bound on one-shot commands unless configured otherwise
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

/// Production `DeviceTool`: the go-ios style executable on disk.
#[derive(Debug, Clone)]
pub struct ExternalTool {
    program: PathBuf,
    command_timeout: Duration,
}

impl ExternalTool {
    /// `program` should already be resolved (see `system::process::check_environment`).
    pub fn new(program: impl Into<PathBuf>) -> Self {
        ExternalTool {
            program: program.into(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Bound every one-shot `run` by `limit`.
    pub fn with_command_timeout(mut self, limit: Duration) -> Self {
        self.command_timeout = limit;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl DeviceTool for ExternalTool {
    fn run<'a>(&'a self, command: &'a ToolCommand) -> BoxFuture<'a, Result<CommandOutput>> {
        async move { process::invoke(&self.program, &command.args(), self.command_timeout).await }.boxed()
    }

    fn spawn(&self, command: &ToolCommand) -> Result<Child> {
        process::spawn_piped(&self.program, &command.args())
    }
}

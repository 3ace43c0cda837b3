//! Shared fixtures: an in-memory device behind the `DeviceTool` seam, fast
//! timings and a mocked payload service.

#![allow(dead_code)]

use device_stager::device::ToolCommand;
use device_stager::system::{spawn_piped, CommandOutput};
use device_stager::{DeviceTool, Result, RunConfig, StagingError, StagingPlan, Timings};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Child;

pub const TOKEN: &str = "1234ABCD-1234-ABCD-1234-1234567890AB";
pub const PRODUCT_TYPE: &str = "iPhone10,3";
pub const SERIAL: &str = "F2LXK0ABCD";

pub const DEVICE_LISTING: &str = r#"{"deviceList":[{"Udid":"00008020-TEST","DeviceName":"Bench Phone","ProductType":"iPhone10,3","HardwareModel":"D22AP","DeviceValues":{"SerialNumber":"F2LXK0ABCD"}}]}"#;

/// Syslog script that prints the marker on line 7, then idles.
pub fn syslog_with_marker() -> String {
    let mut script = String::new();
    for i in 1..=6 {
        script.push_str(&format!("echo 'kernel[0]: noise {}'; ", i));
    }
    script.push_str(&format!(
        "echo 'bookassetd[512]: BLDatabaseManager.sqlite at /private/var/containers/Shared/SystemGroup/{}/Documents/'; ",
        TOKEN
    ));
    script.push_str("sleep 30");
    script
}

/// How the fake device behaves.
#[derive(Debug, Clone)]
pub struct Behavior {
    pub listing: String,
    pub syslog_script: String,
    pub tunnel_script: String,
    /// The trigger marker shows up on the third reboot
    pub trigger_appears: bool,
    pub fail_push: bool,
    pub panic_on_push: bool,
    /// Every `fsync rm` fails to spawn
    pub fail_remove: bool,
    /// Every `fsync tree` fails to spawn
    pub fail_tree: bool,
    /// The device stops showing up in listings after this many reboots
    pub lost_after_reboots: Option<usize>,
}

impl Default for Behavior {
    fn default() -> Self {
        Behavior {
            listing: DEVICE_LISTING.to_string(),
            syslog_script: syslog_with_marker(),
            tunnel_script: "sleep 30".to_string(),
            trigger_appears: true,
            fail_push: false,
            panic_on_push: false,
            fail_remove: false,
            fail_tree: false,
            lost_after_reboots: None,
        }
    }
}

/// Simulated device filesystem plus a record of every command received.
pub struct FakeDevice {
    behavior: Behavior,
    plan: StagingPlan,
    files: Mutex<HashSet<String>>,
    commands: Mutex<Vec<ToolCommand>>,
}

impl FakeDevice {
    pub fn new(behavior: Behavior) -> Arc<Self> {
        Arc::new(FakeDevice {
            behavior,
            plan: StagingPlan::default(),
            files: Mutex::new(HashSet::new()),
            commands: Mutex::new(Vec::new()),
        })
    }

    pub fn commands(&self) -> Vec<ToolCommand> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count(&self, predicate: impl Fn(&ToolCommand) -> bool) -> usize {
        self.commands.lock().unwrap().iter().filter(|c| predicate(c)).count()
    }

    pub fn reboots(&self) -> usize {
        self.count(|c| *c == ToolCommand::Reboot)
    }

    pub fn removals_of(&self, path: &str) -> usize {
        self.count(|c| matches!(c, ToolCommand::Remove { remote } if remote == path))
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains(path)
    }

    /// The on-device process reacting to a reboot.
    fn on_reboot(&self, files: &mut HashSet<String>) {
        let reboots = self.reboots();
        if reboots == 2 && files.contains(&self.plan.primary_artifact) {
            files.insert(self.plan.metadata_marker.clone());
        }
        if reboots == 3 && self.behavior.trigger_appears {
            files.insert(self.plan.trigger_marker.clone());
            files.remove(&self.plan.metadata_marker);
        }
    }

    fn handle(&self, command: &ToolCommand) -> Result<CommandOutput> {
        let lost = self
            .behavior
            .lost_after_reboots
            .map_or(false, |limit| self.reboots() >= limit);
        self.commands.lock().unwrap().push(command.clone());
        let mut files = self.files.lock().unwrap();
        let mut output = CommandOutput {
            exit_code: Some(0),
            ..Default::default()
        };
        match command {
            ToolCommand::ListDevices if lost => output.stdout = "{\"deviceList\":[]}".to_string(),
            ToolCommand::ListDevices => output.stdout = self.behavior.listing.clone(),
            ToolCommand::Reboot => self.on_reboot(&mut files),
            ToolCommand::Push { local, remote } => {
                if self.behavior.panic_on_push {
                    panic!("simulated tool crash");
                }
                if self.behavior.fail_push {
                    return Err(spawn_error(command));
                }
                assert!(local.is_file(), "staging file must exist while pushing");
                files.insert(remote.clone());
            }
            ToolCommand::Remove { .. } if self.behavior.fail_remove => return Err(spawn_error(command)),
            ToolCommand::Remove { remote } => {
                if !files.remove(remote) {
                    output.stderr = format!("{}: no such file or directory", remote);
                    output.exit_code = Some(1);
                }
            }
            ToolCommand::Tree { .. } if self.behavior.fail_tree => return Err(spawn_error(command)),
            ToolCommand::Tree { remote } => {
                output.stdout = if files.contains(remote) {
                    format!("{}\n", remote)
                } else {
                    format!("open {}: no such file or directory\n", remote)
                };
            }
            ToolCommand::StartTunnel | ToolCommand::Syslog => {}
        }
        Ok(output)
    }
}

fn spawn_error(command: &ToolCommand) -> StagingError {
    StagingError::Spawn {
        command: command.to_string(),
        source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
    }
}

impl DeviceTool for FakeDevice {
    fn run<'a>(&'a self, command: &'a ToolCommand) -> BoxFuture<'a, Result<CommandOutput>> {
        async move { self.handle(command) }.boxed()
    }

    fn spawn(&self, command: &ToolCommand) -> Result<Child> {
        self.commands.lock().unwrap().push(command.clone());
        let script = match command {
            ToolCommand::Syslog => &self.behavior.syslog_script,
            ToolCommand::StartTunnel => &self.behavior.tunnel_script,
            other => return Err(StagingError::Unexpected(format!("spawn of one-shot {}", other))),
        };
        spawn_piped(Path::new("sh"), &["-c", script.as_str()])
    }
}

/// Millisecond-scale timings so full sequences finish quickly.
pub fn fast_timings() -> Timings {
    Timings {
        initial_discovery: Duration::from_millis(500),
        discovery_interval: Duration::from_millis(10),
        reconnect_grace: Duration::from_millis(10),
        reset_reconnect: Duration::from_millis(500),
        reboot_reconnect: Duration::from_millis(500),
        identity_scan: Duration::from_secs(5),
        file_poll_interval: Duration::from_millis(10),
        metadata_appearance: Duration::from_millis(200),
        trigger_appearance: Duration::from_millis(300),
        metadata_disappearance: Duration::from_millis(200),
        tunnel_settle: Duration::from_millis(50),
        http_timeout: Duration::from_secs(5),
        command_timeout: Duration::from_secs(5),
    }
}

pub fn test_config(endpoint: &str, staging_dir: &Path) -> RunConfig {
    RunConfig {
        tool_path: PathBuf::from("sh"),
        payload_endpoint: Some(endpoint.to_string()),
        staging_dir: Some(staging_dir.to_path_buf()),
        timings: fast_timings(),
        ..RunConfig::default()
    }
}

/// Mock service: `/get.php` answers with a payload URL on the same server.
pub async fn payload_service(server: &mut mockito::ServerGuard) -> (mockito::Mock, mockito::Mock) {
    let exchange = server
        .mock("GET", "/get.php")
        .match_query(mockito::Matcher::AllOf(vec![
            mockito::Matcher::UrlEncoded("prd".into(), PRODUCT_TYPE.into()),
            mockito::Matcher::UrlEncoded("guid".into(), TOKEN.into()),
            mockito::Matcher::UrlEncoded("sn".into(), SERIAL.into()),
        ]))
        .with_status(200)
        .with_body(format!("  {}/files/payload.bin\n", server.url()))
        .create_async()
        .await;
    let download = server
        .mock("GET", "/files/payload.bin")
        .with_status(200)
        .with_body(vec![0x53u8, 0x51, 0x4c, 0x69, 0x74, 0x65, 0x00, 0x01])
        .create_async()
        .await;
    (exchange, download)
}

/// Tunnel script that records its pid in `pid_file`, then idles.
pub fn tunnel_with_pid_file(pid_file: &Path) -> String {
    format!("echo $$ > {}; exec sleep 30", pid_file.display())
}

/// `kill -0` check, retried briefly so a just-killed process can be reaped.
pub async fn process_gone(pid: &str) -> bool {
    for _ in 0..20 {
        let alive = std::process::Command::new("kill")
            .args(["-0", pid])
            .status()
            .map(|s| s.success())
            .unwrap_or(false);
        if !alive {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

pub fn dir_is_empty(dir: &Path) -> bool {
    std::fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(false)
}

//! The bound device and the tunnel daemon for one run.
//!
//! A `DeviceSession` is owned by the orchestrator and handed to phases by
//! `&mut`. It holds at most one tunnel child at a time.

use super::discovery;
use super::{DeviceTool, ToolCommand};
use crate::config::Timings;
use crate::error::{Result, StagingError};
use crate::models::{Device, UNKNOWN_SERIAL};
use crate::system::{drain_lines, LineTail};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::task::JoinHandle;

/// How long to wait for a dead tunnel's output to finish draining
const TUNNEL_TAIL_WAIT: Duration = Duration::from_secs(1);

struct Tunnel {
    child: Child,
    drains: Vec<(JoinHandle<()>, LineTail)>,
}

pub struct DeviceSession {
    tool: Arc<dyn DeviceTool>,
    timings: Timings,
    device: Option<Device>,
    tunnel: Option<Tunnel>,
    tunnel_releases: u32,
}

impl DeviceSession {
    pub fn new(tool: Arc<dyn DeviceTool>, timings: Timings) -> Self {
        DeviceSession {
            tool,
            timings,
            device: None,
            tunnel: None,
            tunnel_releases: 0,
        }
    }

    /// Poll the listing until a device appears, then bind it.
    pub async fn discover(&mut self, timeout: Duration) -> Result<&Device> {
        let device =
            discovery::discover(self.tool.as_ref(), self.timings.discovery_interval, timeout).await?;
        if device.serial_number.is_none() {
            log::warn!(
                "Device {} did not report a serial number, using {}",
                device.identifier,
                UNKNOWN_SERIAL
            );
        }
        log::debug!("[Session] bound {} ({})", device.identifier, device);
        Ok(&*self.device.insert(device))
    }

    /// Let a reboot finish, then rediscover. The new binding replaces the old one.
    pub async fn await_reconnection(&mut self, timeout: Duration) -> Result<&Device> {
        log::info!("Waiting for reconnection...");
        tokio::time::sleep(self.timings.reconnect_grace).await;
        self.discover(timeout).await
    }

    /// Issue the reboot command. Output is not inspected beyond the stderr heuristic.
    pub async fn reboot(&self) -> Result<()> {
        log::info!("Rebooting device...");
        self.tool.run(&ToolCommand::Reboot).await?;
        Ok(())
    }

    /// Spawn the tunnel daemon and fail fast if it dies within the settle delay.
    pub async fn start_tunnel(&mut self) -> Result<()> {
        if self.tunnel.is_some() {
            log::debug!("[Session] tunnel already running");
            return Ok(());
        }

        let mut child = self.tool.spawn(&ToolCommand::StartTunnel)?;
        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(drain_lines(stdout, "Tunnel"));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(drain_lines(stderr, "Tunnel"));
        }

        tokio::time::sleep(self.timings.tunnel_settle).await;

        match child.try_wait() {
            Ok(None) => {
                self.tunnel = Some(Tunnel { child, drains });
                Ok(())
            }
            Ok(Some(status)) => {
                let mut tail = Vec::new();
                for (handle, lines) in drains {
                    let _ = tokio::time::timeout(TUNNEL_TAIL_WAIT, handle).await;
                    let snapshot = lines.snapshot();
                    if !snapshot.is_empty() {
                        tail.push(snapshot);
                    }
                }
                Err(StagingError::TunnelFailed(if tail.is_empty() {
                    format!("tunnel exited immediately ({})", status)
                } else {
                    format!("tunnel exited immediately ({}): {}", status, tail.join("\n"))
                }))
            }
            Err(e) => Err(StagingError::TunnelFailed(format!(
                "could not query tunnel status: {}",
                e
            ))),
        }
    }

    /// Terminate the tunnel if one is running. Termination errors are swallowed.
    ///
    /// Every call counts as a release. Returns whether a live process was stopped.
    pub async fn stop_tunnel(&mut self) -> bool {
        self.tunnel_releases += 1;
        let Some(mut tunnel) = self.tunnel.take() else {
            log::debug!("[Session] no tunnel to stop");
            return false;
        };
        if let Err(e) = tunnel.child.kill().await {
            log::debug!("[Session] tunnel kill failed: {}", e);
        }
        for (handle, _) in tunnel.drains {
            handle.abort();
        }
        true
    }

    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    pub fn require_device(&self) -> Result<&Device> {
        self.device.as_ref().ok_or(StagingError::NoDeviceBound)
    }

    pub fn tunnel_active(&self) -> bool {
        self.tunnel.is_some()
    }

    pub fn tunnel_releases(&self) -> u32 {
        self.tunnel_releases
    }
}

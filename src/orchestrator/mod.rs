//! Staging Orchestration: 9-phase device sequence (Reset -> Identity -> Authorization
//! -> Acquisition -> Sanitation -> Injection -> Reboot -> Verification -> Trigger).
//!
//! `SequenceOrchestrator::execute` owns the `DeviceSession` for the whole run.
//! Whatever happens inside the drive future, including a panic, the tunnel is
//! released exactly once afterwards.

pub mod phases;
pub mod state;

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

pub use state::{Phase, SequenceState, SequenceStatus};

use crate::config::{RunConfig, Timings};
use crate::device::{DeviceSession, DeviceTool, LogMarker, RemoteFileBridge};
use crate::error::{ErrorKind, Result, StagingError};
use crate::models::{Device, StagingPlan};
use crate::payload::PayloadClient;

/// Collaborators shared by every phase, read-only during the run.
pub struct Services {
    pub tool: Arc<dyn DeviceTool>,
    pub files: RemoteFileBridge,
    pub payloads: PayloadClient,
    pub marker: LogMarker,
    pub plan: StagingPlan,
    pub timings: Timings,
    pub staging_dir: Option<PathBuf>,
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: SequenceStatus,
    /// Taxonomy of the fault when `status` is `Aborted`
    pub error_kind: Option<ErrorKind>,
    pub phases_completed: Vec<Phase>,
    pub reboots: u32,
    pub sanitation_passes: u32,
    pub tunnel_releases: u32,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == SequenceStatus::Succeeded
    }

    /// Process exit status: 0 on success, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.succeeded() {
            0
        } else {
            1
        }
    }
}

/// Enter a phase, print its banner, run it, mark it complete.
macro_rules! run_phase {
    ($state:expr, $phase:expr, $work:expr) => {{
        let phase = $phase;
        $state.enter(phase).map_err(StagingError::Unexpected)?;
        crate::log_phase!("{}", phase.title());
        let output = $work.await?;
        $state.complete(phase).map_err(StagingError::Unexpected)?;
        output
    }};
}

/// Drives one staging run against one device.
pub struct SequenceOrchestrator {
    services: Services,
}

impl SequenceOrchestrator {
    pub fn new(tool: Arc<dyn DeviceTool>, config: &RunConfig, payloads: PayloadClient) -> Result<Self> {
        let marker = LogMarker::from_config(&config.marker)?;
        let files = RemoteFileBridge::new(tool.clone(), config.timings.file_poll_interval);
        Ok(SequenceOrchestrator {
            services: Services {
                tool,
                files,
                payloads,
                marker,
                plan: config.plan.clone(),
                timings: config.timings.clone(),
                staging_dir: config.staging_dir.clone(),
            },
        })
    }

    /// Build the payload client from `config` as well. The endpoint is required.
    pub fn from_config(tool: Arc<dyn DeviceTool>, config: &RunConfig) -> Result<Self> {
        let endpoint = config.payload_endpoint.as_deref().ok_or_else(|| {
            StagingError::Environment(format!(
                "No payload endpoint configured (set {} or payload_endpoint in settings)",
                crate::config::ENDPOINT_ENV
            ))
        })?;
        let payloads = PayloadClient::new(endpoint, config.timings.http_timeout)?;
        Self::new(tool, config, payloads)
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Run the whole sequence. `start_gate` resolves when the operator confirms
    /// the start (after discovery and tunnel start, before phase 1).
    pub async fn execute<G>(&self, start_gate: G) -> RunReport
    where
        G: Future<Output = ()>,
    {
        let mut session = DeviceSession::new(self.services.tool.clone(), self.services.timings.clone());
        let mut state = SequenceState::new();

        let driven = AssertUnwindSafe(self.drive(&mut session, &mut state, start_gate))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(StagingError::Unexpected(panic_message(panic))));

        let mut error_kind = None;
        match driven {
            Ok(true) => {
                state.succeed();
                crate::log_success!("Sequence complete.");
            }
            Ok(false) => {
                state.trigger_timed_out();
                log::error!("Trigger timeout. Sequence failed.");
            }
            Err(e) => {
                error_kind = Some(e.kind());
                log::error!("Fatal: {}", e.user_message());
                log::debug!("[Orchestrator] {:?} aborted by {:?}", state.current(), e);
                state.abort(e.to_string());
            }
        }

        if session.stop_tunnel().await {
            log::info!("Tunnel stopped.");
        }

        RunReport {
            status: state.status().clone(),
            error_kind,
            phases_completed: state.completed().to_vec(),
            reboots: state.reboots(),
            sanitation_passes: state.sanitation_passes(),
            tunnel_releases: session.tunnel_releases(),
            elapsed: state.elapsed(),
        }
    }

    /// Discovery, tunnel, start gate, then phases 1-9. `Ok(false)` means the
    /// trigger marker never appeared.
    async fn drive<G>(&self, session: &mut DeviceSession, state: &mut SequenceState, start_gate: G) -> Result<bool>
    where
        G: Future<Output = ()>,
    {
        let services = &self.services;

        log::info!("Waiting for device...");
        let device = session.discover(services.timings.initial_discovery).await?;
        log_device(device);

        log::info!("Starting tunnel daemon...");
        session.start_tunnel().await?;
        crate::log_success!("Tunnel active.");

        start_gate.await;

        run_phase!(state, Phase::Reset, phases::reset(session, services, state));
        run_phase!(
            state,
            Phase::IdentityExtraction,
            phases::identity_extraction(services, state)
        );
        run_phase!(
            state,
            Phase::Authorization,
            phases::authorization(session, services, state)
        );
        let payload = run_phase!(state, Phase::Acquisition, phases::acquisition(services, state));
        run_phase!(state, Phase::Sanitation, phases::sanitation(services, state));
        run_phase!(state, Phase::Injection, phases::injection(services, payload));
        run_phase!(
            state,
            Phase::ApplicationReboot,
            phases::application_reboot(session, services, state)
        );
        run_phase!(state, Phase::Verification, phases::verification(services));
        let triggered = run_phase!(
            state,
            Phase::TriggerWait,
            phases::trigger_wait(session, services, state)
        );

        Ok(triggered)
    }
}

fn log_device(device: &Device) {
    log::info!("Connected: {}", device);
    crate::log_detail!("UDID: {}", device.identifier);
    if !device.hardware_model.is_empty() {
        crate::log_detail!("Model: {}", device.hardware_model);
    }
    crate::log_detail!("Serial: {}", device.serial_or_sentinel());
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        format!("panic: {}", text)
    } else if let Some(text) = panic.downcast_ref::<String>() {
        format!("panic: {}", text)
    } else {
        "panic with non-string payload".to_string()
    }
}

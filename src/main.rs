use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;

use device_stager::config::{load_run_config, RunConfig};
use device_stager::log_collector::get_global_logs_path;
use device_stager::system::check_environment;
use device_stager::{DeviceTool, ExternalTool, LogCollector, SequenceOrchestrator, StagingError};

const BANNER: &str = "--- Device Stager ---";

#[tokio::main]
async fn main() -> ExitCode {
    // =========================================================================
    // LOGGING INITIALIZATION - MUST BE FIRST
    // =========================================================================
    let collector = init_logging();

    println!("{}\n", BANNER);
    log::debug!("[Main] device_stager {}", device_stager::VERSION);
    if let Some(path) = collector.log_path() {
        log::debug!("[Main] run log at {}", path.display());
    }

    let succeeded = match prepare() {
        Ok((config, program)) => run(&config, program).await,
        Err(e) => {
            log::error!("Fatal: {}", e.user_message());
            false
        }
    };

    if let Err(e) = collector.wait_for_empty().await {
        eprintln!("[Main] WARNING: failed to flush run log: {}", e);
    }

    println!("[*] Process terminated. Press ENTER to exit.");
    wait_for_enter().await;

    if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Start the console/disk logger and register it with the `log` facade.
///
/// Without a writable logs directory the collector still renders the console.
fn init_logging() -> LogCollector {
    let (collector, degraded) = match get_global_logs_path() {
        Ok(log_dir) => LogCollector::open_or_console_only(&log_dir),
        Err(e) => (LogCollector::console_only(), Some(e)),
    };

    if let Err(e) = collector
        .install(log::LevelFilter::Debug)
        .context("Failed to register LogCollector as global logger")
    {
        eprintln!("[Main] WARNING: {:#}", e);
    }
    if let Some(reason) = degraded {
        log::warn!("Run log unavailable ({}), logging to console only.", reason);
    }
    collector
}

/// Settings and environment checks; nothing here touches the device.
fn prepare() -> Result<(RunConfig, std::path::PathBuf), StagingError> {
    let config = load_run_config()?;
    config.validate()?;
    let program = check_environment(&config.tool_path)?;
    log::debug!("[Main] using device tool {}", program.display());
    Ok((config, program))
}

async fn run(config: &RunConfig, program: std::path::PathBuf) -> bool {
    let tool: Arc<dyn DeviceTool> =
        Arc::new(ExternalTool::new(program).with_command_timeout(config.timings.command_timeout));
    let orchestrator = match SequenceOrchestrator::from_config(tool, config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            log::error!("Fatal: {}", e.user_message());
            return false;
        }
    };

    let report = orchestrator
        .execute(async {
            log::warn!("Press ENTER to begin the sequence...");
            wait_for_enter().await;
        })
        .await;

    log::debug!(
        "[Main] {:?} after {:?}: {} phase(s), {} reboot(s), {} sanitation pass(es)",
        report.status,
        report.elapsed,
        report.phases_completed.len(),
        report.reboots,
        report.sanitation_passes
    );
    report.succeeded()
}

/// Block on one line of stdin without stalling the runtime.
async fn wait_for_enter() {
    let _ = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)
    })
    .await;
}

//! Device Stager
//!
//! Drives a multi-phase staging sequence against one attached mobile device: discover
//! it, pull an identity token out of its live log, exchange the token with a remote
//! service for a payload, push the payload through the device-management tool, then
//! watch the device filesystem for the marker files an on-device process leaves.
//!
//! The system is organized into functional modules:
//! - **error**: Unified error type hierarchy
//! - **models**: Core data structures (`Device`, `StagingPlan`)
//! - **system**: Process invocation, polling primitives, tagging macros
//! - **config**: Compiled-in defaults plus settings-file and environment overrides
//! - **device**: Tool seam, discovery, remote files, log scanning, session
//! - **payload**: Remote payload exchange and local staging
//! - **orchestrator**: 9-phase sequencer and its state machine
//! - **log_collector**: Decoupled console and disk logging

// Core foundational modules
pub mod error;
pub mod models;

// OS abstraction: processes, polling, logging macros
pub mod system;

// Configuration management
pub mod config;

// Device-management tool bridge
pub mod device;

// Remote payload exchange
pub mod payload;

// Robust, decoupled logging system
pub mod log_collector;

// Sequence orchestration and state management
pub mod orchestrator;

// Re-export the log crate for macro usage
pub use log;

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

pub use error::{ConfigError, ErrorKind, Result, StagingError};

pub use models::{Device, StagingPlan, UNKNOWN_SERIAL};

pub use config::{RunConfig, Timings};

pub use device::{DeviceSession, DeviceTool, ExternalTool, RemoteFileBridge, ToolCommand};

pub use payload::{PayloadClient, StagedPayload};

pub use log_collector::{LogCollector, LogLine};

pub use orchestrator::{Phase, RunReport, SequenceOrchestrator, SequenceStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_constant() {
        assert_eq!(VERSION, "0.1.0");
    }

    #[test]
    fn test_error_reexport() {
        let _: Result<i32> = Ok(42);
        let err = StagingError::NoDeviceBound;
        assert_eq!(err.kind(), ErrorKind::UnexpectedFault);
    }

    #[test]
    fn test_phase_reexport() {
        assert_eq!(Phase::SEQUENCE.len(), 9);
    }
}

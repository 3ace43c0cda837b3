//! Orchestrator phases: one async fn per stage of a staging run.
//!
//! - **Phases 1, 7** (`reboot`) - reboot and reconnect
//! - **Phases 2-4** (`identity`) - token extraction, authorization, payload download
//! - **Phases 5-6** (`staging`) - artifact sanitation and payload injection
//! - **Phases 8-9** (`monitor`) - marker-file verification and the trigger wait
//!
//! Phases receive the session by `&mut` and the shared services by `&`. Values
//! produced by one phase for a later one travel through `SequenceState` or, for
//! the staged payload, as a return value.

pub mod identity;
pub mod monitor;
pub mod reboot;
pub mod staging;

pub use identity::{acquisition, authorization, identity_extraction};
pub use monitor::{trigger_wait, verification};
pub use reboot::{application_reboot, reset};
pub use staging::{injection, sanitation};

//! Phases 8-9: watch marker files written by the on-device process.

use super::super::state::SequenceState;
use super::super::Services;
use super::reboot::reboot_and_reconnect;
use super::staging::sanitation;
use crate::device::DeviceSession;
use crate::error::Result;

/// Phase 8: the metadata marker should appear. Missing it is only a warning.
pub async fn verification(services: &Services) -> Result<()> {
    let marker = services.plan.metadata_marker.as_str();
    if services
        .files
        .wait_for_appearance(marker, services.timings.metadata_appearance)
        .await?
    {
        crate::log_success!("Metadata file present.");
    } else {
        log::warn!("Metadata file missing, continuing anyway...");
    }
    Ok(())
}

/// Phase 9: reboot, wait for the trigger marker, clean up.
///
/// Returns `false` when the trigger never appeared. Nothing is rolled back then.
pub async fn trigger_wait(
    session: &mut DeviceSession,
    services: &Services,
    state: &mut SequenceState,
) -> Result<bool> {
    let timings = &services.timings;
    let plan = &services.plan;

    reboot_and_reconnect(session, state, timings.reboot_reconnect).await?;

    log::info!("Waiting for trigger asset ({})...", plan.trigger_marker);
    if !services
        .files
        .wait_for_appearance(&plan.trigger_marker, timings.trigger_appearance)
        .await?
    {
        log::error!(
            "Trigger not detected within {}s.",
            timings.trigger_appearance.as_secs()
        );
        return Ok(false);
    }
    crate::log_success!("Trigger detected! Finalizing...");

    if !services
        .files
        .wait_for_disappearance(&plan.metadata_marker, timings.metadata_disappearance)
        .await?
    {
        log::warn!("Metadata file still present, continuing cleanup.");
    }

    crate::log_detail!("Deleting {}", plan.trigger_marker);
    services.files.remove(&plan.trigger_marker).await?;
    sanitation(services, state).await?;

    session.reboot().await?;
    state.record_reboot();
    Ok(true)
}

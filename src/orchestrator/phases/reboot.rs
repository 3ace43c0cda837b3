//! Phases 1 and 7: reboot the device and wait for it to come back.

use super::super::state::SequenceState;
use super::super::Services;
use crate::device::DeviceSession;
use crate::error::Result;
use std::time::Duration;

pub(crate) async fn reboot_and_reconnect(
    session: &mut DeviceSession,
    state: &mut SequenceState,
    timeout: Duration,
) -> Result<()> {
    session.reboot().await?;
    state.record_reboot();
    let device = session.await_reconnection(timeout).await?;
    crate::log_success!("Device reconnected: {}", device);
    Ok(())
}

/// Phase 1: Initial Reset
pub async fn reset(session: &mut DeviceSession, services: &Services, state: &mut SequenceState) -> Result<()> {
    reboot_and_reconnect(session, state, services.timings.reset_reconnect).await
}

/// Phase 7: Application Reboot
pub async fn application_reboot(
    session: &mut DeviceSession,
    services: &Services,
    state: &mut SequenceState,
) -> Result<()> {
    reboot_and_reconnect(session, state, services.timings.reboot_reconnect).await
}

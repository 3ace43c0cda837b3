//! Phases 2-4: identity token, download URL, staged payload.

use super::super::state::SequenceState;
use super::super::Services;
use crate::device::syslog::scan_for_pattern;
use crate::device::{DeviceSession, ScanOutcome};
use crate::error::{Result, StagingError};
use crate::payload::StagedPayload;

/// Phase 2: scan the live log for the marker and keep its token.
pub async fn identity_extraction(services: &Services, state: &mut SequenceState) -> Result<()> {
    log::info!("Scanning syslog for {}...", services.marker.needle());
    let bound = services.timings.identity_scan;
    match scan_for_pattern(services.tool.as_ref(), &services.marker, bound).await? {
        ScanOutcome::Found(token) => {
            crate::log_success!("Target token: {}", token);
            state.set_token(token);
            Ok(())
        }
        ScanOutcome::NotFound => Err(StagingError::IdentityNotFound {
            waited_secs: bound.as_secs(),
        }),
    }
}

/// Phase 3: exchange token and device identifiers for the download URL.
pub async fn authorization(session: &DeviceSession, services: &Services, state: &mut SequenceState) -> Result<()> {
    let device = session.require_device()?;
    let token = state
        .token()
        .ok_or_else(|| StagingError::Unexpected("authorization reached without a token".to_string()))?;

    let url = services
        .payloads
        .resolve_download_url(&device.product_type, token, device.serial_or_sentinel())
        .await?;
    log::info!("Payload URL: {}", url);
    state.set_download_url(url);
    Ok(())
}

/// Phase 4: download the payload into a staging file.
pub async fn acquisition(services: &Services, state: &SequenceState) -> Result<StagedPayload> {
    let url = state
        .download_url()
        .ok_or_else(|| StagingError::Unexpected("acquisition reached without a download URL".to_string()))?;
    let payload = services.payloads.stage(url, services.staging_dir.as_deref()).await?;
    crate::log_success!("Payload downloaded ({} bytes).", payload.len());
    log::debug!("[Acquisition] staged at {}", payload.path().display());
    Ok(payload)
}

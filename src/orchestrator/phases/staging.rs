//! Phases 5-6: clear the artifact paths, then push the payload.

use super::super::state::SequenceState;
use super::super::Services;
use crate::error::Result;
use crate::payload::StagedPayload;

/// Phase 5 (and the final cleanup): remove every artifact path without
/// checking for existence first. Counts as one sanitation pass.
pub async fn sanitation(services: &Services, state: &mut SequenceState) -> Result<()> {
    for path in services.plan.artifact_paths() {
        crate::log_detail!("Deleting {}", path);
        services.files.remove(path).await?;
    }
    state.record_sanitation();
    Ok(())
}

/// Phase 6: push the staged payload to the primary artifact path. The staging
/// file is deleted whether or not the push worked.
pub async fn injection(services: &Services, payload: StagedPayload) -> Result<()> {
    let remote = services.plan.primary_artifact.as_str();
    crate::log_detail!("Pushing {} -> {}", payload.path().display(), remote);

    let pushed = services.files.push(payload.path(), remote).await;
    if let Err(e) = payload.discard() {
        log::warn!("Could not delete local staging file: {}", e);
    }
    pushed?;

    crate::log_success!("Payload injected.");
    Ok(())
}

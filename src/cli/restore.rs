use super::config::CustodiaConfig;
use async_trait::async_trait;
use custodia::codec::XorParityCodec;
use custodia::ids::{BackupId, FragmentId, PeerId};
use custodia::restore::{
    Fragment, FragmentRequestQueue, RequestError, RestoreContext, RestoreError, RestoreRequest,
    RestoreSession, StaticPeerStatus,
};
use custodia::store::FsFragmentStore;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Queue for a process without a network transport.
struct OfflineQueue;

#[async_trait]
impl FragmentRequestQueue for OfflineQueue {
    async fn request(&self, _peer: &PeerId, _id: &FragmentId) -> Result<Fragment, RequestError> {
        Err(RequestError::Network("no transport configured".to_string()))
    }

    fn cancel_block(&self, _backup_id: &BackupId, _block_number: u64) {}

    fn cancel_backup(&self, _backup_id: &BackupId) {}
}

/// Restore a backup from the local fragment store
///
/// With every supplier offline a block whose fragments are not all on disk
/// never completes, so the session is aborted once `timeout` expires.
pub async fn execute(
    config: &CustodiaConfig,
    path_id: String,
    version: String,
    scheme: String,
    output: &Path,
    timeout: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let backup_id = BackupId::new(path_id, version);
    let sink = tokio::fs::File::create(output)
        .await
        .map_err(|e| format!("Failed to create '{}': {}", output.display(), e))?;

    let ctx = RestoreContext::new(
        Arc::new(OfflineQueue),
        Arc::new(XorParityCodec::new()),
        Arc::new(FsFragmentStore::new(config.storage.fragments_dir())),
        Arc::new(StaticPeerStatus::offline()),
    )
    .with_config(config.restore.clone());

    let session = RestoreSession::start(ctx, RestoreRequest::new(backup_id, scheme, Vec::new()), sink)?;
    let abort = session.abort_handle();
    let wait = session.wait();
    tokio::pin!(wait);

    let outcome = tokio::select! {
        outcome = &mut wait => outcome,
        _ = tokio::time::sleep(timeout) => {
            warn!(timeout = %humantime::format_duration(timeout), "Local restore timed out");
            abort.abort();
            match (&mut wait).await {
                Err(RestoreError::Aborted) => {
                    return Err(format!(
                        "Local fragments did not complete the restore within {}",
                        humantime::format_duration(timeout)
                    )
                    .into());
                }
                outcome => outcome,
            }
        }
    };

    let report = outcome?;
    println!("Restored: {}", report.backup_id);
    println!("Blocks: {}", report.blocks);
    println!("Bytes written: {}", report.bytes_written);
    println!("Output: {}", output.display());
    Ok(())
}

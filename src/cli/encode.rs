use super::config::CustodiaConfig;
use custodia::codec::{encode_backup, ErasureCodec, XorParityCodec};
use custodia::ids::BackupId;
use custodia::store::{write_block, FsFragmentStore};
use std::path::Path;
use tracing::info;

/// Payload bytes per block unless overridden
pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;

/// Split a file into blocks and write their fragments to the local store
///
/// This is the backup half the restore command reads back; nothing is sent
/// to suppliers.
pub async fn execute(
    config: &CustodiaConfig,
    input: &Path,
    path_id: String,
    version: String,
    scheme: &str,
    block_size: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let payload = tokio::fs::read(input)
        .await
        .map_err(|e| format!("Failed to read '{}': {}", input.display(), e))?;

    let codec = XorParityCodec::new();
    let info = codec.scheme(scheme)?;
    let backup_id = BackupId::new(path_id, version);
    let blocks = encode_backup(&codec, scheme, &backup_id, &payload, block_size)?;

    let store = FsFragmentStore::new(config.storage.fragments_dir());
    let mut fragments = 0;
    for (block_number, block) in blocks.iter().enumerate() {
        fragments += write_block(&store, &backup_id, block_number as u64, block)?;
    }

    info!(
        backup_id = %backup_id,
        scheme = %info.name,
        blocks = blocks.len(),
        fragments,
        "Backup encoded"
    );
    println!("Backup: {}", backup_id);
    println!("Scheme: {} ({} suppliers)", info.name, info.suppliers);
    println!("Blocks: {}", blocks.len());
    println!("Fragments written: {}", fragments);
    println!("Store: {}", store.root().display());
    Ok(())
}

//! Loading serialized heap snapshots from disk.

use std::path::Path;

/// Read an entire snapshot blob from `path`.
///
/// Returns `None` if:
/// - the file doesn't exist or cannot be read
/// - the file is empty
///
/// Failure is never surfaced to the caller as an error; a context group
/// constructed from an unreadable snapshot degrades to a default-initialized
/// engine instance (slower startup, same behavior).
pub fn load_snapshot_file(path: &Path) -> Option<Vec<u8>> {
    match std::fs::read(path) {
        Ok(bytes) if bytes.is_empty() => {
            log::warn!(
                "snapshot file is empty: {} - starting without snapshot",
                path.display()
            );
            None
        }
        Ok(bytes) => {
            log::info!(
                "loaded snapshot ({} bytes) from {}",
                bytes.len(),
                path.display()
            );
            Some(bytes)
        }
        Err(e) => {
            log::warn!(
                "failed to load snapshot from {}: {} - starting without snapshot",
                path.display(),
                e
            );
            None
        }
    }
}

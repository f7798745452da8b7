//! Single-track upload to and removal from the device music library.

use rand::Rng;
use std::fs;
use std::path::Path;

use super::allocation::{FilenameAllocator, TrackMetadata};
use super::copy::copy_stream;
use super::types::TransferError;
use crate::config::SyncConfig;
use crate::device::{DeviceBackend, DeviceSession, OpenMode};

/// Copies a local track file into a freshly allocated family directory slot.
///
/// Returns the device path the track was written to.
pub fn upload_track<B, M, R>(
    session: &DeviceSession<B>,
    local_file: &Path,
    track: &M,
    config: &SyncConfig,
    rng: &mut R,
) -> Result<String, TransferError>
where
    B: DeviceBackend,
    M: TrackMetadata + ?Sized,
    R: Rng + ?Sized,
{
    if !session.is_file_service_ready() {
        log::error!("upload_track: file service not ready for {}", session.device_id());
        return Err(TransferError::NotReady {
            device_id: session.device_id().to_string(),
        });
    }

    let dest = FilenameAllocator::new(session, config).allocate(track, rng)?;
    let source = local_file.display().to_string();

    let mut reader = fs::File::open(local_file).map_err(|e| TransferError::Io {
        path: source.clone(),
        message: format!("Failed to open track: {}", e),
    })?;
    let mut writer = session.open_file(&dest, OpenMode::WriteTruncate)?;

    let mut buffer = vec![0u8; config.buffer_size];
    let written = match copy_stream(&mut reader, &mut writer, &mut buffer, &source, &dest) {
        Ok(bytes) => writer.close().map(|()| bytes).map_err(TransferError::from),
        Err(e) => {
            drop(writer);
            Err(e)
        }
    };
    let bytes = match written {
        Ok(bytes) => bytes,
        Err(e) => {
            // Don't leave a truncated or unconfirmed track behind
            if let Err(remove_err) = session.remove_path(&dest) {
                log::warn!("upload_track: failed to remove partial {}: {}", dest, remove_err);
            }
            return Err(e);
        }
    };

    log::info!(
        "upload_track: {} -> {} on {} ({} bytes)",
        source,
        dest,
        session.device_id(),
        bytes
    );
    Ok(dest)
}

/// Removes a track previously written with `upload_track`.
pub fn delete_track<B: DeviceBackend>(session: &DeviceSession<B>, device_path: &str) -> Result<(), TransferError> {
    session.remove_path(device_path)?;
    log::info!("delete_track: removed {} from {}", device_path, session.device_id());
    Ok(())
}

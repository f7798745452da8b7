//! Streaming file copy and the subtree walk built on it.

use std::io::{self, Read, Write};

use super::types::{TransferError, TransferStats};
use super::volume::{TreeVolume, VolumeEntry};
use crate::device::{DeviceError, EntryKind, join_device_path};

/// Called after each copied file with the running totals of the subtree.
pub type TreeProgressFn<'a> = &'a mut dyn FnMut(&TransferStats);

/// Maps an I/O error from either side of a copy. Errors raised by remote streams carry a
/// `DeviceError`, which is surfaced as is.
fn stream_error(path: &str, context: &str, e: io::Error) -> TransferError {
    if let Some(device_error) = e.get_ref().and_then(|inner| inner.downcast_ref::<DeviceError>()) {
        return TransferError::from(device_error.clone());
    }
    TransferError::Io {
        path: path.to_string(),
        message: format!("{}: {}", context, e),
    }
}

/// Copies `reader` into `writer` through `buffer` until end of stream.
///
/// Every chunk must be accepted whole: a write that takes fewer bytes than it was given
/// fails the copy with `ShortWrite`. Returns the number of bytes copied.
pub fn copy_stream(
    reader: &mut dyn Read,
    writer: &mut dyn Write,
    buffer: &mut [u8],
    source: &str,
    dest: &str,
) -> Result<u64, TransferError> {
    let mut total_bytes = 0u64;

    loop {
        let bytes_read = match reader.read(buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(stream_error(source, "Failed to read from source", e)),
        };

        let written = loop {
            match writer.write(&buffer[..bytes_read]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(stream_error(dest, "Failed to write to destination", e)),
            }
        };
        if written != bytes_read {
            log::error!(
                "copy_stream: short write on {} ({} of {} bytes)",
                dest,
                written,
                bytes_read
            );
            return Err(TransferError::ShortWrite {
                path: dest.to_string(),
                expected: bytes_read,
                written,
            });
        }

        total_bytes += bytes_read as u64;
    }

    writer
        .flush()
        .map_err(|e| stream_error(dest, "Failed to flush destination", e))?;
    Ok(total_bytes)
}

/// Copies one file at `path` from `source` to the same path on `dest`.
///
/// Both streams are released on every return path. The destination is finished
/// explicitly, so a failed close fails the copy.
pub fn copy_file(
    source: &dyn TreeVolume,
    dest: &dyn TreeVolume,
    path: &str,
    buffer: &mut [u8],
) -> Result<u64, TransferError> {
    let mut reader = source.open_read(path)?;
    let mut writer = dest.open_write(path)?;
    let bytes = copy_stream(reader.as_mut(), &mut writer, buffer, path, path)?;
    writer.finish()?;
    log::debug!("copy_file: {} bytes {} -> {} ({})", bytes, source.name(), dest.name(), path);
    Ok(bytes)
}

struct Frame {
    dir: String,
    entries: std::vec::IntoIter<VolumeEntry>,
}

fn enter_directory(
    source: &dyn TreeVolume,
    dest: &dyn TreeVolume,
    dir: &str,
    stats: &mut TransferStats,
) -> Result<Frame, TransferError> {
    if dest.ensure_directory(dir)? {
        stats.directories_created += 1;
    }
    let entries = source.list_directory(dir)?;
    Ok(Frame {
        dir: dir.to_string(),
        entries: entries.into_iter(),
    })
}

/// Mirrors the subtree at `root` from `source` onto `dest`.
///
/// Visits entries in listing order, descending into a directory as soon as it is met, so
/// the sequence is a pre-order walk. Depth is limited by memory, not by the call stack.
/// The first failure stops the walk; nothing after it is attempted.
///
/// A `root` missing on the source side is an empty subtree: the destination directory is
/// still created.
pub fn copy_tree(
    source: &dyn TreeVolume,
    dest: &dyn TreeVolume,
    root: &str,
    buffer: &mut [u8],
    progress: TreeProgressFn,
) -> Result<TransferStats, TransferError> {
    let mut stats = TransferStats::default();

    if !source.exists(root) {
        log::info!("copy_tree: {} has no {}, treating it as empty", source.name(), root);
        if dest.ensure_directory(root)? {
            stats.directories_created += 1;
        }
        return Ok(stats);
    }

    let mut stack = vec![enter_directory(source, dest, root, &mut stats)?];
    while let Some(frame) = stack.last_mut() {
        let Some(entry) = frame.entries.next() else {
            stack.pop();
            continue;
        };
        let path = join_device_path(&frame.dir, &entry.name);

        match entry.kind {
            EntryKind::Directory => {
                let frame = enter_directory(source, dest, &path, &mut stats)?;
                stack.push(frame);
            }
            EntryKind::File => {
                stats.bytes_copied += copy_file(source, dest, &path, buffer)?;
                stats.files_copied += 1;
                progress(&stats);
            }
            EntryKind::Symlink | EntryKind::Unknown => {}
        }
    }

    Ok(stats)
}

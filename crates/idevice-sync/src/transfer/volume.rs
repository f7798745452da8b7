//! The two ends of a tree copy.
//!
//! Both volumes address entries with device-style absolute paths (`/iTunes_Control/iTunes/...`):
//! the device volume passes them through, the local volume maps them under its root. That
//! way the same path names the source and the destination entry in either direction.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use super::types::TransferError;
use crate::device::{DeviceBackend, DeviceSession, DirFilter, EntryKind, OpenMode, RemoteFile};

/// A directory entry the tree copy cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeEntry {
    pub name: String,
    /// Only `File` or `Directory`; other kinds are filtered out by the volume.
    pub kind: EntryKind,
}

/// Destination stream of a file copy.
///
/// A file counts as written only once `finish` returns `Ok`. Dropping the writer instead
/// still releases it, but any error doing so is only logged.
pub trait VolumeWriter: Write {
    fn finish(self: Box<Self>) -> Result<(), TransferError>;
}

/// One side of a tree copy.
///
/// Listings skip `.`, `..`, hidden names, symlinks, and special files. Entries come back in
/// whatever order the underlying storage reports.
pub trait TreeVolume {
    /// Name for logs.
    fn name(&self) -> &str;

    fn exists(&self, path: &str) -> bool;

    fn list_directory(&self, path: &str) -> Result<Vec<VolumeEntry>, TransferError>;

    /// Creates the directory (and parents) if missing. Returns true if something was created.
    fn ensure_directory(&self, path: &str) -> Result<bool, TransferError>;

    fn open_read(&self, path: &str) -> Result<Box<dyn Read + '_>, TransferError>;

    /// Opens for writing, creating or truncating.
    fn open_write(&self, path: &str) -> Result<Box<dyn VolumeWriter + '_>, TransferError>;
}

// ============================================================================
// Local volume
// ============================================================================

/// A host directory standing in for the device root.
pub struct LocalVolume {
    name: String,
    root: PathBuf,
}

impl LocalVolume {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            name: root.display().to_string(),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a device-style path under the root.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let relative = path.trim_start_matches('/');
        if relative.is_empty() || relative == "." {
            self.root.clone()
        } else {
            self.root.join(relative)
        }
    }

    fn io_error(path: &Path, context: &str, e: std::io::Error) -> TransferError {
        TransferError::Io {
            path: path.display().to_string(),
            message: format!("{}: {}", context, e),
        }
    }
}

impl TreeVolume for LocalVolume {
    fn name(&self) -> &str {
        &self.name
    }

    fn exists(&self, path: &str) -> bool {
        fs::symlink_metadata(self.resolve(path)).is_ok()
    }

    fn list_directory(&self, path: &str) -> Result<Vec<VolumeEntry>, TransferError> {
        let abs_path = self.resolve(path);
        let read_dir = fs::read_dir(&abs_path).map_err(|e| Self::io_error(&abs_path, "Failed to list directory", e))?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| Self::io_error(&abs_path, "Failed to read directory entry", e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            // `DirEntry::file_type` doesn't follow symlinks.
            let file_type = entry
                .file_type()
                .map_err(|e| Self::io_error(&entry.path(), "Failed to read file type", e))?;
            let kind = if file_type.is_dir() {
                EntryKind::Directory
            } else if file_type.is_file() {
                EntryKind::File
            } else {
                log::debug!("list_directory: skipping {} (not a file or directory)", entry.path().display());
                continue;
            };
            entries.push(VolumeEntry { name, kind });
        }
        Ok(entries)
    }

    fn ensure_directory(&self, path: &str) -> Result<bool, TransferError> {
        let abs_path = self.resolve(path);
        if abs_path.is_dir() {
            return Ok(false);
        }
        fs::create_dir_all(&abs_path).map_err(|e| Self::io_error(&abs_path, "Failed to create directory", e))?;
        Ok(true)
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn Read + '_>, TransferError> {
        let abs_path = self.resolve(path);
        let file = fs::File::open(&abs_path).map_err(|e| Self::io_error(&abs_path, "Failed to open source file", e))?;
        Ok(Box::new(file))
    }

    fn open_write(&self, path: &str) -> Result<Box<dyn VolumeWriter + '_>, TransferError> {
        let abs_path = self.resolve(path);
        let file = fs::File::create(&abs_path)
            .map_err(|e| Self::io_error(&abs_path, "Failed to create destination file", e))?;
        Ok(Box::new(LocalWriter { path: abs_path, file }))
    }
}

struct LocalWriter {
    path: PathBuf,
    file: fs::File,
}

impl Write for LocalWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

impl VolumeWriter for LocalWriter {
    fn finish(self: Box<Self>) -> Result<(), TransferError> {
        self.file
            .sync_data()
            .map_err(|e| LocalVolume::io_error(&self.path, "Failed to finish destination file", e))
    }
}

// ============================================================================
// Device volume
// ============================================================================

/// The device's AFC tree, through a session.
pub struct DeviceVolume<'s, B: DeviceBackend> {
    session: &'s DeviceSession<B>,
}

impl<'s, B: DeviceBackend> DeviceVolume<'s, B> {
    pub fn new(session: &'s DeviceSession<B>) -> Self {
        Self { session }
    }
}

impl<B: DeviceBackend> TreeVolume for DeviceVolume<'_, B> {
    fn name(&self) -> &str {
        self.session.device_id()
    }

    fn exists(&self, path: &str) -> bool {
        self.session.exists(path)
    }

    fn list_directory(&self, path: &str) -> Result<Vec<VolumeEntry>, TransferError> {
        // Name filters only; each survivor is stat-ed once below.
        let names = self
            .session
            .read_directory(path, DirFilter::NO_DOT_AND_DOT_DOT | DirFilter::NO_HIDDEN)?;

        let mut entries = Vec::with_capacity(names.len());
        for name in names {
            let entry_path = crate::device::join_device_path(path, &name);
            match self.session.entry_kind(&entry_path) {
                Some(kind @ (EntryKind::File | EntryKind::Directory)) => entries.push(VolumeEntry { name, kind }),
                other => log::debug!("list_directory: skipping {} ({:?})", entry_path, other),
            }
        }
        Ok(entries)
    }

    fn ensure_directory(&self, path: &str) -> Result<bool, TransferError> {
        if self.session.entry_kind(path) == Some(EntryKind::Directory) {
            return Ok(false);
        }
        self.session.make_directory(path)?;
        Ok(true)
    }

    fn open_read(&self, path: &str) -> Result<Box<dyn Read + '_>, TransferError> {
        Ok(Box::new(self.session.open_file(path, OpenMode::ReadOnly)?))
    }

    fn open_write(&self, path: &str) -> Result<Box<dyn VolumeWriter + '_>, TransferError> {
        Ok(Box::new(self.session.open_file(path, OpenMode::WriteTruncate)?))
    }
}

impl<B: DeviceBackend> VolumeWriter for RemoteFile<'_, B> {
    fn finish(self: Box<Self>) -> Result<(), TransferError> {
        Ok((*self).close()?)
    }
}

//! Types shared by the transfer code: errors, events, stats.

use serde::Serialize;

use super::tasks::TaskId;
use crate::device::DeviceError;

/// Which way a tree transfer copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    /// Device subtrees into the local root.
    FromDevice,
    /// Local subtrees onto the device.
    ToDevice,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FromDevice => write!(f, "from device"),
            Self::ToDevice => write!(f, "to device"),
        }
    }
}

/// Counters for one subtree copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferStats {
    pub files_copied: u64,
    pub directories_created: u64,
    pub bytes_copied: u64,
}

/// Events delivered to the context that created a `TreeTransfer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransferEvent {
    /// A subtree task was registered and its copy is about to start.
    #[serde(rename_all = "camelCase")]
    TaskStarted { transfer_id: String, task_id: TaskId },
    /// The transfer is over. Sent exactly once, always last.
    #[serde(rename_all = "camelCase")]
    CopyFinished { transfer_id: String, success: bool },
}

/// Why a destination filename could not be allocated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AllocationError {
    /// Not even `F00` exists under the music root.
    NoFamilyDirectories { music_root: String },
    /// The chosen family directory was gone when re-checked.
    FamilyDirectoryMissing { path: String },
    /// Every drawn name collided.
    Exhausted { directory: String, attempts: u32 },
}

impl std::fmt::Display for AllocationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoFamilyDirectories { music_root } => {
                write!(f, "No family directories under {music_root}")
            }
            Self::FamilyDirectoryMissing { path } => write!(f, "Family directory {path} does not exist"),
            Self::Exhausted { directory, attempts } => {
                write!(f, "No unused filename in {directory} after {attempts} attempts")
            }
        }
    }
}

impl std::error::Error for AllocationError {}

/// Errors that end a file, subtree, or transfer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransferError {
    /// The device session has no file service.
    NotReady { device_id: String },
    /// A device session or remote file operation failed.
    Device { error: DeviceError },
    /// No destination name could be allocated on the device.
    Allocation { error: AllocationError },
    /// Local filesystem error.
    Io { path: String, message: String },
    /// The destination accepted fewer bytes than it was given.
    ShortWrite { path: String, expected: usize, written: usize },
}

impl TransferError {
    /// Returns a user-friendly message for this error.
    pub fn user_message(&self) -> String {
        match self {
            Self::NotReady { .. } => "Copy failed: the device is not connected.".to_string(),
            Self::Device { error } => error.user_message(),
            Self::Allocation { .. } => {
                "Copy failed: no room for a new track in the device's music library.".to_string()
            }
            Self::Io { path, .. } => format!("Copy failed: couldn't access {}.", path),
            Self::ShortWrite { path, .. } => format!("Copy failed: {} was only partly written.", path),
        }
    }
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotReady { device_id } => write!(f, "File service not ready for {device_id}"),
            Self::Device { error } => write!(f, "{error}"),
            Self::Allocation { error } => write!(f, "{error}"),
            Self::Io { path, message } => write!(f, "I/O error on {path}: {message}"),
            Self::ShortWrite {
                path,
                expected,
                written,
            } => write!(f, "Short write on {path}: {written} of {expected} bytes"),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Device { error } => Some(error),
            Self::Allocation { error } => Some(error),
            _ => None,
        }
    }
}

impl From<DeviceError> for TransferError {
    fn from(error: DeviceError) -> Self {
        match error {
            DeviceError::NotReady { device_id } => Self::NotReady { device_id },
            error => Self::Device { error },
        }
    }
}

impl From<AllocationError> for TransferError {
    fn from(error: AllocationError) -> Self {
        Self::Allocation { error }
    }
}

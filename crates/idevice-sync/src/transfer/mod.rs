//! Whole-tree transfers between a local directory and a device.
//!
//! A `TreeTransfer` mirrors the configured important directories (`/iTunes_Control/iTunes`
//! and friends) in one direction. It opens its own `DeviceSession`, registers one task per
//! subtree with the task tracker, and walks the subtrees one after the other on a single
//! thread. The context that created the transfer keeps the `TransferEvents` receiver and
//! learns the outcome from it, whatever thread did the copying.

pub mod allocation;
pub mod copy;
pub mod tasks;
pub mod track;
pub mod types;
pub mod volume;


pub use allocation::{FilenameAllocator, TrackMetadata};
pub use copy::{copy_file, copy_stream, copy_tree};
pub use tasks::{InMemoryTaskTracker, TaskId, TaskSummary, TaskTracker};
pub use track::{delete_track, upload_track};
pub use types::{AllocationError, Direction, TransferError, TransferEvent, TransferStats};
pub use volume::{DeviceVolume, LocalVolume, TreeVolume, VolumeEntry, VolumeWriter};

use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::device::{DeviceBackend, DeviceSession};

/// A one-shot tree copy for one device.
///
/// `copy_from_device`, `copy_to_device`, `run`, and `spawn` all consume the transfer, so each
/// instance drives exactly one copy to its end.
pub struct TreeTransfer<B: DeviceBackend> {
    transfer_id: String,
    backend: Arc<B>,
    device_id: String,
    local_root: PathBuf,
    tracker: Arc<dyn TaskTracker>,
    config: SyncConfig,
    events: mpsc::UnboundedSender<TransferEvent>,
}

impl<B: DeviceBackend> TreeTransfer<B> {
    /// Creates a transfer and the receiver its events go to.
    pub fn new(
        backend: Arc<B>,
        device_id: &str,
        local_root: impl Into<PathBuf>,
        tracker: Arc<dyn TaskTracker>,
        config: SyncConfig,
    ) -> (Self, TransferEvents) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let transfer = Self {
            transfer_id: Uuid::new_v4().to_string(),
            backend,
            device_id: device_id.to_string(),
            local_root: local_root.into(),
            tracker,
            config,
            events: sender,
        };
        (transfer, TransferEvents { receiver })
    }

    pub fn transfer_id(&self) -> &str {
        &self.transfer_id
    }

    /// Copies the important directories from the device into the local root.
    pub fn copy_from_device(self) -> bool {
        self.run(Direction::FromDevice)
    }

    /// Copies the important directories from the local root onto the device.
    pub fn copy_to_device(self) -> bool {
        self.run(Direction::ToDevice)
    }

    /// Runs the transfer on the calling thread and emits `CopyFinished` with the result.
    pub fn run(self, direction: Direction) -> bool {
        info!(
            "TreeTransfer::run: transfer_id={}, device={}, local_root={}, {}",
            self.transfer_id,
            self.device_id,
            self.local_root.display(),
            direction
        );

        let success = self.copy_subtrees(direction);

        if success {
            info!("TreeTransfer::run: transfer {} finished", self.transfer_id);
        } else {
            error!("TreeTransfer::run: transfer {} failed", self.transfer_id);
        }
        // The receiver may be gone; the result is still returned.
        let _ = self.events.send(TransferEvent::CopyFinished {
            transfer_id: self.transfer_id.clone(),
            success,
        });
        success
    }

    /// Connects and copies every important directory. The session is closed before returning.
    fn copy_subtrees(&self, direction: Direction) -> bool {
        if let Err(e) = self.config.validate() {
            error!("copy_subtrees: transfer {} has a bad config: {}", self.transfer_id, e);
            return false;
        }

        let session = DeviceSession::connect(Arc::clone(&self.backend), &self.device_id, &self.config);
        if !session.is_file_service_ready() {
            match session.connect_error() {
                Some(e) => error!("copy_subtrees: transfer {} can't start: {}", self.transfer_id, e),
                None => error!("copy_subtrees: transfer {} can't start: no file service", self.transfer_id),
            }
            return false;
        }

        let device = DeviceVolume::new(&session);
        let local = LocalVolume::new(self.local_root.clone());
        let (source, dest): (&dyn TreeVolume, &dyn TreeVolume) = match direction {
            Direction::FromDevice => (&device, &local),
            Direction::ToDevice => (&local, &device),
        };

        let mut buffer = vec![0u8; self.config.buffer_size];
        for dir in &self.config.important_directories {
            let task_id = self.tracker.start_task(&format!("Copying {} {}", dir, direction));
            let _ = self.events.send(TransferEvent::TaskStarted {
                transfer_id: self.transfer_id.clone(),
                task_id,
            });

            let mut report = |stats: &TransferStats| self.tracker.set_task_progress(task_id, stats.files_copied, 0);
            match copy_tree(source, dest, dir, &mut buffer, &mut report) {
                Ok(stats) => info!(
                    "copy_subtrees: {} done, {} files, {} directories created, {} bytes",
                    dir, stats.files_copied, stats.directories_created, stats.bytes_copied
                ),
                Err(e) => {
                    error!("copy_subtrees: {} failed: {}", dir, e);
                    return false;
                }
            }
        }
        true
    }
}

impl<B: DeviceBackend + 'static> TreeTransfer<B> {
    /// Runs the transfer on a blocking worker thread. Must be called inside a tokio runtime.
    pub fn spawn(self, direction: Direction) -> tokio::task::JoinHandle<bool> {
        tokio::task::spawn_blocking(move || self.run(direction))
    }
}

/// Receiving end of a transfer's events, owned by the context that created the transfer.
#[derive(Debug)]
pub struct TransferEvents {
    receiver: mpsc::UnboundedReceiver<TransferEvent>,
}

impl TransferEvents {
    /// Waits for the next event. `None` once the transfer is over and everything was read.
    pub async fn next(&mut self) -> Option<TransferEvent> {
        self.receiver.recv().await
    }

    /// Blocking variant of `next`, for threads outside the async runtime.
    pub fn blocking_next(&mut self) -> Option<TransferEvent> {
        self.receiver.blocking_recv()
    }

    /// Returns an already delivered event without waiting.
    pub fn try_next(&mut self) -> Option<TransferEvent> {
        self.receiver.try_recv().ok()
    }

    /// Skips to the `CopyFinished` event and returns its outcome. A transfer that ended
    /// without one (the worker panicked) counts as failed.
    pub async fn finished(mut self) -> bool {
        while let Some(event) = self.next().await {
            if let TransferEvent::CopyFinished { success, .. } = event {
                return success;
            }
        }
        false
    }
}

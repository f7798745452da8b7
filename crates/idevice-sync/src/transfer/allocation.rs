//! Destination filenames for tracks copied onto the device.
//!
//! The device's music library spreads tracks over `F00`, `F01`, ... under the music root and
//! has no allocation table. A new name is picked at random and checked for existence until
//! an unused one turns up.

use rand::Rng;
use std::path::Path;

use super::types::AllocationError;
use crate::config::SyncConfig;
use crate::device::{DeviceBackend, DeviceSession, join_device_path};

/// Upper bound (exclusive) of the random filename number.
const SUFFIX_RANGE: u32 = 999_999;

/// What the allocator needs to know about a track.
pub trait TrackMetadata {
    /// The track's original filename (or path); only its extension is used.
    fn filename(&self) -> &str;
}

impl TrackMetadata for str {
    fn filename(&self) -> &str {
        self
    }
}

impl TrackMetadata for String {
    fn filename(&self) -> &str {
        self
    }
}

/// Picks unused destination paths in the device's music library.
pub struct FilenameAllocator<'s, B: DeviceBackend> {
    session: &'s DeviceSession<B>,
    music_root: String,
    prefix: String,
    fallback_extension: String,
    max_attempts: u32,
}

impl<'s, B: DeviceBackend> FilenameAllocator<'s, B> {
    pub fn new(session: &'s DeviceSession<B>, config: &SyncConfig) -> Self {
        Self {
            session,
            music_root: config.music_root.clone(),
            prefix: config.filename_prefix.clone(),
            fallback_extension: config.fallback_extension.clone(),
            max_attempts: config.max_name_attempts,
        }
    }

    /// Path of the family directory with the given index, like `/iTunes_Control/Music/F07`.
    pub fn family_directory(&self, index: usize) -> String {
        join_device_path(&self.music_root, &format!("F{:02}", index))
    }

    /// Counts the family directories by probing `F00`, `F01`, ... up to the first missing one.
    pub fn family_size(&self) -> usize {
        let mut size = 0;
        while self.session.exists(&self.family_directory(size)) {
            size += 1;
        }
        log::debug!("family_size: {} directories under {}", size, self.music_root);
        size
    }

    /// Extension for the destination name: the track's own, lowercased, or the fallback.
    pub fn extension_for(&self, track: &(impl TrackMetadata + ?Sized)) -> String {
        Path::new(track.filename())
            .extension()
            .and_then(|ext| ext.to_str())
            .filter(|ext| !ext.is_empty())
            .map(|ext| ext.to_lowercase())
            .unwrap_or_else(|| self.fallback_extension.clone())
    }

    /// Returns the full device path of an unused destination for `track`.
    pub fn allocate<M, R>(&self, track: &M, rng: &mut R) -> Result<String, AllocationError>
    where
        M: TrackMetadata + ?Sized,
        R: Rng + ?Sized,
    {
        let size = self.family_size();
        if size == 0 {
            log::error!("allocate: no family directories under {}", self.music_root);
            return Err(AllocationError::NoFamilyDirectories {
                music_root: self.music_root.clone(),
            });
        }

        let directory = self.family_directory(rng.gen_range(0..size));
        if !self.session.exists(&directory) {
            log::error!("allocate: family directory {} disappeared", directory);
            return Err(AllocationError::FamilyDirectoryMissing { path: directory });
        }

        let extension = self.extension_for(track);
        for attempt in 1..=self.max_attempts {
            let number = rng.gen_range(0..SUFFIX_RANGE);
            let candidate = join_device_path(&directory, &format!("{}{:06}.{}", self.prefix, number, extension));
            if !self.session.exists(&candidate) {
                log::debug!("allocate: {} -> {} (attempt {})", track.filename(), candidate, attempt);
                return Ok(candidate);
            }
        }

        log::error!(
            "allocate: no unused name in {} after {} attempts",
            directory,
            self.max_attempts
        );
        Err(AllocationError::Exhausted {
            directory,
            attempts: self.max_attempts,
        })
    }
}

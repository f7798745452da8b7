//! Host-to-device tree sync over the AFC file service of iOS devices.
//!
//! - `device`: sessions to one device (transport, lockdown handshake, file service) and the
//!   remote file primitives on top of them.
//! - `transfer`: whole-tree copies of the important `iTunes_Control` directories in either
//!   direction, plus single-track upload with filename allocation.
//! - `config`: `SyncConfig`, loadable from JSON.
//!
//! The protocol stack itself sits behind `DeviceBackend`. The `virtual-device` feature adds an
//! in-memory backend for tests and demos.

// Deny unused code to catch dead code early
#![deny(unused)]
// Warn on unused dependencies
#![warn(unused_crate_dependencies)]
// Warn on redundant path prefixes (e.g., std::path::Path when Path is imported)
#![warn(unused_qualifications)]
// Use log::* macros instead of println!/eprintln! for proper log level control
#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod config;
pub mod device;
mod ignore_poison;
pub mod transfer;

pub use config::{ConfigError, SyncConfig};
pub use device::{DeviceBackend, DeviceError, DeviceSession, DirFilter, EntryKind, PropertyValue};
pub use transfer::{
    Direction, InMemoryTaskTracker, TaskTracker, TransferError, TransferEvent, TransferEvents, TreeTransfer,
};

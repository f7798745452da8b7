//! Device sessions over the lockdown/AFC protocol stack.
//!
//! A `DeviceSession` owns everything needed to touch one device's media partition:
//!
//! - the usbmux transport,
//! - the lockdownd control channel (handshake done with our client label),
//! - the AFC file service client on the port lockdownd handed out.
//!
//! The handles are nested (`Connection` holds the transport and maybe a `ControlChannel`,
//! which holds the lockdown client and maybe a `FileService`), so a later handle can't
//! exist without the earlier ones and teardown walks the nesting inside out.
//!
//! Connecting never fails loudly: a session that couldn't be set up is inert, reports
//! `is_file_service_ready() == false`, and keeps the first error in `connect_error()`.
//! File operations on such a session return `DeviceError::NotReady`.

pub mod backend;
pub mod errors;
pub mod filter;
pub mod property;
pub mod remote_file;
#[cfg(any(test, feature = "virtual-device"))]
pub mod virtual_device;

#[cfg(test)]
mod session_test;

pub use backend::{DeviceBackend, OpenMode, ProtocolError, ProtocolLayer, RemoteFileHandle, ServicePort};
pub use errors::DeviceError;
pub use filter::{DirFilter, EntryKind};
pub use property::PropertyValue;
pub use remote_file::RemoteFile;

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::SyncConfig;

/// File info key holding the entry type.
const IFMT_KEY: &str = "st_ifmt";

/// Joins a device directory path and an entry name.
pub fn join_device_path(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

struct FileService<B: DeviceBackend> {
    port: ServicePort,
    client: B::FileClient,
}

struct ControlChannel<B: DeviceBackend> {
    handle: B::Control,
    /// Set when the device dropped the channel. A broken channel is not released at teardown.
    broken: AtomicBool,
    files: Option<FileService<B>>,
}

struct Connection<B: DeviceBackend> {
    transport: B::Transport,
    control: Option<ControlChannel<B>>,
}

impl<B: DeviceBackend> Connection<B> {
    fn transport_only(transport: B::Transport) -> Self {
        Self {
            transport,
            control: None,
        }
    }

    fn with_control(transport: B::Transport, control: B::Control, files: Option<FileService<B>>) -> Self {
        Self {
            transport,
            control: Some(ControlChannel {
                handle: control,
                broken: AtomicBool::new(false),
                files,
            }),
        }
    }
}

/// A live (or inert) connection to one device.
pub struct DeviceSession<B: DeviceBackend> {
    backend: Arc<B>,
    device_id: String,
    connection: Option<Connection<B>>,
    connect_error: Option<DeviceError>,
}

impl<B: DeviceBackend> DeviceSession<B> {
    /// Connects to a device: transport, handshake, file service start, file client.
    ///
    /// Stops at the first failing step; the handles acquired so far are kept (and released
    /// when the session drops) and the failure is available from `connect_error()`.
    pub fn connect(backend: Arc<B>, device_id: &str, config: &SyncConfig) -> Self {
        info!("connect: opening session to device {}", device_id);
        let (connection, connect_error) = establish(backend.as_ref(), device_id, config);

        match &connect_error {
            None => info!("connect: device {} ready", device_id),
            Some(e) => error!("connect: {}", e),
        }

        Self {
            backend,
            device_id: device_id.to_string(),
            connection,
            connect_error,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// The first error hit while connecting, if any.
    pub fn connect_error(&self) -> Option<&DeviceError> {
        self.connect_error.as_ref()
    }

    /// True if file operations can be issued.
    pub fn is_file_service_ready(&self) -> bool {
        self.control().is_some_and(|c| c.files.is_some())
    }

    /// Port of the running file service.
    pub fn service_port(&self) -> Option<ServicePort> {
        self.control().and_then(|c| c.files.as_ref()).map(|f| f.port)
    }

    /// Reads a lockdown property. Absent values, failed requests, and unsupported value
    /// types all give `None`.
    pub fn property(&self, name: &str, domain: Option<&str>) -> Option<PropertyValue> {
        let Some(channel) = self.control() else {
            warn!("property: no control channel for {} (key={})", self.device_id, name);
            return None;
        };

        match self.backend.get_value(&channel.handle, domain, name) {
            Ok(Some(value)) => PropertyValue::from_plist(value),
            Ok(None) => {
                debug!("property: {} has no value for domain={:?} key={}", self.device_id, domain, name);
                None
            }
            Err(e) => {
                warn!("property: {} domain={:?} key={}: {}", self.device_id, domain, name, e);
                if e.session_lost {
                    warn!("property: control channel to {} is gone, marking session broken", self.device_id);
                    channel.broken.store(true, Ordering::Relaxed);
                }
                None
            }
        }
    }

    /// Lists a remote directory, keeping only the names `filter` accepts, in device order.
    ///
    /// An empty directory gives `Ok(vec![])`; a failed listing is an error.
    pub fn read_directory(&self, path: &str, filter: DirFilter) -> Result<Vec<String>, DeviceError> {
        let files = self.files("read_directory")?;
        let names = self
            .backend
            .read_directory(&files.client, path)
            .map_err(|e| self.protocol_error("read_directory", path, e))?;

        if filter.is_empty() {
            return Ok(names);
        }

        let mut kept = Vec::with_capacity(names.len());
        for name in names {
            if !filter.accepts_name(&name) {
                continue;
            }
            if filter.needs_entry_kind() {
                let kind = self.entry_kind(&join_device_path(path, &name));
                if !filter.accepts_kind(kind) {
                    continue;
                }
            }
            kept.push(name);
        }
        Ok(kept)
    }

    /// Looks up one key in the file info of `path`.
    pub fn file_info(&self, path: &str, key: &str) -> Option<String> {
        let files = self.files("file_info").ok()?;
        let info = match self.backend.get_file_info(&files.client, path) {
            Ok(info) => info,
            Err(e) => {
                debug!("file_info: {} path={}: {}", self.device_id, path, e);
                return None;
            }
        };

        // Later duplicates win.
        info.chunks_exact(2)
            .rev()
            .find(|pair| pair[0] == key)
            .map(|pair| pair[1].clone())
    }

    /// Type of the entry at `path`, `None` if it doesn't exist.
    pub fn entry_kind(&self, path: &str) -> Option<EntryKind> {
        self.file_info(path, IFMT_KEY).map(|ifmt| EntryKind::from_ifmt(&ifmt))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.file_info(path, IFMT_KEY).is_some()
    }

    /// Creates a directory, parents included.
    pub fn make_directory(&self, path: &str) -> Result<(), DeviceError> {
        let files = self.files("make_directory")?;
        debug!("make_directory: {} path={}", self.device_id, path);
        self.backend
            .make_directory(&files.client, path)
            .map_err(|e| self.protocol_error("make_directory", path, e))
    }

    /// Removes a file or an empty directory.
    pub fn remove_path(&self, path: &str) -> Result<(), DeviceError> {
        let files = self.files("remove_path")?;
        debug!("remove_path: {} path={}", self.device_id, path);
        self.backend
            .remove_path(&files.client, path)
            .map_err(|e| self.protocol_error("remove_path", path, e))
    }

    /// Opens a remote file. The returned stream closes itself when dropped.
    pub fn open_file(&self, path: &str, mode: OpenMode) -> Result<RemoteFile<'_, B>, DeviceError> {
        let files = self.files("open_file")?;
        let handle = self
            .backend
            .file_open(&files.client, path, mode)
            .map_err(|e| self.protocol_error("file_open", path, e))?;
        debug!("open_file: {} path={} mode={:?} handle={:?}", self.device_id, path, mode, handle);
        Ok(RemoteFile::new(
            self.backend.as_ref(),
            &files.client,
            &self.device_id,
            path,
            handle,
            mode,
        ))
    }

    fn control(&self) -> Option<&ControlChannel<B>> {
        self.connection
            .as_ref()
            .and_then(|c| c.control.as_ref())
            .filter(|c| !c.broken.load(Ordering::Relaxed))
    }

    fn files(&self, operation: &str) -> Result<&FileService<B>, DeviceError> {
        self.control().and_then(|c| c.files.as_ref()).ok_or_else(|| {
            error!("{}: file service not ready for {}", operation, self.device_id);
            DeviceError::NotReady {
                device_id: self.device_id.clone(),
            }
        })
    }

    fn protocol_error(&self, operation: &'static str, path: &str, error: ProtocolError) -> DeviceError {
        let err = DeviceError::Protocol {
            device_id: self.device_id.clone(),
            operation,
            path: path.to_string(),
            error,
        };
        error!("{}", err);
        err
    }
}

impl<B: DeviceBackend> Drop for DeviceSession<B> {
    fn drop(&mut self) {
        let Some(Connection { transport, control }) = self.connection.take() else {
            return;
        };

        if let Some(ControlChannel { handle, broken, files }) = control {
            if let Some(FileService { client, .. }) = files
                && let Err(e) = self.backend.free_file_client(client)
            {
                warn!("DeviceSession::drop: freeing file client of {}: {}", self.device_id, e);
            }
            if broken.into_inner() {
                debug!("DeviceSession::drop: control channel of {} is broken, not releasing it", self.device_id);
            } else if let Err(e) = self.backend.free_control(handle) {
                warn!("DeviceSession::drop: freeing control channel of {}: {}", self.device_id, e);
            }
        }

        if let Err(e) = self.backend.free_transport(transport) {
            warn!("DeviceSession::drop: freeing transport of {}: {}", self.device_id, e);
        }
        debug!("DeviceSession::drop: session to {} closed", self.device_id);
    }
}

/// Runs the four connection steps, returning whatever was acquired plus the first error.
fn establish<B: DeviceBackend>(
    backend: &B,
    device_id: &str,
    config: &SyncConfig,
) -> (Option<Connection<B>>, Option<DeviceError>) {
    let transport = match backend.open_transport(device_id) {
        Ok(transport) => transport,
        Err(error) => {
            let err = DeviceError::DeviceNotFound {
                device_id: device_id.to_string(),
                error,
            };
            return (None, Some(err));
        }
    };

    let control = match backend.handshake(&transport, &config.client_label) {
        Ok(control) => control,
        Err(error) => {
            let err = DeviceError::HandshakeRejected {
                device_id: device_id.to_string(),
                error,
            };
            return (Some(Connection::transport_only(transport)), Some(err));
        }
    };

    let port = match backend.start_service(&control, &config.file_service_name) {
        Ok(port) => port,
        Err(error) => {
            let err = DeviceError::ServiceUnavailable {
                device_id: device_id.to_string(),
                service: config.file_service_name.clone(),
                error,
            };
            return (Some(Connection::with_control(transport, control, None)), Some(err));
        }
    };
    debug!("connect: {} started on port {}", config.file_service_name, port.get());

    match backend.open_file_client(&transport, port) {
        Ok(client) => (
            Some(Connection::with_control(transport, control, Some(FileService { port, client }))),
            None,
        ),
        Err(error) => {
            let err = DeviceError::ClientCreationFailed {
                device_id: device_id.to_string(),
                error,
            };
            (Some(Connection::with_control(transport, control, None)), Some(err))
        }
    }
}

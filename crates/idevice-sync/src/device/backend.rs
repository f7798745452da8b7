//! The device protocol stack, seen as a set of blocking primitives.
//!
//! Implementations wrap a real usbmux/lockdown/AFC stack (or the in-memory
//! `VirtualDevice`). Handle types are associated types so a session can own them without
//! knowing what they are. The methods that create a handle take a reference to the handle
//! it depends on, which is what lets `DeviceSession` encode the acquisition order.

use serde::Serialize;

/// Which layer of the protocol stack produced an error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolLayer {
    /// usbmux transport (`idevice_*`).
    Transport,
    /// lockdownd control channel (`lockdownd_*`).
    Lockdown,
    /// AFC file service (`afc_*`).
    Afc,
}

impl std::fmt::Display for ProtocolLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport => write!(f, "idevice"),
            Self::Lockdown => write!(f, "lockdown"),
            Self::Afc => write!(f, "afc"),
        }
    }
}

/// A failed protocol call: the layer and its numeric error code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProtocolError {
    pub layer: ProtocolLayer,
    pub code: i32,
    /// The device tore down the channel; releasing it again would be an error of its own.
    pub session_lost: bool,
}

impl ProtocolError {
    pub fn new(layer: ProtocolLayer, code: i32) -> Self {
        Self {
            layer,
            code,
            session_lost: false,
        }
    }

    /// Marks the error as one after which the channel is gone.
    pub fn with_session_lost(mut self) -> Self {
        self.session_lost = true;
        self
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error: {}", self.layer, self.code)?;
        if self.session_lost {
            write!(f, " (session lost)")?;
        }
        Ok(())
    }
}

impl std::error::Error for ProtocolError {}

/// Port of a service started on the control channel.
///
/// Only a successful `start_service` hands one out, so holding one is proof the
/// control channel got that far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServicePort(u16);

impl ServicePort {
    /// For backends: wraps the port number the device answered with.
    pub fn new(port: u16) -> Self {
        Self(port)
    }

    pub fn get(self) -> u16 {
        self.0
    }
}

/// Mode for opening a remote file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenMode {
    /// Read only, the file must exist.
    ReadOnly,
    /// Write only, created or truncated.
    WriteTruncate,
}

/// Handle of an open remote file, valid for the file client that opened it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RemoteFileHandle(pub u64);

/// Blocking primitives of the device protocol stack.
///
/// Handles are released only through the `free_*` methods; dropping a handle value must
/// not release anything, since a broken control channel is deliberately never freed.
///
/// Calls against one file client are never issued concurrently; implementations don't
/// have to multiplex.
pub trait DeviceBackend: Send + Sync {
    /// Open usbmux connection to one device.
    type Transport: Send;
    /// Authenticated lockdownd client.
    type Control: Send;
    /// AFC client bound to a service port.
    type FileClient: Send;

    // ========================================
    // Session setup and teardown
    // ========================================

    /// Opens the transport to the device with the given UDID.
    fn open_transport(&self, device_id: &str) -> Result<Self::Transport, ProtocolError>;

    /// Creates a lockdown client and performs the pairing handshake.
    fn handshake(&self, transport: &Self::Transport, label: &str) -> Result<Self::Control, ProtocolError>;

    /// Asks lockdownd to start a service, returning its port.
    fn start_service(&self, control: &Self::Control, service: &str) -> Result<ServicePort, ProtocolError>;

    /// Opens a file service client on the port of a started service.
    fn open_file_client(&self, transport: &Self::Transport, port: ServicePort)
    -> Result<Self::FileClient, ProtocolError>;

    fn free_file_client(&self, client: Self::FileClient) -> Result<(), ProtocolError>;

    fn free_control(&self, control: Self::Control) -> Result<(), ProtocolError>;

    fn free_transport(&self, transport: Self::Transport) -> Result<(), ProtocolError>;

    // ========================================
    // Control channel
    // ========================================

    /// Reads a lockdown value. `Ok(None)` means the device has no such value.
    fn get_value(
        &self,
        control: &Self::Control,
        domain: Option<&str>,
        key: &str,
    ) -> Result<Option<plist::Value>, ProtocolError>;

    // ========================================
    // File service
    // ========================================

    /// Lists the names in a directory, `.` and `..` included, in device order.
    fn read_directory(&self, client: &Self::FileClient, path: &str) -> Result<Vec<String>, ProtocolError>;

    /// Returns file info as a flat, alternating key/value list.
    fn get_file_info(&self, client: &Self::FileClient, path: &str) -> Result<Vec<String>, ProtocolError>;

    /// Creates a directory and any missing parents.
    fn make_directory(&self, client: &Self::FileClient, path: &str) -> Result<(), ProtocolError>;

    /// Removes a file or an empty directory.
    fn remove_path(&self, client: &Self::FileClient, path: &str) -> Result<(), ProtocolError>;

    fn file_open(&self, client: &Self::FileClient, path: &str, mode: OpenMode)
    -> Result<RemoteFileHandle, ProtocolError>;

    /// Reads up to `buf.len()` bytes. `Ok(0)` is end of file.
    fn file_read(&self, client: &Self::FileClient, handle: RemoteFileHandle, buf: &mut [u8])
    -> Result<usize, ProtocolError>;

    /// Writes `data`, returning how many bytes the device accepted.
    fn file_write(&self, client: &Self::FileClient, handle: RemoteFileHandle, data: &[u8])
    -> Result<usize, ProtocolError>;

    fn file_close(&self, client: &Self::FileClient, handle: RemoteFileHandle) -> Result<(), ProtocolError>;
}

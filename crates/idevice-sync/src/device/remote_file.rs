//! Scoped remote file streams.

use std::io;

use super::backend::{DeviceBackend, OpenMode, RemoteFileHandle};
use super::errors::DeviceError;

/// An open file on the device.
///
/// Implements `Read` and `Write` on top of the AFC primitives so it can sit on either end
/// of a streaming copy. The handle is closed when the value is dropped; `close` does the
/// same but reports the error. Borrowing the session keeps the file client alive for as
/// long as the file is open.
pub struct RemoteFile<'s, B: DeviceBackend> {
    backend: &'s B,
    client: &'s B::FileClient,
    device_id: &'s str,
    path: String,
    handle: RemoteFileHandle,
    mode: OpenMode,
    open: bool,
}

impl<'s, B: DeviceBackend> RemoteFile<'s, B> {
    pub(super) fn new(
        backend: &'s B,
        client: &'s B::FileClient,
        device_id: &'s str,
        path: &str,
        handle: RemoteFileHandle,
        mode: OpenMode,
    ) -> Self {
        Self {
            backend,
            client,
            device_id,
            path: path.to_string(),
            handle,
            mode,
            open: true,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Closes the file, reporting a failed close.
    pub fn close(mut self) -> Result<(), DeviceError> {
        self.close_handle()
    }

    fn close_handle(&mut self) -> Result<(), DeviceError> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        self.backend
            .file_close(self.client, self.handle)
            .map_err(|error| self.device_error("file_close", error))
    }

    fn device_error(&self, operation: &'static str, error: super::backend::ProtocolError) -> DeviceError {
        DeviceError::Protocol {
            device_id: self.device_id.to_string(),
            operation,
            path: self.path.clone(),
            error,
        }
    }
}

impl<B: DeviceBackend> io::Read for RemoteFile<'_, B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.backend
            .file_read(self.client, self.handle, buf)
            .map_err(|error| io::Error::other(self.device_error("file_read", error)))
    }
}

impl<B: DeviceBackend> io::Write for RemoteFile<'_, B> {
    /// Passes the device's accepted byte count through unchanged, short writes included.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.backend
            .file_write(self.client, self.handle, buf)
            .map_err(|error| io::Error::other(self.device_error("file_write", error)))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<B: DeviceBackend> Drop for RemoteFile<'_, B> {
    fn drop(&mut self) {
        if let Err(e) = self.close_handle() {
            log::warn!("RemoteFile::drop: {}", e);
        }
    }
}

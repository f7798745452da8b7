//! In-memory device backend.
//!
//! Emulates a paired iOS device closely enough for the session and transfer code: a path
//! keyed AFC tree, lockdown values, AFC-style flat file info, and listings that include
//! `.` and `..`. Faults can be injected per device and per path, and every handle release
//! is journaled so teardown order can be asserted.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use super::backend::{DeviceBackend, OpenMode, ProtocolError, ProtocolLayer, RemoteFileHandle, ServicePort};
use crate::config::AFC_SERVICE_NAME;
use crate::ignore_poison::IgnorePoison;

/// UDID of the device registered by `VirtualDevice::new`.
pub const VIRTUAL_DEVICE_ID: &str = "00008030-virtual";

/// Port the virtual lockdownd hands out for the file service.
pub const VIRTUAL_AFC_PORT: u16 = 49152;

// Error codes, numbered like their libimobiledevice counterparts.
pub const IDEVICE_NO_DEVICE: i32 = -3;
pub const LOCKDOWN_PAIRING_FAILED: i32 = -4;
pub const LOCKDOWN_INVALID_SERVICE: i32 = -16;
pub const AFC_UNKNOWN_ERROR: i32 = 1;
pub const AFC_OBJECT_NOT_FOUND: i32 = 8;
pub const AFC_OBJECT_IS_DIR: i32 = 9;
pub const AFC_IO_ERROR: i32 = 10;
pub const AFC_INVALID_ARG: i32 = 7;
pub const AFC_DIR_NOT_EMPTY: i32 = 33;
pub const AFC_OBJECT_EXISTS: i32 = 16;

#[derive(Debug, Clone)]
enum Node {
    Directory,
    File(Vec<u8>),
    Symlink(String),
}

#[derive(Debug)]
struct OpenFile {
    path: String,
    mode: OpenMode,
    position: usize,
}

#[derive(Debug, Default)]
struct Faults {
    reject_handshake: bool,
    no_service: bool,
    fail_client: bool,
    lose_session_on_property: bool,
    fail_list: HashSet<String>,
    fail_open: HashSet<String>,
    fail_read: HashSet<String>,
    fail_write: HashSet<String>,
    short_write: HashSet<String>,
    fail_close: HashSet<String>,
    /// Stat calls each path still answers before it looks missing.
    stats_left: HashMap<String, usize>,
}

#[derive(Debug)]
struct VirtualState {
    devices: HashSet<String>,
    nodes: BTreeMap<String, Node>,
    properties: HashMap<(Option<String>, String), plist::Value>,
    open_files: HashMap<u64, OpenFile>,
    next_handle: u64,
    faults: Faults,
    labels: Vec<String>,
    releases: Vec<&'static str>,
    opened_for_read: Vec<String>,
    opened_for_write: Vec<String>,
}

/// Transport handle of the virtual device.
#[derive(Debug)]
pub struct VirtualTransport {
    device_id: String,
}

/// Lockdown client of the virtual device.
#[derive(Debug)]
pub struct VirtualControl {
    device_id: String,
}

/// AFC client of the virtual device.
#[derive(Debug)]
pub struct VirtualFileClient {
    port: ServicePort,
}

/// A fake device with an in-memory AFC tree.
#[derive(Debug)]
pub struct VirtualDevice {
    state: Mutex<VirtualState>,
}

impl Default for VirtualDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            _ => parts.push(part),
        }
    }
    format!("/{}", parts.join("/"))
}

fn parent_of(path: &str) -> Option<String> {
    if path == "/" {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(i) => Some(path[..i].to_string()),
        None => None,
    }
}

fn afc_error(code: i32) -> ProtocolError {
    ProtocolError::new(ProtocolLayer::Afc, code)
}

impl VirtualState {
    fn ensure_directories(&mut self, path: &str) -> Result<(), ProtocolError> {
        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            match self.nodes.get(&current) {
                Some(Node::Directory) => {}
                Some(_) => return Err(afc_error(AFC_OBJECT_EXISTS)),
                None => {
                    self.nodes.insert(current.clone(), Node::Directory);
                }
            }
        }
        Ok(())
    }

    fn children(&self, dir: &str) -> Vec<String> {
        let prefix = if dir == "/" { "/".to_string() } else { format!("{dir}/") };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter_map(|(path, _)| {
                let rest = &path[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }
}

impl VirtualDevice {
    /// Creates a device registered as `VIRTUAL_DEVICE_ID` with an empty root directory.
    pub fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert("/".to_string(), Node::Directory);
        let mut devices = HashSet::new();
        devices.insert(VIRTUAL_DEVICE_ID.to_string());
        Self {
            state: Mutex::new(VirtualState {
                devices,
                nodes,
                properties: HashMap::new(),
                open_files: HashMap::new(),
                next_handle: 1,
                faults: Faults::default(),
                labels: Vec::new(),
                releases: Vec::new(),
                opened_for_read: Vec::new(),
                opened_for_write: Vec::new(),
            }),
        }
    }

    // ========================================
    // Builders
    // ========================================

    pub fn with_directory(self, path: &str) -> Self {
        self.add_directory(path);
        self
    }

    pub fn with_file(self, path: &str, content: &[u8]) -> Self {
        self.add_file(path, content);
        self
    }

    pub fn with_symlink(self, path: &str, target: &str) -> Self {
        let path = normalize(path);
        {
            let mut state = self.state.lock_ignore_poison();
            if let Some(parent) = parent_of(&path) {
                let _ = state.ensure_directories(&parent);
            }
            state.nodes.insert(path, Node::Symlink(target.to_string()));
        }
        self
    }

    pub fn with_property(self, domain: Option<&str>, key: &str, value: plist::Value) -> Self {
        self.state
            .lock_ignore_poison()
            .properties
            .insert((domain.map(str::to_string), key.to_string()), value);
        self
    }

    pub fn rejecting_handshake(self) -> Self {
        self.state.lock_ignore_poison().faults.reject_handshake = true;
        self
    }

    pub fn without_file_service(self) -> Self {
        self.state.lock_ignore_poison().faults.no_service = true;
        self
    }

    pub fn failing_file_client(self) -> Self {
        self.state.lock_ignore_poison().faults.fail_client = true;
        self
    }

    /// Property reads fail as if the device closed the lockdown connection.
    pub fn losing_session_on_property(self) -> Self {
        self.state.lock_ignore_poison().faults.lose_session_on_property = true;
        self
    }

    pub fn failing_list(self, path: &str) -> Self {
        self.state.lock_ignore_poison().faults.fail_list.insert(normalize(path));
        self
    }

    pub fn failing_open(self, path: &str) -> Self {
        self.state.lock_ignore_poison().faults.fail_open.insert(normalize(path));
        self
    }

    pub fn failing_read(self, path: &str) -> Self {
        self.state.lock_ignore_poison().faults.fail_read.insert(normalize(path));
        self
    }

    pub fn failing_write(self, path: &str) -> Self {
        self.state.lock_ignore_poison().faults.fail_write.insert(normalize(path));
        self
    }

    /// Writes to `path` accept only half of each chunk.
    pub fn short_writes(self, path: &str) -> Self {
        self.state.lock_ignore_poison().faults.short_write.insert(normalize(path));
        self
    }

    /// Closing a file opened at `path` fails. The handle is released all the same.
    pub fn failing_close(self, path: &str) -> Self {
        self.state.lock_ignore_poison().faults.fail_close.insert(normalize(path));
        self
    }

    /// `path` answers `count` file info calls, then reports itself missing to every later one.
    pub fn vanishing_after_stats(self, path: &str, count: usize) -> Self {
        self.state
            .lock_ignore_poison()
            .faults
            .stats_left
            .insert(normalize(path), count);
        self
    }

    // ========================================
    // Direct tree access
    // ========================================

    pub fn add_directory(&self, path: &str) {
        let path = normalize(path);
        let _ = self.state.lock_ignore_poison().ensure_directories(&path);
    }

    pub fn add_file(&self, path: &str, content: &[u8]) {
        let path = normalize(path);
        let mut state = self.state.lock_ignore_poison();
        if let Some(parent) = parent_of(&path) {
            let _ = state.ensure_directories(&parent);
        }
        state.nodes.insert(path, Node::File(content.to_vec()));
    }

    pub fn file_contents(&self, path: &str) -> Option<Vec<u8>> {
        match self.state.lock_ignore_poison().nodes.get(&normalize(path)) {
            Some(Node::File(data)) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn is_directory(&self, path: &str) -> bool {
        matches!(
            self.state.lock_ignore_poison().nodes.get(&normalize(path)),
            Some(Node::Directory)
        )
    }

    pub fn contains(&self, path: &str) -> bool {
        self.state.lock_ignore_poison().nodes.contains_key(&normalize(path))
    }

    /// Every regular file at or below `prefix`, sorted.
    pub fn files_under(&self, prefix: &str) -> Vec<String> {
        let prefix = normalize(prefix);
        self.state
            .lock_ignore_poison()
            .nodes
            .iter()
            .filter(|(path, node)| matches!(node, Node::File(_)) && path.starts_with(&prefix))
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Handle kinds in the order they were released.
    pub fn releases(&self) -> Vec<&'static str> {
        self.state.lock_ignore_poison().releases.clone()
    }

    /// Labels presented in handshakes, oldest first.
    pub fn handshake_labels(&self) -> Vec<String> {
        self.state.lock_ignore_poison().labels.clone()
    }

    /// Paths opened for reading, in order.
    pub fn opened_for_read(&self) -> Vec<String> {
        self.state.lock_ignore_poison().opened_for_read.clone()
    }

    /// Paths opened for writing, in order.
    pub fn opened_for_write(&self) -> Vec<String> {
        self.state.lock_ignore_poison().opened_for_write.clone()
    }

    pub fn open_file_count(&self) -> usize {
        self.state.lock_ignore_poison().open_files.len()
    }
}

impl DeviceBackend for VirtualDevice {
    type Transport = VirtualTransport;
    type Control = VirtualControl;
    type FileClient = VirtualFileClient;

    fn open_transport(&self, device_id: &str) -> Result<VirtualTransport, ProtocolError> {
        if !self.state.lock_ignore_poison().devices.contains(device_id) {
            return Err(ProtocolError::new(ProtocolLayer::Transport, IDEVICE_NO_DEVICE));
        }
        Ok(VirtualTransport {
            device_id: device_id.to_string(),
        })
    }

    fn handshake(&self, transport: &VirtualTransport, label: &str) -> Result<VirtualControl, ProtocolError> {
        let mut state = self.state.lock_ignore_poison();
        state.labels.push(label.to_string());
        if state.faults.reject_handshake {
            return Err(ProtocolError::new(ProtocolLayer::Lockdown, LOCKDOWN_PAIRING_FAILED));
        }
        Ok(VirtualControl {
            device_id: transport.device_id.clone(),
        })
    }

    fn start_service(&self, _control: &VirtualControl, service: &str) -> Result<ServicePort, ProtocolError> {
        if self.state.lock_ignore_poison().faults.no_service || service != AFC_SERVICE_NAME {
            return Err(ProtocolError::new(ProtocolLayer::Lockdown, LOCKDOWN_INVALID_SERVICE));
        }
        Ok(ServicePort::new(VIRTUAL_AFC_PORT))
    }

    fn open_file_client(
        &self,
        _transport: &VirtualTransport,
        port: ServicePort,
    ) -> Result<VirtualFileClient, ProtocolError> {
        if self.state.lock_ignore_poison().faults.fail_client {
            return Err(afc_error(AFC_UNKNOWN_ERROR));
        }
        Ok(VirtualFileClient { port })
    }

    fn free_file_client(&self, client: VirtualFileClient) -> Result<(), ProtocolError> {
        log::trace!("VirtualDevice: freeing file client on port {}", client.port.get());
        self.state.lock_ignore_poison().releases.push("file_client");
        Ok(())
    }

    fn free_control(&self, control: VirtualControl) -> Result<(), ProtocolError> {
        log::trace!("VirtualDevice: freeing control channel of {}", control.device_id);
        self.state.lock_ignore_poison().releases.push("control");
        Ok(())
    }

    fn free_transport(&self, transport: VirtualTransport) -> Result<(), ProtocolError> {
        log::trace!("VirtualDevice: freeing transport of {}", transport.device_id);
        self.state.lock_ignore_poison().releases.push("transport");
        Ok(())
    }

    fn get_value(
        &self,
        _control: &VirtualControl,
        domain: Option<&str>,
        key: &str,
    ) -> Result<Option<plist::Value>, ProtocolError> {
        let state = self.state.lock_ignore_poison();
        if state.faults.lose_session_on_property {
            return Err(ProtocolError::new(ProtocolLayer::Lockdown, LOCKDOWN_PAIRING_FAILED).with_session_lost());
        }
        Ok(state
            .properties
            .get(&(domain.map(str::to_string), key.to_string()))
            .cloned())
    }

    fn read_directory(&self, _client: &VirtualFileClient, path: &str) -> Result<Vec<String>, ProtocolError> {
        let path = normalize(path);
        let state = self.state.lock_ignore_poison();
        if state.faults.fail_list.contains(&path) {
            return Err(afc_error(AFC_IO_ERROR));
        }
        match state.nodes.get(&path) {
            Some(Node::Directory) => {
                let mut names = vec![".".to_string(), "..".to_string()];
                names.extend(state.children(&path));
                Ok(names)
            }
            Some(_) => Err(afc_error(AFC_INVALID_ARG)),
            None => Err(afc_error(AFC_OBJECT_NOT_FOUND)),
        }
    }

    fn get_file_info(&self, _client: &VirtualFileClient, path: &str) -> Result<Vec<String>, ProtocolError> {
        let path = normalize(path);
        let mut state = self.state.lock_ignore_poison();
        if let Some(left) = state.faults.stats_left.get_mut(&path) {
            if *left == 0 {
                return Err(afc_error(AFC_OBJECT_NOT_FOUND));
            }
            *left -= 1;
        }
        let (ifmt, size, nlink, target) = match state.nodes.get(&path) {
            Some(Node::Directory) => ("S_IFDIR", 0, 2, None),
            Some(Node::File(data)) => ("S_IFREG", data.len(), 1, None),
            Some(Node::Symlink(target)) => ("S_IFLNK", target.len(), 1, Some(target.clone())),
            None => return Err(afc_error(AFC_OBJECT_NOT_FOUND)),
        };
        let mut info = vec![
            "st_size".to_string(),
            size.to_string(),
            "st_blocks".to_string(),
            size.div_ceil(512).to_string(),
            "st_nlink".to_string(),
            nlink.to_string(),
            "st_ifmt".to_string(),
            ifmt.to_string(),
            "st_mtime".to_string(),
            "1700000000000000000".to_string(),
        ];
        if let Some(target) = target {
            info.push("LinkTarget".to_string());
            info.push(target);
        }
        Ok(info)
    }

    fn make_directory(&self, _client: &VirtualFileClient, path: &str) -> Result<(), ProtocolError> {
        self.state.lock_ignore_poison().ensure_directories(&normalize(path))
    }

    fn remove_path(&self, _client: &VirtualFileClient, path: &str) -> Result<(), ProtocolError> {
        let path = normalize(path);
        let mut state = self.state.lock_ignore_poison();
        let is_dir = match state.nodes.get(&path) {
            None => return Err(afc_error(AFC_OBJECT_NOT_FOUND)),
            Some(node) => matches!(node, Node::Directory),
        };
        if is_dir && !state.children(&path).is_empty() {
            return Err(afc_error(AFC_DIR_NOT_EMPTY));
        }
        state.nodes.remove(&path);
        Ok(())
    }

    fn file_open(
        &self,
        _client: &VirtualFileClient,
        path: &str,
        mode: OpenMode,
    ) -> Result<RemoteFileHandle, ProtocolError> {
        let path = normalize(path);
        let mut state = self.state.lock_ignore_poison();
        if state.faults.fail_open.contains(&path) {
            return Err(afc_error(AFC_IO_ERROR));
        }

        match mode {
            OpenMode::ReadOnly => {
                match state.nodes.get(&path) {
                    Some(Node::File(_)) => {}
                    Some(_) => return Err(afc_error(AFC_OBJECT_IS_DIR)),
                    None => return Err(afc_error(AFC_OBJECT_NOT_FOUND)),
                }
                state.opened_for_read.push(path.clone());
            }
            OpenMode::WriteTruncate => {
                let parent_is_dir = parent_of(&path).is_some_and(|p| matches!(state.nodes.get(&p), Some(Node::Directory)));
                if !parent_is_dir {
                    return Err(afc_error(AFC_OBJECT_NOT_FOUND));
                }
                if matches!(state.nodes.get(&path), Some(Node::Directory)) {
                    return Err(afc_error(AFC_OBJECT_IS_DIR));
                }
                state.nodes.insert(path.clone(), Node::File(Vec::new()));
                state.opened_for_write.push(path.clone());
            }
        }

        let handle = state.next_handle;
        state.next_handle += 1;
        state.open_files.insert(
            handle,
            OpenFile {
                path,
                mode,
                position: 0,
            },
        );
        Ok(RemoteFileHandle(handle))
    }

    fn file_read(
        &self,
        _client: &VirtualFileClient,
        handle: RemoteFileHandle,
        buf: &mut [u8],
    ) -> Result<usize, ProtocolError> {
        let mut guard = self.state.lock_ignore_poison();
        let state = &mut *guard;
        let open = state.open_files.get_mut(&handle.0).ok_or_else(|| afc_error(AFC_INVALID_ARG))?;
        if open.mode != OpenMode::ReadOnly || state.faults.fail_read.contains(&open.path) {
            return Err(afc_error(AFC_IO_ERROR));
        }
        let Some(Node::File(data)) = state.nodes.get(&open.path) else {
            return Err(afc_error(AFC_OBJECT_NOT_FOUND));
        };
        // The file may have been truncated under the handle.
        let start = open.position.min(data.len());
        let n = (data.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&data[start..start + n]);
        open.position = start + n;
        Ok(n)
    }

    fn file_write(
        &self,
        _client: &VirtualFileClient,
        handle: RemoteFileHandle,
        data: &[u8],
    ) -> Result<usize, ProtocolError> {
        let mut guard = self.state.lock_ignore_poison();
        let state = &mut *guard;
        let open = state.open_files.get_mut(&handle.0).ok_or_else(|| afc_error(AFC_INVALID_ARG))?;
        if open.mode != OpenMode::WriteTruncate || state.faults.fail_write.contains(&open.path) {
            return Err(afc_error(AFC_IO_ERROR));
        }
        let accepted = if state.faults.short_write.contains(&open.path) {
            data.len() / 2
        } else {
            data.len()
        };
        let Some(Node::File(content)) = state.nodes.get_mut(&open.path) else {
            return Err(afc_error(AFC_OBJECT_NOT_FOUND));
        };
        content.extend_from_slice(&data[..accepted]);
        open.position += accepted;
        Ok(accepted)
    }

    fn file_close(&self, _client: &VirtualFileClient, handle: RemoteFileHandle) -> Result<(), ProtocolError> {
        let mut state = self.state.lock_ignore_poison();
        let open = state.open_files.remove(&handle.0).ok_or_else(|| afc_error(AFC_INVALID_ARG))?;
        if state.faults.fail_close.contains(&open.path) {
            return Err(afc_error(AFC_IO_ERROR));
        }
        Ok(())
    }
}

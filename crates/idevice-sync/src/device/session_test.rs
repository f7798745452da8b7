//! Tests for `DeviceSession` against the in-memory device.

use std::io::{Read, Write};
use std::sync::Arc;

use super::virtual_device::{VIRTUAL_AFC_PORT, VIRTUAL_DEVICE_ID, VirtualDevice};
use super::*;
use crate::config::SyncConfig;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn connect(device: VirtualDevice) -> (Arc<VirtualDevice>, DeviceSession<VirtualDevice>) {
    init_logger();
    let device = Arc::new(device);
    let session = DeviceSession::connect(Arc::clone(&device), VIRTUAL_DEVICE_ID, &SyncConfig::default());
    (device, session)
}

fn sample_tree() -> VirtualDevice {
    VirtualDevice::new()
        .with_file("/iTunes_Control/iTunes/iTunesDB", b"db")
        .with_file("/iTunes_Control/iTunes/.hidden", b"h")
        .with_directory("/iTunes_Control/iTunes/Artwork")
        .with_symlink("/iTunes_Control/iTunes/link", "/iTunes_Control/iTunes/iTunesDB")
}

// ============================================================================
// Connection lifecycle
// ============================================================================

#[test]
fn test_connect_ready() {
    let (device, session) = connect(VirtualDevice::new());

    assert!(session.is_file_service_ready());
    assert!(session.connect_error().is_none());
    assert_eq!(session.service_port().map(|p| p.get()), Some(VIRTUAL_AFC_PORT));
    assert_eq!(session.device_id(), VIRTUAL_DEVICE_ID);
    assert_eq!(device.handshake_labels(), vec![env!("CARGO_PKG_NAME").to_string()]);
}

#[test]
fn test_drop_releases_in_reverse_order() {
    let (device, session) = connect(VirtualDevice::new());
    drop(session);

    assert_eq!(device.releases(), vec!["file_client", "control", "transport"]);
}

#[test]
fn test_unknown_device_is_inert() {
    init_logger();
    let device = Arc::new(VirtualDevice::new());
    let session = DeviceSession::connect(Arc::clone(&device), "not-plugged-in", &SyncConfig::default());

    assert!(!session.is_file_service_ready());
    assert!(matches!(session.connect_error(), Some(DeviceError::DeviceNotFound { .. })));
    assert!(session.connect_error().is_some_and(|e| e.is_connection_error()));
    assert!(session.service_port().is_none());
    assert!(device.handshake_labels().is_empty());

    drop(session);
    assert!(device.releases().is_empty());
}

#[test]
fn test_rejected_handshake_keeps_transport_only() {
    let (device, session) = connect(VirtualDevice::new().rejecting_handshake());

    assert!(!session.is_file_service_ready());
    assert!(matches!(session.connect_error(), Some(DeviceError::HandshakeRejected { .. })));
    assert_eq!(session.property("DeviceName", None), None);

    drop(session);
    assert_eq!(device.releases(), vec!["transport"]);
}

#[test]
fn test_missing_service_keeps_control_channel() {
    let (device, session) = connect(VirtualDevice::new().without_file_service().with_property(
        None,
        "DeviceName",
        plist::Value::String("Ada's iPod".to_string()),
    ));

    assert!(!session.is_file_service_ready());
    assert!(matches!(session.connect_error(), Some(DeviceError::ServiceUnavailable { .. })));
    // The control channel still answers.
    assert_eq!(
        session.property("DeviceName", None),
        Some(PropertyValue::String("Ada's iPod".to_string()))
    );

    drop(session);
    assert_eq!(device.releases(), vec!["control", "transport"]);
}

#[test]
fn test_failing_client_creation() {
    let (device, session) = connect(VirtualDevice::new().failing_file_client());

    assert!(!session.is_file_service_ready());
    assert!(matches!(
        session.connect_error(),
        Some(DeviceError::ClientCreationFailed { .. })
    ));

    drop(session);
    assert_eq!(device.releases(), vec!["control", "transport"]);
}

#[test]
fn test_custom_service_name_is_used() {
    init_logger();
    let device = Arc::new(VirtualDevice::new());
    let config = SyncConfig {
        file_service_name: "com.apple.afc2".to_string(),
        ..SyncConfig::default()
    };
    let session = DeviceSession::connect(Arc::clone(&device), VIRTUAL_DEVICE_ID, &config);

    match session.connect_error() {
        Some(DeviceError::ServiceUnavailable { service, .. }) => assert_eq!(service, "com.apple.afc2"),
        other => panic!("unexpected connect result: {:?}", other),
    }
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn test_property_types_and_domains() {
    let (_device, session) = connect(
        VirtualDevice::new()
            .with_property(None, "DeviceName", plist::Value::String("iPhone".to_string()))
            .with_property(
                Some("com.apple.disk_usage"),
                "TotalDiskCapacity",
                plist::Value::Integer(64_000_000_000u64.into()),
            )
            .with_property(
                Some("com.apple.mobile.iTunes"),
                "SupportsAudio",
                plist::Value::Boolean(true),
            )
            .with_property(None, "Dict", plist::Value::Dictionary(plist::Dictionary::new())),
    );

    assert_eq!(
        session.property("DeviceName", None).as_ref().and_then(|v| v.as_str()),
        Some("iPhone")
    );
    assert_eq!(
        session
            .property("TotalDiskCapacity", Some("com.apple.disk_usage"))
            .and_then(|v| v.as_u64()),
        Some(64_000_000_000)
    );
    assert_eq!(
        session
            .property("SupportsAudio", Some("com.apple.mobile.iTunes"))
            .and_then(|v| v.as_bool()),
        Some(true)
    );
    // Same key, wrong domain.
    assert_eq!(session.property("TotalDiskCapacity", None), None);
    assert_eq!(session.property("Dict", None), None);
    assert_eq!(session.property("Missing", None), None);
}

#[test]
fn test_lost_session_is_not_released() {
    let (device, session) = connect(VirtualDevice::new().losing_session_on_property());

    assert_eq!(session.property("DeviceName", None), None);
    // A broken control channel takes the file service down with it.
    assert!(!session.is_file_service_ready());
    assert!(matches!(
        session.read_directory("/", DirFilter::empty()),
        Err(DeviceError::NotReady { .. })
    ));

    drop(session);
    assert_eq!(device.releases(), vec!["file_client", "transport"]);
}

// ============================================================================
// Directory listing
// ============================================================================

#[test]
fn test_read_directory_unfiltered_includes_dot_entries() {
    let (_device, session) = connect(sample_tree());

    let names = session.read_directory("/iTunes_Control/iTunes", DirFilter::empty()).unwrap();
    assert_eq!(names, vec![".", "..", ".hidden", "Artwork", "iTunesDB", "link"]);
}

#[test]
fn test_read_directory_name_filters() {
    let (_device, session) = connect(sample_tree());

    let names = session
        .read_directory("/iTunes_Control/iTunes", DirFilter::NO_DOT_AND_DOT_DOT)
        .unwrap();
    assert_eq!(names, vec![".hidden", "Artwork", "iTunesDB", "link"]);

    let names = session
        .read_directory("/iTunes_Control/iTunes", DirFilter::NO_HIDDEN)
        .unwrap();
    assert_eq!(names, vec!["Artwork", "iTunesDB", "link"]);
}

#[test]
fn test_read_directory_type_filters() {
    let (_device, session) = connect(sample_tree());
    let dir = "/iTunes_Control/iTunes";

    let files = session
        .read_directory(dir, DirFilter::FILES | DirFilter::NO_DOT_AND_DOT_DOT)
        .unwrap();
    assert_eq!(files, vec![".hidden", "iTunesDB"]);

    let dirs = session.read_directory(dir, DirFilter::DIRS).unwrap();
    assert_eq!(dirs, vec![".", "..", "Artwork"]);

    let links = session.read_directory(dir, DirFilter::SYMLINKS).unwrap();
    assert_eq!(links, vec!["link"]);

    let tree = session.read_directory(dir, DirFilter::TREE).unwrap();
    assert_eq!(tree, vec!["Artwork", "iTunesDB"]);
}

#[test]
fn test_read_directory_empty_and_failed_are_distinct() {
    let (_device, session) = connect(
        VirtualDevice::new()
            .with_directory("/empty")
            .with_directory("/broken")
            .failing_list("/broken"),
    );

    assert_eq!(session.read_directory("/empty", DirFilter::TREE).unwrap(), Vec::<String>::new());

    match session.read_directory("/broken", DirFilter::TREE) {
        Err(DeviceError::Protocol { operation, path, .. }) => {
            assert_eq!(operation, "read_directory");
            assert_eq!(path, "/broken");
        }
        other => panic!("expected a protocol error, got {:?}", other),
    }
    assert!(session.read_directory("/missing", DirFilter::empty()).is_err());
}

#[test]
fn test_file_operations_on_inert_session_are_not_ready() {
    let (_device, session) = connect(VirtualDevice::new().rejecting_handshake());

    assert!(matches!(
        session.read_directory("/", DirFilter::empty()),
        Err(DeviceError::NotReady { .. })
    ));
    assert!(matches!(session.make_directory("/a"), Err(DeviceError::NotReady { .. })));
    assert!(matches!(session.remove_path("/a"), Err(DeviceError::NotReady { .. })));
    assert!(matches!(
        session.open_file("/a", OpenMode::ReadOnly),
        Err(DeviceError::NotReady { .. })
    ));
    assert_eq!(session.file_info("/", "st_ifmt"), None);
    assert!(!session.exists("/"));
}

// ============================================================================
// File info and existence
// ============================================================================

#[test]
fn test_file_info_lookup() {
    let (_device, session) = connect(sample_tree());

    assert_eq!(
        session.file_info("/iTunes_Control/iTunes/iTunesDB", "st_size").as_deref(),
        Some("2")
    );
    assert_eq!(
        session.file_info("/iTunes_Control/iTunes/link", "LinkTarget").as_deref(),
        Some("/iTunes_Control/iTunes/iTunesDB")
    );
    assert_eq!(session.file_info("/iTunes_Control/iTunes/iTunesDB", "st_birthtime"), None);
    assert_eq!(session.file_info("/nope", "st_size"), None);
}

#[test]
fn test_entry_kinds() {
    let (_device, session) = connect(sample_tree());

    assert_eq!(session.entry_kind("/iTunes_Control/iTunes"), Some(EntryKind::Directory));
    assert_eq!(session.entry_kind("/iTunes_Control/iTunes/iTunesDB"), Some(EntryKind::File));
    assert_eq!(session.entry_kind("/iTunes_Control/iTunes/link"), Some(EntryKind::Symlink));
    assert_eq!(session.entry_kind("/iTunes_Control/iTunes/missing"), None);
}

#[test]
fn test_exists_round_trip() {
    let (device, session) = connect(VirtualDevice::new().with_directory("/iTunes_Control/Music/F00"));
    let path = "/iTunes_Control/Music/F00/libgpod123456.mp3";

    assert!(!session.exists(path));
    {
        let mut file = session.open_file(path, OpenMode::WriteTruncate).unwrap();
        file.write_all(b"ID3").unwrap();
        file.close().unwrap();
    }
    assert!(session.exists(path));
    assert_eq!(device.file_contents(path), Some(b"ID3".to_vec()));

    session.remove_path(path).unwrap();
    assert!(!session.exists(path));
}

#[test]
fn test_make_directory_creates_parents() {
    let (device, session) = connect(VirtualDevice::new());

    session.make_directory("/iTunes_Control/Music/F07").unwrap();
    assert!(device.is_directory("/iTunes_Control/Music"));
    assert!(session.exists("/iTunes_Control/Music/F07"));
    // Idempotent.
    session.make_directory("/iTunes_Control/Music/F07").unwrap();
}

#[test]
fn test_remove_non_empty_directory_fails() {
    let (_device, session) = connect(sample_tree());

    assert!(matches!(
        session.remove_path("/iTunes_Control/iTunes"),
        Err(DeviceError::Protocol {
            operation: "remove_path",
            ..
        })
    ));
}

// ============================================================================
// Remote file streams
// ============================================================================

#[test]
fn test_remote_file_read() {
    let (device, session) = connect(VirtualDevice::new().with_file("/a/b.bin", &[7u8; 3000]));

    let mut file = session.open_file("/a/b.bin", OpenMode::ReadOnly).unwrap();
    assert_eq!(file.path(), "/a/b.bin");
    assert_eq!(file.mode(), OpenMode::ReadOnly);
    let mut content = Vec::new();
    file.read_to_end(&mut content).unwrap();
    assert_eq!(content, vec![7u8; 3000]);
    assert_eq!(device.open_file_count(), 1);

    drop(file);
    assert_eq!(device.open_file_count(), 0);
}

#[test]
fn test_remote_file_open_errors() {
    let (_device, session) = connect(VirtualDevice::new().with_directory("/a"));

    assert!(session.open_file("/a/missing", OpenMode::ReadOnly).is_err());
    assert!(session.open_file("/a", OpenMode::ReadOnly).is_err());
    // No parent directory.
    assert!(session.open_file("/nope/x", OpenMode::WriteTruncate).is_err());
}

#[test]
fn test_remote_file_short_write_is_reported() {
    let (_device, session) = connect(VirtualDevice::new().with_directory("/a").short_writes("/a/x"));

    let mut file = session.open_file("/a/x", OpenMode::WriteTruncate).unwrap();
    assert_eq!(file.write(&[1, 2, 3, 4]).unwrap(), 2);
}

#[test]
fn test_remote_file_read_error_carries_protocol_error() {
    let (_device, session) = connect(VirtualDevice::new().with_file("/a", b"x").failing_read("/a"));

    let mut file = session.open_file("/a", OpenMode::ReadOnly).unwrap();
    let mut buf = [0u8; 4];
    let err = file.read(&mut buf).unwrap_err();
    let inner = err.get_ref().and_then(|e| e.downcast_ref::<DeviceError>());
    assert!(matches!(
        inner,
        Some(DeviceError::Protocol {
            operation: "file_read",
            ..
        })
    ));
}

#[test]
fn test_join_device_path() {
    assert_eq!(join_device_path("/", "iTunes_Control"), "/iTunes_Control");
    assert_eq!(join_device_path("/iTunes_Control", "iTunes"), "/iTunes_Control/iTunes");
    assert_eq!(join_device_path("/iTunes_Control/", "iTunes"), "/iTunes_Control/iTunes");
}

//! Error types for device session operations.

use super::backend::ProtocolError;

/// Error types for device session operations.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum DeviceError {
    /// The transport could not be opened (device unplugged or unknown UDID).
    DeviceNotFound { device_id: String, error: ProtocolError },
    /// lockdownd refused the pairing handshake.
    HandshakeRejected { device_id: String, error: ProtocolError },
    /// lockdownd could not start the file service.
    ServiceUnavailable {
        device_id: String,
        service: String,
        error: ProtocolError,
    },
    /// The file service client could not be created on the negotiated port.
    ClientCreationFailed { device_id: String, error: ProtocolError },
    /// A file operation was issued on a session without a file service.
    NotReady { device_id: String },
    /// A remote file operation failed.
    Protocol {
        device_id: String,
        operation: &'static str,
        path: String,
        error: ProtocolError,
    },
}

impl DeviceError {
    /// Returns true for failures while setting the session up. These end the whole transfer.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound { .. }
                | Self::HandshakeRejected { .. }
                | Self::ServiceUnavailable { .. }
                | Self::ClientCreationFailed { .. }
        )
    }

    /// The underlying protocol error, if there is one.
    pub fn protocol_error(&self) -> Option<&ProtocolError> {
        match self {
            Self::DeviceNotFound { error, .. }
            | Self::HandshakeRejected { error, .. }
            | Self::ServiceUnavailable { error, .. }
            | Self::ClientCreationFailed { error, .. }
            | Self::Protocol { error, .. } => Some(error),
            Self::NotReady { .. } => None,
        }
    }

    /// Returns a user-friendly message for this error.
    pub fn user_message(&self) -> String {
        match self {
            Self::DeviceNotFound { .. } => "Device not found. It may have been unplugged.".to_string(),
            Self::HandshakeRejected { .. } => {
                "The device refused the connection. Unlock it and tap \"Trust\", then try again.".to_string()
            }
            Self::ServiceUnavailable { .. } => {
                "The device's file service is not available. Try reconnecting the device.".to_string()
            }
            Self::ClientCreationFailed { .. } => {
                "Couldn't open the device's file service. Try reconnecting the device.".to_string()
            }
            Self::NotReady { .. } => "The device is not connected.".to_string(),
            Self::Protocol { path, .. } => format!("Copy failed: the device reported an error for {}.", path),
        }
    }
}

impl std::fmt::Display for DeviceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DeviceNotFound { device_id, error } => {
                write!(f, "Device unreachable: {device_id} ({error})")
            }
            Self::HandshakeRejected { device_id, error } => {
                write!(f, "Handshake rejected by {device_id} ({error})")
            }
            Self::ServiceUnavailable {
                device_id,
                service,
                error,
            } => {
                write!(f, "Service {service} unavailable on {device_id} ({error})")
            }
            Self::ClientCreationFailed { device_id, error } => {
                write!(f, "File service client creation failed for {device_id} ({error})")
            }
            Self::NotReady { device_id } => {
                write!(f, "File service not ready for {device_id}")
            }
            Self::Protocol {
                device_id,
                operation,
                path,
                error,
            } => {
                write!(f, "{operation} failed on {device_id} for {path} ({error})")
            }
        }
    }
}

impl std::error::Error for DeviceError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::backend::ProtocolLayer;

    fn afc(code: i32) -> ProtocolError {
        ProtocolError::new(ProtocolLayer::Afc, code)
    }

    #[test]
    fn test_device_error_display_carries_code() {
        let err = DeviceError::DeviceNotFound {
            device_id: "00008030-001".to_string(),
            error: ProtocolError::new(ProtocolLayer::Transport, -3),
        };
        assert_eq!(err.to_string(), "Device unreachable: 00008030-001 (idevice error: -3)");

        let err = DeviceError::Protocol {
            device_id: "00008030-001".to_string(),
            operation: "read_directory",
            path: "/iTunes_Control".to_string(),
            error: afc(8),
        };
        assert_eq!(
            err.to_string(),
            "read_directory failed on 00008030-001 for /iTunes_Control (afc error: 8)"
        );
    }

    #[test]
    fn test_is_connection_error() {
        assert!(
            DeviceError::HandshakeRejected {
                device_id: "d".to_string(),
                error: ProtocolError::new(ProtocolLayer::Lockdown, -17),
            }
            .is_connection_error()
        );
        assert!(
            !DeviceError::NotReady {
                device_id: "d".to_string()
            }
            .is_connection_error()
        );
        assert!(
            !DeviceError::Protocol {
                device_id: "d".to_string(),
                operation: "file_open",
                path: "/a".to_string(),
                error: afc(8),
            }
            .is_connection_error()
        );
    }

    #[test]
    fn test_protocol_error_accessor() {
        let err = DeviceError::ClientCreationFailed {
            device_id: "d".to_string(),
            error: afc(4),
        };
        assert_eq!(err.protocol_error().map(|e| e.code), Some(4));
        assert!(
            DeviceError::NotReady {
                device_id: "d".to_string()
            }
            .protocol_error()
            .is_none()
        );
    }

    #[test]
    fn test_user_messages_are_not_empty() {
        let errors = vec![
            DeviceError::DeviceNotFound {
                device_id: "d".to_string(),
                error: afc(1),
            },
            DeviceError::HandshakeRejected {
                device_id: "d".to_string(),
                error: afc(1),
            },
            DeviceError::ServiceUnavailable {
                device_id: "d".to_string(),
                service: "com.apple.afc".to_string(),
                error: afc(1),
            },
            DeviceError::ClientCreationFailed {
                device_id: "d".to_string(),
                error: afc(1),
            },
            DeviceError::NotReady {
                device_id: "d".to_string(),
            },
            DeviceError::Protocol {
                device_id: "d".to_string(),
                operation: "file_read",
                path: "/x".to_string(),
                error: afc(1),
            },
        ];
        for err in errors {
            assert!(!err.to_string().is_empty());
            assert!(!err.user_message().is_empty());
        }
    }

    #[test]
    fn test_device_error_serialization() {
        let err = DeviceError::NotReady {
            device_id: "abc".to_string(),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"type\":\"notReady\""), "JSON: {}", json);
        assert!(json.contains("\"device_id\":\"abc\""), "JSON: {}", json);
    }

    #[test]
    fn test_session_lost_shows_in_display() {
        let err = ProtocolError::new(ProtocolLayer::Lockdown, -4).with_session_lost();
        assert_eq!(err.to_string(), "lockdown error: -4 (session lost)");
    }
}

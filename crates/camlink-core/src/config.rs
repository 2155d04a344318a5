//! Session configuration
//!
//! One explicit value describing the port, device family, link parameters
//! and capture options. Stored as JSON.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

use crate::protocol::commands::MAX_MANUAL_FOCUS;
use crate::protocol::{
    BaudRate, CaptureSettings, FocusMode, ImageSize, PacketFailurePolicy, PacketSize,
    ProtocolError, DEFAULT_TIMEOUT_MS,
};

/// Which wire protocol the camera speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFamily {
    /// Checksummed frames with indexed packet upload
    #[default]
    Packet,
    /// Framebuffer streaming without checksums
    Framebuffer,
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Serial port name
    pub port_name: String,

    /// Wire protocol of the camera
    pub family: DeviceFamily,

    /// Baud rate the camera listens at when the session opens
    pub initial_baud: BaudRate,

    /// Baud rate to switch to for the transfer
    pub target_baud: BaudRate,

    /// Upload packet size (packet family)
    pub packet_size: PacketSize,

    /// Per-read timeout in milliseconds
    pub timeout_ms: u64,

    /// What to do with a packet that cannot be read
    pub failure_policy: PacketFailurePolicy,

    /// Re-requests of a timed-out packet before the failure policy applies
    pub upload_retries: u8,

    /// Verify checksums of incoming frames
    pub verify_checksums: bool,

    /// Focus mode used by the acquisition sequence
    pub focus_mode: FocusMode,

    /// Lens position for manual focus (0..=750)
    pub focus_value: u16,

    /// Capture parameters (packet family)
    pub capture: CaptureSettings,

    /// Picture size (framebuffer family)
    pub image_size: ImageSize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            family: DeviceFamily::Packet,
            initial_baud: BaudRate::B115200,
            target_baud: BaudRate::B230400,
            packet_size: PacketSize::P1024,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            failure_policy: PacketFailurePolicy::Skip,
            upload_retries: 0,
            verify_checksums: true,
            focus_mode: FocusMode::Auto,
            focus_value: 0,
            capture: CaptureSettings::default(),
            image_size: ImageSize::Small,
        }
    }
}

impl SessionConfig {
    /// Defaults for the framebuffer family (38400 baud power-up rate)
    pub fn framebuffer(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            family: DeviceFamily::Framebuffer,
            initial_baud: BaudRate::B38400,
            target_baud: BaudRate::B38400,
            timeout_ms: 5000,
            ..Self::default()
        }
    }

    /// Defaults for the packet family on `port_name`
    pub fn packet(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }

    /// Check values serde cannot: timeouts, focus range, family-specific limits
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.timeout_ms == 0 {
            return Err(ProtocolError::InvalidParameter(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.focus_mode == FocusMode::Manual && self.focus_value > MAX_MANUAL_FOCUS {
            return Err(ProtocolError::InvalidParameter(format!(
                "focus_value {} exceeds {}",
                self.focus_value, MAX_MANUAL_FOCUS
            )));
        }
        match self.family {
            DeviceFamily::Packet => self.capture.validate()?,
            DeviceFamily::Framebuffer => {
                crate::protocol::framebuffer::baud_divisor(self.target_baud)?;
            }
        }
        Ok(())
    }

    /// Load a configuration from a JSON file
    pub fn load(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Save the configuration as pretty JSON
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DEFAULT_BAUD_RATE;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.initial_baud.as_u32(), DEFAULT_BAUD_RATE);
        assert_eq!(config.packet_size.bytes(), 1024);
        assert!(config.verify_checksums);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_uses_plain_numbers() {
        let json = serde_json::to_value(SessionConfig::packet("/dev/ttyUSB0")).unwrap();
        assert_eq!(json["target_baud"], 230400);
        assert_eq!(json["packet_size"], 1024);
        assert_eq!(json["family"], "packet");
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"port_name": "COM3", "target_baud": 921600}"#).unwrap();
        assert_eq!(config.port_name, "COM3");
        assert_eq!(config.target_baud, BaudRate::B921600);
        assert_eq!(config.packet_size, PacketSize::P1024);
    }

    #[test]
    fn test_rejects_unsupported_values() {
        assert!(serde_json::from_str::<SessionConfig>(r#"{"target_baud": 14400}"#).is_err());
        assert!(serde_json::from_str::<SessionConfig>(r#"{"packet_size": 4096}"#).is_err());
    }

    #[test]
    fn test_framebuffer_rejects_fast_baud() {
        let mut config = SessionConfig::framebuffer("/dev/ttyUSB0");
        assert!(config.validate().is_ok());
        config.target_baud = BaudRate::B460800;
        assert!(matches!(
            config.validate(),
            Err(ProtocolError::UnsupportedBaudRate(460800))
        ));
    }
}

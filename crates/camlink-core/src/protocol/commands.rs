//! Protocol commands
//!
//! Defines the opcodes and parameter encodings of the packet protocol.

use serde::{Deserialize, Serialize};

use super::ProtocolError;

/// Opcodes of the checksummed packet protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opcode {
    /// Query firmware/configuration info
    GetVersion,

    /// Configure link baud rate and packet size
    Config,

    /// Capture a single picture
    TakePicture,

    /// Upload one packet of the captured picture
    Upload,

    /// Adjust lens focus
    Focus,
}

impl Opcode {
    /// Get the opcode byte sent on the wire
    pub fn byte(&self) -> u8 {
        match self {
            Opcode::GetVersion => 0x01,
            Opcode::Config => 0x03,
            Opcode::TakePicture => 0x05,
            Opcode::Upload => 0x07,
            Opcode::Focus => 0x09,
        }
    }

    /// Look up an opcode from its wire byte
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(Opcode::GetVersion),
            0x03 => Some(Opcode::Config),
            0x05 => Some(Opcode::TakePicture),
            0x07 => Some(Opcode::Upload),
            0x09 => Some(Opcode::Focus),
            _ => None,
        }
    }
}

/// Link speeds the camera can be configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum BaudRate {
    /// 9600 baud
    B9600,
    /// 19200 baud
    B19200,
    /// 38400 baud, framebuffer family power-up rate
    B38400,
    /// 57600 baud
    B57600,
    /// 115200 baud, packet family power-up rate
    B115200,
    /// 230400 baud
    B230400,
    /// 460800 baud
    B460800,
    /// 921600 baud
    B921600,
}

impl BaudRate {
    /// Every supported rate, slowest first
    pub const ALL: [BaudRate; 8] = [
        BaudRate::B9600,
        BaudRate::B19200,
        BaudRate::B38400,
        BaudRate::B57600,
        BaudRate::B115200,
        BaudRate::B230400,
        BaudRate::B460800,
        BaudRate::B921600,
    ];

    /// Physical bit rate
    pub fn as_u32(&self) -> u32 {
        match self {
            BaudRate::B9600 => 9600,
            BaudRate::B19200 => 19200,
            BaudRate::B38400 => 38400,
            BaudRate::B57600 => 57600,
            BaudRate::B115200 => 115200,
            BaudRate::B230400 => 230400,
            BaudRate::B460800 => 460800,
            BaudRate::B921600 => 921600,
        }
    }

    /// Device code used in the CONFIG command
    pub fn code(&self) -> u8 {
        match self {
            BaudRate::B9600 => 0x01,
            BaudRate::B19200 => 0x02,
            BaudRate::B38400 => 0x03,
            BaudRate::B57600 => 0x04,
            BaudRate::B115200 => 0x05,
            BaudRate::B230400 => 0x06,
            BaudRate::B460800 => 0x07,
            BaudRate::B921600 => 0x08,
        }
    }

    /// Reverse lookup from a device code
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.code() == code)
    }

    /// Look up a supported rate from its bit rate
    pub fn from_rate(rate: u32) -> Result<Self, ProtocolError> {
        Self::ALL
            .into_iter()
            .find(|b| b.as_u32() == rate)
            .ok_or(ProtocolError::UnsupportedBaudRate(rate))
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = ProtocolError;

    fn try_from(rate: u32) -> Result<Self, Self::Error> {
        Self::from_rate(rate)
    }
}

impl From<BaudRate> for u32 {
    fn from(baud: BaudRate) -> Self {
        baud.as_u32()
    }
}

impl std::fmt::Display for BaudRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

/// Upload packet sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum PacketSize {
    /// 256 bytes
    P256,
    /// 512 bytes, the power-up default
    P512,
    /// 1024 bytes
    P1024,
    /// 2048 bytes
    P2048,
}

impl PacketSize {
    /// Every supported size, smallest first
    pub const ALL: [PacketSize; 4] = [
        PacketSize::P256,
        PacketSize::P512,
        PacketSize::P1024,
        PacketSize::P2048,
    ];

    /// Payload bytes per packet
    pub fn bytes(&self) -> u32 {
        match self {
            PacketSize::P256 => 256,
            PacketSize::P512 => 512,
            PacketSize::P1024 => 1024,
            PacketSize::P2048 => 2048,
        }
    }

    /// Device code used in the CONFIG command
    pub fn code(&self) -> u8 {
        match self {
            PacketSize::P256 => 0x01,
            PacketSize::P512 => 0x02,
            PacketSize::P1024 => 0x03,
            PacketSize::P2048 => 0x04,
        }
    }

    /// Reverse lookup from a device code
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.code() == code)
    }

    /// Look up a supported size from its byte count
    pub fn from_bytes(size: u32) -> Result<Self, ProtocolError> {
        Self::ALL
            .into_iter()
            .find(|p| p.bytes() == size)
            .ok_or(ProtocolError::UnsupportedPacketSize(size))
    }
}

impl TryFrom<u32> for PacketSize {
    type Error = ProtocolError;

    fn try_from(size: u32) -> Result<Self, Self::Error> {
        Self::from_bytes(size)
    }
}

impl From<PacketSize> for u32 {
    fn from(size: PacketSize) -> Self {
        size.bytes()
    }
}

/// Focus command modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusMode {
    /// Run the autofocus routine
    Auto,
    /// Read back the current focus position
    Read,
    /// Drive the lens to an explicit position
    Manual,
}

/// Highest lens position accepted in manual focus mode
pub const MAX_MANUAL_FOCUS: u16 = 750;

impl FocusMode {
    /// Mode byte of the FOCUS command
    pub fn code(&self) -> u8 {
        match self {
            FocusMode::Auto => 0x01,
            FocusMode::Read => 0x02,
            FocusMode::Manual => 0x03,
        }
    }

    /// Build the FOCUS parameters. The lens position is only sent in manual mode.
    pub fn parameters(&self, manual_value: u16) -> Result<[u8; 6], ProtocolError> {
        let value = match self {
            FocusMode::Manual => {
                if manual_value > MAX_MANUAL_FOCUS {
                    return Err(ProtocolError::InvalidParameter(format!(
                        "manual focus value {} exceeds {}",
                        manual_value, MAX_MANUAL_FOCUS
                    )));
                }
                manual_value
            }
            FocusMode::Auto | FocusMode::Read => 0,
        };
        let [hi, lo] = value.to_be_bytes();
        Ok([self.code(), hi, lo, 0, 0, 0])
    }
}

/// Picture encodings the camera can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// Compressed JPEG
    Jpeg,
    /// 16-bit RGB565
    Rgb565,
    /// YUV 4:2:2
    Yuv422,
    /// 8-bit grayscale
    Grayscale,
}

impl ImageFormat {
    /// Format byte of the TAKEPIC command
    pub fn code(&self) -> u8 {
        match self {
            ImageFormat::Jpeg => 0x01,
            ImageFormat::Rgb565 => 0x02,
            ImageFormat::Yuv422 => 0x03,
            ImageFormat::Grayscale => 0x04,
        }
    }

    /// File extension used when persisting a capture
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Rgb565 => "rgb565",
            ImageFormat::Yuv422 => "yuv",
            ImageFormat::Grayscale => "gray",
        }
    }
}

/// Exposure range for manual levels (0 selects auto exposure)
pub const MANUAL_EXPOSURE_LEVELS: std::ops::RangeInclusive<u8> = 128..=143;

/// TAKEPIC command parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// Resolution code (device specific)
    pub resolution: u8,
    /// Capture black-and-white instead of color
    pub monochrome: bool,
    /// Precision level, 1 (high) to 4 (low)
    pub precision: u8,
    /// Output encoding
    pub format: ImageFormat,
    /// 0 for auto exposure, 128..=143 for manual levels
    pub exposure: u8,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            resolution: 0x03,
            monochrome: false,
            precision: 2,
            format: ImageFormat::Jpeg,
            exposure: 0,
        }
    }
}

impl CaptureSettings {
    /// Color/precision byte: high nibble selects black-and-white, low nibble the precision
    pub fn color_byte(&self) -> u8 {
        (u8::from(self.monochrome) << 4) | (self.precision & 0x0F)
    }

    /// Check the settings against the ranges the camera accepts
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if !(1..=4).contains(&self.precision) {
            return Err(ProtocolError::InvalidParameter(format!(
                "precision {} outside 1..=4",
                self.precision
            )));
        }
        if self.exposure != 0 && !MANUAL_EXPOSURE_LEVELS.contains(&self.exposure) {
            return Err(ProtocolError::InvalidParameter(format!(
                "exposure {} is neither auto (0) nor a manual level 128..=143",
                self.exposure
            )));
        }
        Ok(())
    }

    /// Build the TAKEPIC parameters
    pub fn parameters(&self) -> Result<[u8; 6], ProtocolError> {
        self.validate()?;
        Ok([
            self.resolution,
            self.color_byte(),
            self.format.code(),
            self.exposure,
            0,
            0,
        ])
    }
}

/// CONFIG parameters: baud code, device id, packet size code
pub fn config_parameters(baud: BaudRate, packet_size: PacketSize) -> [u8; 6] {
    [baud.code(), 0x00, packet_size.code(), 0, 0, 0]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_opcode_bytes() {
        assert_eq!(Opcode::GetVersion.byte(), 0x01);
        assert_eq!(Opcode::Upload.byte(), 0x07);
        assert_eq!(Opcode::from_byte(0x09), Some(Opcode::Focus));
        assert_eq!(Opcode::from_byte(0x02), None);
    }

    #[test]
    fn test_baud_table_round_trip() {
        let mut codes = HashSet::new();
        for baud in BaudRate::ALL {
            assert!(codes.insert(baud.code()), "duplicate code for {}", baud);
            assert_eq!(BaudRate::from_code(baud.code()), Some(baud));
            assert_eq!(BaudRate::from_rate(baud.as_u32()).unwrap(), baud);
        }
        assert_eq!(codes.len(), 8);
    }

    #[test]
    fn test_unsupported_baud() {
        assert!(matches!(
            BaudRate::from_rate(14400),
            Err(ProtocolError::UnsupportedBaudRate(14400))
        ));
        assert_eq!(BaudRate::from_code(0x09), None);
    }

    #[test]
    fn test_packet_size_table() {
        assert_eq!(PacketSize::from_bytes(1024).unwrap().code(), 0x03);
        assert_eq!(PacketSize::from_code(0x01), Some(PacketSize::P256));
        assert!(PacketSize::from_bytes(4096).is_err());
    }

    #[test]
    fn test_focus_parameters() {
        assert_eq!(
            FocusMode::Manual.parameters(750).unwrap(),
            [0x03, 0x02, 0xEE, 0, 0, 0]
        );
        // Non-manual modes ignore the value
        assert_eq!(FocusMode::Auto.parameters(500).unwrap(), [0x01, 0, 0, 0, 0, 0]);
        assert!(FocusMode::Manual.parameters(751).is_err());
    }

    #[test]
    fn test_capture_parameters() {
        let settings = CaptureSettings::default();
        assert_eq!(settings.parameters().unwrap(), [0x03, 0x02, 0x01, 0x00, 0, 0]);

        let mono = CaptureSettings {
            monochrome: true,
            precision: 4,
            exposure: 130,
            ..CaptureSettings::default()
        };
        assert_eq!(mono.color_byte(), 0x14);
        assert!(mono.parameters().is_ok());

        let bad = CaptureSettings {
            exposure: 12,
            ..CaptureSettings::default()
        };
        assert!(bad.parameters().is_err());
    }
}

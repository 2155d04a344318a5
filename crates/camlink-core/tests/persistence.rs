//! Image sink and session config persistence

use camlink_core::config::{DeviceFamily, SessionConfig};
use camlink_core::protocol::{
    BaudRate, FocusMode, ImageBuffer, ImageFormat, PacketFailurePolicy, PacketSize,
};
use camlink_core::sink::{default_image_name, FileSink, ImageSink, SinkError};
use pretty_assertions::assert_eq;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_file_sink_writes_bytes() {
    let dir = tempdir().unwrap();
    let data: Vec<u8> = (0..=255).cycle().take(3000).collect();
    let mut sink = FileSink::new(dir.path().join("captures"));

    let path = sink
        .persist(ImageBuffer::from_bytes(data.clone(), 3000), "photo.jpg")
        .unwrap();

    assert_eq!(path, dir.path().join("captures").join("photo.jpg"));
    assert_eq!(fs::read(&path).unwrap(), data);
}

#[test]
fn test_file_sink_keeps_partial_image() {
    let dir = tempdir().unwrap();
    let mut sink = FileSink::new(dir.path());

    let path = sink
        .persist(ImageBuffer::from_bytes(vec![0xFF, 0xD8, 0xFF], 3000), "partial.jpg")
        .unwrap();

    assert_eq!(fs::read(path).unwrap(), vec![0xFF, 0xD8, 0xFF]);
}

#[test]
fn test_file_sink_rejects_paths() {
    let dir = tempdir().unwrap();
    let mut sink = FileSink::new(dir.path());

    for target in ["", "../escape.jpg", "sub/photo.jpg"] {
        let result = sink.persist(ImageBuffer::default(), target);
        assert!(
            matches!(result, Err(SinkError::InvalidTarget(_))),
            "target {:?} should be rejected",
            target
        );
    }
}

#[test]
fn test_file_sink_surfaces_write_failure() {
    let dir = tempdir().unwrap();
    // A regular file where the output directory should be
    let blocker = dir.path().join("not-a-dir");
    fs::write(&blocker, b"x").unwrap();
    let mut sink = FileSink::new(&blocker);

    let result = sink.persist(ImageBuffer::from_bytes(vec![1, 2, 3], 3), "photo.jpg");

    assert!(matches!(result, Err(SinkError::Write { .. })));
}

#[test]
fn test_default_image_name_shape() {
    let name = default_image_name("jpg");
    assert!(name.starts_with("photo_"));
    assert!(name.ends_with(".jpg"));
    // photo_YYYYMMDD_HHMMSS.jpg
    assert_eq!(name.len(), "photo_20240101_120000.jpg".len());
}

#[test]
fn test_config_survives_save_and_load() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("session.json");

    let mut config = SessionConfig::packet("/dev/ttyUSB1");
    config.target_baud = BaudRate::B921600;
    config.packet_size = PacketSize::P2048;
    config.failure_policy = PacketFailurePolicy::Abort;
    config.upload_retries = 2;
    config.focus_mode = FocusMode::Manual;
    config.focus_value = 500;
    config.capture.format = ImageFormat::Grayscale;
    config.save(&path).unwrap();

    let loaded = SessionConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_config_json_uses_plain_numbers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("session.json");
    SessionConfig::framebuffer("COM3").save(&path).unwrap();

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["target_baud"], 38400);
    assert_eq!(json["family"], "framebuffer");
}

#[test]
fn test_partial_config_fills_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("session.json");
    fs::write(&path, r#"{ "port_name": "/dev/ttyACM0", "packet_size": 256 }"#).unwrap();

    let config = SessionConfig::load(&path).unwrap();
    assert_eq!(config.port_name, "/dev/ttyACM0");
    assert_eq!(config.packet_size, PacketSize::P256);
    assert_eq!(config.family, DeviceFamily::Packet);
    assert_eq!(config.initial_baud, BaudRate::B115200);
}

#[test]
fn test_config_rejects_unknown_baud() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("session.json");
    fs::write(&path, r#"{ "target_baud": 12345 }"#).unwrap();

    let err = SessionConfig::load(&path).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}

//! Chunked upload tests against a scripted transport

mod common;

use camlink_core::protocol::frame;
use camlink_core::protocol::transfer::upload_parameters;
use camlink_core::protocol::{
    BaudRate, ChunkedTransfer, PacketFailurePolicy, PacketSize, ProtocolError,
};
use common::{filled, packet_reply, Event, MockTransport, Scripted};
use pretty_assertions::assert_eq;

fn upload_request(index: u16, count: u16) -> Vec<u8> {
    frame::encode(0x07, &upload_parameters(index, count)).unwrap()
}

#[test]
fn test_three_packets_assemble_in_order() {
    let mut transport = MockTransport::with_script(
        BaudRate::B115200,
        [
            packet_reply(1, 3, &filled(0x11, 1024)),
            packet_reply(2, 3, &filled(0x22, 1024)),
            packet_reply(3, 3, &filled(0x33, 952)),
        ],
    );

    let outcome = ChunkedTransfer::new(&mut transport)
        .upload(3000, 3, PacketSize::P1024)
        .unwrap();

    assert!(outcome.is_complete());
    let mut expected = filled(0x11, 1024);
    expected.extend(filled(0x22, 1024));
    expected.extend(filled(0x33, 952));
    assert_eq!(outcome.buffer.as_bytes(), expected.as_slice());

    assert_eq!(
        transport.writes(),
        vec![
            upload_request(1, 3).as_slice(),
            upload_request(2, 3).as_slice(),
            upload_request(3, 3).as_slice(),
        ]
    );
}

#[test]
fn test_last_packet_carries_remainder() {
    let mut transport = MockTransport::with_script(
        BaudRate::B115200,
        [
            packet_reply(1, 3, &filled(1, 1024)),
            packet_reply(2, 3, &filled(2, 1024)),
            packet_reply(3, 3, &filled(3, 452)),
        ],
    );

    let outcome = ChunkedTransfer::new(&mut transport)
        .upload(2500, 3, PacketSize::P1024)
        .unwrap();

    assert_eq!(outcome.buffer.len(), 2500);
    assert!(transport.events.contains(&Event::Read(13 + 452)));
}

#[test]
fn test_exact_multiple_keeps_last_packet_full() {
    let mut transport = MockTransport::with_script(
        BaudRate::B115200,
        [
            packet_reply(1, 2, &filled(1, 1024)),
            packet_reply(2, 2, &filled(2, 1024)),
        ],
    );

    let outcome = ChunkedTransfer::new(&mut transport)
        .upload(2048, 2, PacketSize::P1024)
        .unwrap();

    assert!(outcome.is_complete());
    let reads: Vec<&Event> = transport
        .events
        .iter()
        .filter(|e| matches!(e, Event::Read(_)))
        .collect();
    assert_eq!(reads, vec![&Event::Read(13 + 1024), &Event::Read(13 + 1024)]);
}

#[test]
fn test_timed_out_packet_is_skipped() {
    let mut transport = MockTransport::with_script(
        BaudRate::B115200,
        [
            packet_reply(1, 3, &filled(0x11, 1024)),
            Scripted::Silence,
            packet_reply(3, 3, &filled(0x33, 952)),
        ],
    );

    let outcome = ChunkedTransfer::new(&mut transport)
        .upload(3000, 3, PacketSize::P1024)
        .unwrap();

    // Packets 1 and 3 stay contiguous; nothing is zero-filled for packet 2
    let mut expected = filled(0x11, 1024);
    expected.extend(filled(0x33, 952));
    assert_eq!(outcome.buffer.as_bytes(), expected.as_slice());

    let warning = outcome.incomplete.expect("short image must be flagged");
    assert_eq!(warning.expected, 3000);
    assert_eq!(warning.received, 1976);
    assert_eq!(warning.skipped, vec![2]);
}

#[test]
fn test_partial_packet_is_skipped_without_shifting_the_next() {
    let mut partial = frame::encode_packet_reply(&[0, 0, 2, 0, 3, 0], &filled(0x22, 1024));
    partial.truncate(600);
    let mut transport = MockTransport::with_script(
        BaudRate::B115200,
        [
            packet_reply(1, 3, &filled(0x11, 1024)),
            Scripted::Reply(partial),
            packet_reply(3, 3, &filled(0x33, 952)),
        ],
    );

    let outcome = ChunkedTransfer::new(&mut transport)
        .upload(3000, 3, PacketSize::P1024)
        .unwrap();

    assert_eq!(outcome.buffer.len(), 1976);
    assert_eq!(&outcome.buffer.as_bytes()[1024..], filled(0x33, 952).as_slice());
}

#[test]
fn test_abort_policy_returns_error() {
    let mut transport = MockTransport::with_script(
        BaudRate::B115200,
        [
            packet_reply(1, 3, &filled(0x11, 1024)),
            Scripted::Silence,
            packet_reply(3, 3, &filled(0x33, 952)),
        ],
    );

    let result = ChunkedTransfer::new(&mut transport)
        .policy(PacketFailurePolicy::Abort)
        .upload(3000, 3, PacketSize::P1024);

    assert!(matches!(result, Err(ProtocolError::Timeout { .. })));
    // Packet 3 is never requested
    assert_eq!(transport.writes().len(), 2);
}

#[test]
fn test_retry_recovers_timed_out_packet() {
    let mut transport = MockTransport::with_script(
        BaudRate::B115200,
        [
            packet_reply(1, 3, &filled(0x11, 1024)),
            Scripted::Silence,
            packet_reply(2, 3, &filled(0x22, 1024)),
            packet_reply(3, 3, &filled(0x33, 952)),
        ],
    );

    let outcome = ChunkedTransfer::new(&mut transport)
        .retries(1)
        .upload(3000, 3, PacketSize::P1024)
        .unwrap();

    assert!(outcome.is_complete());
    let writes = transport.writes();
    assert_eq!(writes.len(), 4);
    assert_eq!(writes[1], writes[2]);
    assert_eq!(writes[2], upload_request(2, 3).as_slice());
}

#[test]
fn test_corrupt_checksum_is_skipped() {
    let mut corrupt = frame::encode_packet_reply(&[0, 0, 1, 0, 1, 0], &filled(0x55, 100));
    let checksum_at = corrupt.len() - 2;
    corrupt[checksum_at] = corrupt[checksum_at].wrapping_add(1);
    let mut transport = MockTransport::with_script(BaudRate::B115200, [Scripted::Reply(corrupt)]);

    let outcome = ChunkedTransfer::new(&mut transport)
        .upload(100, 1, PacketSize::P256)
        .unwrap();

    assert!(outcome.buffer.is_empty());
    assert_eq!(outcome.incomplete.unwrap().skipped, vec![1]);
}

#[test]
fn test_corrupt_checksum_accepted_without_verification() {
    let mut corrupt = frame::encode_packet_reply(&[0, 0, 1, 0, 1, 0], &filled(0x55, 100));
    let checksum_at = corrupt.len() - 2;
    corrupt[checksum_at] = corrupt[checksum_at].wrapping_add(1);
    let mut transport = MockTransport::with_script(BaudRate::B115200, [Scripted::Reply(corrupt)]);

    let outcome = ChunkedTransfer::new(&mut transport)
        .verify_checksum(false)
        .upload(100, 1, PacketSize::P256)
        .unwrap();

    assert!(outcome.is_complete());
    assert_eq!(outcome.buffer.as_bytes(), filled(0x55, 100).as_slice());
}

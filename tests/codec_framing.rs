use regbridge_lib::serial::mock::MockPorts;
use regbridge_lib::serial::protocol::{
    build_read_command, build_write_command, parse_framed_response, parse_read_payload, split_payload,
};
use regbridge_lib::serial::{LinkSettings, PortIo, PortProvider, RegisterAddress, RegisterValue, SerialError};

#[test]
fn test_single_segment_reply_value() {
    let payload = parse_read_payload(b"VAL:FFB25233\r\nOK\r\n", 1, 4).unwrap();
    assert_eq!(split_payload(&payload, 4), vec!["0xFFB25233".to_string()]);
}

#[test]
fn test_single_segment_length_matches_size() {
    for size in 1u8..=8 {
        let digits: String = (0..size).map(|i| format!("{:02X}", i * 17)).collect();
        let raw = format!("VAL:{}\r\nOK\r\n", digits);
        let payload = parse_framed_response(raw.as_bytes()).unwrap();
        assert_eq!(payload.len(), usize::from(size) * 2, "size {}", size);
        assert!(parse_read_payload(raw.as_bytes(), 1, size).is_ok());
    }
}

#[test]
fn test_multi_segment_concatenated_in_order() {
    let raw = b"read 0x20000000 8\r\n0x20000000:11223344\r\n0x20000004:55667788\r\nOK\r\n";
    let payload = parse_read_payload(raw, 2, 4).unwrap();
    assert_eq!(
        split_payload(&payload, 4),
        vec!["0x11223344".to_string(), "0x55667788".to_string()]
    );
}

#[test]
fn test_short_payload_is_truncated_not_padded() {
    let err = parse_read_payload(b"VAL:FFB2\r\nOK\r\n", 1, 4).unwrap_err();
    match err {
        SerialError::TruncatedResponse { expected, actual } => {
            assert_eq!(expected, 8);
            assert_eq!(actual, 4);
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_missing_markers_are_malformed() {
    assert!(matches!(
        parse_framed_response(b"FFB25233\r\nOK\r\n"),
        Err(SerialError::MalformedResponse(_))
    ));
    assert!(matches!(
        parse_framed_response(b"VAL:FFB25233\r\n"),
        Err(SerialError::MalformedResponse(_))
    ));
    assert!(matches!(
        parse_framed_response(b"VAL:FFXX5233\r\nOK\r\n"),
        Err(SerialError::MalformedResponse(_))
    ));
}

#[test]
fn test_commands_render_canonical_address() {
    let address: RegisterAddress = "0x2047c04".parse().unwrap();
    assert_eq!(build_read_command(address, 4), "read 0x02047C04 4\r\n");
    let value: RegisterValue = "0xdeadbeef".parse().unwrap();
    assert_eq!(
        build_write_command(address, &value),
        "write 0x02047C04 0xDEADBEEF\r\n"
    );
}

#[test]
fn test_address_ordering_is_numeric() {
    let low: RegisterAddress = "0x9".parse().unwrap();
    let high: RegisterAddress = "0x10".parse().unwrap();
    assert!(low < high);
    assert_eq!(
        "0x0010".parse::<RegisterAddress>().unwrap(),
        "0x10".parse::<RegisterAddress>().unwrap()
    );
}

#[tokio::test]
async fn test_device_echo_reproduces_written_value() {
    let ports = MockPorts::new(&["/dev/ttyUSB0"]);
    let address = RegisterAddress(0x2000_0010);
    let value: RegisterValue = "0xCAFEF00D".parse().unwrap();

    let mut port = ports.open(&LinkSettings::new("/dev/ttyUSB0", 115200)).unwrap();
    port.send_data(build_write_command(address, &value).as_bytes())
        .await
        .unwrap();
    port.discard_input().await.unwrap();

    port.send_data(build_read_command(address, 4).as_bytes())
        .await
        .unwrap();
    // Replies arrive in small chunks; drain until the device has nothing left.
    let mut reply = Vec::new();
    loop {
        let chunk = port.read_data(64).await.unwrap();
        if chunk.is_empty() {
            break;
        }
        reply.extend(chunk);
    }

    let payload = parse_read_payload(&reply, 1, 4).unwrap();
    assert_eq!(split_payload(&payload, 4), vec![value.to_string()]);
}

#[test]
fn test_unknown_port_does_not_open() {
    let ports = MockPorts::new(&["/dev/ttyUSB0"]);
    assert!(matches!(
        ports.open(&LinkSettings::new("/dev/ttyUSB9", 115200)),
        Err(SerialError::DeviceError(_))
    ));
}

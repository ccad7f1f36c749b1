use proptest::prelude::*;
use simbus::frame::can::CAN_HEADER_SIZE;
use simbus::frame::{FlexrayChannel, FlexrayHeaderFlags, FormatError, LinChecksumModel, WireFrame};
use simbus::*;

fn direction() -> impl Strategy<Value = Direction> {
    prop_oneof![Just(Direction::Tx), Just(Direction::Rx)]
}

fn timestamp() -> impl Strategy<Value = SimTime> {
    (0.0f64..4.0e9).prop_map(SimTime::from_secs_f64)
}

proptest! {
    #[test]
    fn can_frames_survive_the_wire(
        id in any::<u32>(),
        flags in any::<u32>(),
        sdt in any::<u8>(),
        vcid in any::<u8>(),
        af in any::<u32>(),
        payload in prop::collection::vec(any::<u8>(), 0..=64),
        dir in direction(),
        ts in timestamp(),
    ) {
        let mut frame = CanFrame::new(id, &payload).unwrap()
            .with_flags(CanFrameFlags(flags))
            .with_xl_fields(sdt, vcid, af);
        frame.stamp(dir, ts);
        let decoded = CanFrame::decode(&frame.encode()).unwrap();
        prop_assert_eq!(decoded, frame);
    }

    #[test]
    fn lin_frames_survive_the_wire(
        id in 0u8..=0x3F,
        data in prop::collection::vec(any::<u8>(), 0..=8),
        dir in direction(),
        ts in timestamp(),
    ) {
        let mut frame = LinFrame::new(id, LinChecksumModel::Enhanced, &data).unwrap();
        frame.stamp(dir, ts);
        prop_assert_eq!(LinFrame::decode(&frame.encode()).unwrap(), frame);
    }
}

#[test]
fn test_can_dlc_mismatch_rejected() {
    let frame = CanFrame::new(0x123, &[1, 2, 3, 4]).unwrap();
    let mut bytes = frame.encode().into_bytes();
    bytes[CAN_HEADER_SIZE - 2] = 5;
    let wire = WireFrame::new(BusKind::Can, bytes);
    assert_eq!(
        CanFrame::decode(&wire),
        Err(FormatError::LengthMismatch { declared: 5, actual: 4 })
    );
}

#[test]
fn test_can_truncated_header_rejected() {
    let bytes = CanFrame::new(0x1, &[]).unwrap().encode().into_bytes();
    let wire = WireFrame::new(BusKind::Can, bytes[..10].to_vec());
    assert!(matches!(CanFrame::decode(&wire), Err(FormatError::Truncated { .. })));
}

#[test]
fn test_can_oversized_payload_rejected_on_decode() {
    let mut bytes = CanFrame::new(0x1, &[]).unwrap().encode().into_bytes();
    bytes.truncate(CAN_HEADER_SIZE - 2);
    bytes.extend_from_slice(&65u16.to_le_bytes());
    bytes.extend_from_slice(&[0; 65]);
    let wire = WireFrame::new(BusKind::Can, bytes);
    assert_eq!(
        CanFrame::decode(&wire),
        Err(FormatError::PayloadTooLarge { len: 65, max: 64 })
    );
}

#[test]
fn test_unknown_flag_bits_preserved() {
    let flags = CanFrameFlags(CanFrameFlags::FDF.bits() | (1 << 31) | (1 << 2));
    let frame = CanFrame::new(0x10, &[0xAA]).unwrap().with_flags(flags);
    let decoded = CanFrame::decode(&frame.encode()).unwrap();
    assert_eq!(decoded.flags.bits(), flags.bits());
    assert!(decoded.is_fd());
}

#[test]
fn test_wrong_bus_kind_rejected() {
    let wire = CanFrame::new(0x10, &[1]).unwrap().encode();
    assert!(matches!(
        LinFrame::decode(&wire),
        Err(FormatError::KindMismatch { expected: BusKind::Lin, actual: BusKind::Can })
    ));
}

#[test]
fn test_can_validation_rules() {
    let classic = CanFrame::new(0x7FF, &[0; 8]).unwrap();
    assert!(classic.validate().is_ok());

    let too_long = CanFrame::new(0x10, &[0; 12]).unwrap();
    assert!(too_long.validate().is_err());
    assert!(too_long.clone().with_flags(CanFrameFlags::FDF).validate().is_ok());

    let brs_without_fd = CanFrame::new(0x10, &[]).unwrap().with_flags(CanFrameFlags::BRS);
    assert!(brs_without_fd.validate().is_err());

    let xl_fields = CanFrame::new(0x10, &[]).unwrap().with_xl_fields(1, 2, 3);
    assert!(xl_fields.validate().is_err());
    assert!(xl_fields.with_flags(CanFrameFlags::XLF).validate().is_ok());

    let extended = CanFrame::new(0x1234_5678, &[]).unwrap();
    assert!(extended.validate().is_err());
    assert!(extended.with_flags(CanFrameFlags::IDE).validate().is_ok());
}

#[test]
fn test_ethernet_round_trip_keeps_timestamp() {
    let mut frame = EthernetFrame::new([0xFF; 6], [0x02, 0, 0, 0, 0, 0x01], 0x0800, b"hello").unwrap();
    frame.stamp(Direction::Rx, SimTime::from_secs_f64(1_700_000_000.125));
    let decoded = EthernetFrame::decode(&frame.encode()).unwrap();
    assert_eq!(decoded, frame);
    assert_eq!(decoded.bus_id(), 0x0800);
}

#[test]
fn test_flexray_round_trip_and_flags() {
    let frame = FlexrayFrame::new(FlexrayChannel::AB, 42, 7, &[1, 2, 3, 4])
        .unwrap()
        .with_header_flags(FlexrayHeaderFlags::SYNC | FlexrayHeaderFlags::STARTUP)
        .with_header_crc(0x155);
    let decoded = FlexrayFrame::decode(&frame.encode()).unwrap();
    assert_eq!(decoded, frame);
    assert!(decoded.header.flags.contains(FlexrayHeaderFlags::SYNC));
    assert_eq!(decoded.bus_id(), 42);
}

#[test]
fn test_can_display_format() {
    let mut frame = CanFrame::new(0x700, &[1, 2, 3]).unwrap();
    frame.stamp(Direction::Tx, SimTime::from_secs_f64(0.5));
    assert_eq!(frame.to_string(), "01/01/1970 00:00:00.500000 0x700: [1, 2, 3]");
}

mod common;

use common::{fast_config, within, Harness, TIMEOUT};
use simbus::frame::{FlexrayChannel, LinChecksumModel};
use simbus::transport::in_process::IN_PROCESS_VERSION;
use simbus::*;
use std::time::Duration;

#[test]
fn test_can_exchange_between_participants() {
    let harness = Harness::new();
    let mut sender = harness.session.create_participant(Some("Test1")).unwrap();
    sender.add_can_controller(Some("Test1_CAN"), None).unwrap();
    let mut receiver = harness.session.create_participant(Some("Test2")).unwrap();
    receiver.add_can_controller(Some("Test2_CAN"), None).unwrap();

    let tx = sender.can("Test1_CAN").unwrap();
    let rx = receiver.can("Test2_CAN").unwrap();
    tx.start().unwrap();
    rx.start().unwrap();
    rx.wait_for_state(ControllerState::Started, TIMEOUT).unwrap();
    tx.wait_for_state(ControllerState::Started, TIMEOUT).unwrap();

    let frame = CanFrame::new(0x700, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
    let before = tx.timestamp();
    let sent = tx.send(&frame).unwrap();
    assert_eq!(sent.bus_id, 0x700);
    let ack = tx.wait_for_ack(&sent, TIMEOUT).unwrap();
    let received = rx.recv_timeout(TIMEOUT).unwrap();
    let after = rx.timestamp();

    assert_eq!(ack.id, 0x700);
    assert_eq!(received.id, 0x700);
    assert_eq!(received.payload.as_slice(), &[1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(received.dlc(), 8);
    assert_eq!(received.direction, Direction::Rx);
    assert!(within(received.timestamp, before, after));

    assert_eq!(rx.stats().received, 1);
    assert_eq!(
        harness.registry.network_members(BusKind::Can, "VIRTUAL"),
        vec!["Test1/Test1_CAN".to_string(), "Test2/Test2_CAN".to_string()]
    );
}

#[test]
fn test_demo_sequence_round_trips() {
    let harness = Harness::new();
    let sender = harness.can_participant("Test1");
    let receiver = harness.can_participant("Test2");
    let tx = sender.can(0).unwrap();
    let rx = receiver.can(0).unwrap();

    for (id, last) in [(0x700, 8), (0x701, 9), (0x702, 10), (0x703, 11)] {
        let frame = CanFrame::new(id, &[1, 2, 3, 4, 5, 6, 7, last]).unwrap();
        let sent = tx.send(&frame).unwrap();
        tx.wait_for_ack(&sent, TIMEOUT).unwrap();
        let received = rx.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(received.id, id);
        assert_eq!(received.payload[7], last);
    }

    tx.sleep().unwrap();
    tx.reset().unwrap();
    tx.stop().unwrap();
    tx.wait_for_state(ControllerState::Stopped, TIMEOUT).unwrap();
    let stats = tx.stats();
    assert_eq!(stats.transmitted, 4);
    assert_eq!(stats.failed, 0);
}

#[test]
fn test_ethernet_exchange() {
    let harness = Harness::new();
    let mut a = harness.session.create_participant(Some("A")).unwrap();
    let mut b = harness.session.create_participant(Some("B")).unwrap();
    a.add_ethernet_controller(None, Some("ETH0")).unwrap().start().unwrap();
    b.add_ethernet_controller(None, Some("ETH0")).unwrap().start().unwrap();
    let tx = a.ethernet(0).unwrap();
    let rx = b.ethernet(0).unwrap();
    rx.wait_for_state(ControllerState::Started, TIMEOUT).unwrap();
    tx.wait_for_state(ControllerState::Started, TIMEOUT).unwrap();

    let frame = EthernetFrame::new([0xFF; 6], [0x02, 0, 0, 0, 0, 0x0A], 0x0800, b"datagram").unwrap();
    let sent = tx.send(&frame).unwrap();
    tx.wait_for_ack(&sent, TIMEOUT).unwrap();
    let received = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(received.destination, [0xFF; 6]);
    assert_eq!(received.ether_type, 0x0800);
    assert_eq!(received.payload, b"datagram".to_vec());
}

#[test]
fn test_lin_and_flexray_exchange() {
    let harness = Harness::new();
    let mut a = harness.session.create_participant(Some("A")).unwrap();
    let mut b = harness.session.create_participant(Some("B")).unwrap();
    a.add_lin_controller(None, Some("LIN1")).unwrap().start().unwrap();
    b.add_lin_controller(None, Some("LIN1")).unwrap().start().unwrap();
    a.add_flexray_controller(None, Some("FR1")).unwrap().start().unwrap();
    b.add_flexray_controller(None, Some("FR1")).unwrap().start().unwrap();
    b.lin(0).unwrap().wait_for_state(ControllerState::Started, TIMEOUT).unwrap();
    b.flexray(0).unwrap().wait_for_state(ControllerState::Started, TIMEOUT).unwrap();
    a.lin(0).unwrap().wait_for_state(ControllerState::Started, TIMEOUT).unwrap();
    a.flexray(0).unwrap().wait_for_state(ControllerState::Started, TIMEOUT).unwrap();

    let lin = LinFrame::new(0x3C, LinChecksumModel::Classic, &[0xAA, 0x55]).unwrap();
    let sent = a.lin(0).unwrap().send(&lin).unwrap();
    a.lin(0).unwrap().wait_for_ack(&sent, TIMEOUT).unwrap();
    let received = b.lin(0).unwrap().recv_timeout(TIMEOUT).unwrap();
    assert_eq!(received.id, 0x3C);
    assert_eq!(received.checksum_model, LinChecksumModel::Classic);
    assert_eq!(received.data.as_slice(), &[0xAA, 0x55]);

    let fr = FlexrayFrame::new(FlexrayChannel::A, 12, 3, &[1, 2, 3, 4]).unwrap();
    let sent = a.flexray(0).unwrap().send(&fr).unwrap();
    a.flexray(0).unwrap().wait_for_ack(&sent, TIMEOUT).unwrap();
    let received = b.flexray(0).unwrap().recv_timeout(TIMEOUT).unwrap();
    assert_eq!(received.header.frame_id, 12);
    assert_eq!(received.header.cycle_count, 3);
    assert_eq!(received.payload.as_slice(), &[1, 2, 3, 4]);

    // LIN traffic never reaches the FlexRay queue and vice versa.
    assert!(b.lin(0).unwrap().recv().unwrap_err().is_queue_empty());
    assert!(b.flexray(0).unwrap().recv().unwrap_err().is_queue_empty());
}

#[test]
fn test_networks_are_isolated() {
    let harness = Harness::new();
    let mut a = harness.session.create_participant(Some("A")).unwrap();
    let mut b = harness.session.create_participant(Some("B")).unwrap();
    a.add_can_controller(Some("Body"), Some("CAN_BODY")).unwrap().start().unwrap();
    b.add_can_controller(Some("Body"), Some("CAN_BODY")).unwrap().start().unwrap();
    b.add_can_controller(Some("Chassis"), Some("CAN_CHASSIS")).unwrap().start().unwrap();
    for name in ["Body", "Chassis"] {
        b.can(name).unwrap().wait_for_state(ControllerState::Started, TIMEOUT).unwrap();
    }
    a.can("Body").unwrap().wait_for_state(ControllerState::Started, TIMEOUT).unwrap();

    let tx = a.can("Body").unwrap();
    let sent = tx.send(&CanFrame::new(0x100, &[1]).unwrap()).unwrap();
    tx.wait_for_ack(&sent, TIMEOUT).unwrap();

    assert_eq!(b.can("Body").unwrap().recv_timeout(TIMEOUT).unwrap().id, 0x100);
    assert!(b.can("Chassis").unwrap().recv_timeout(Duration::from_millis(50)).is_err());
}

#[test]
fn test_own_frames_are_not_echoed_as_received() {
    let harness = Harness::new();
    let participant = harness.can_participant("Solo");
    let can = participant.can(0).unwrap();

    let sent = can.send(&CanFrame::new(0x1, &[]).unwrap()).unwrap();
    let entry = loop {
        if let Some(entry) = can.recv_entry() {
            break entry;
        }
        std::thread::sleep(Duration::from_millis(5));
    };
    assert_eq!(entry.token, Some(sent.token));
    assert_eq!(entry.frame.direction, Direction::Tx);
    assert!(can.recv_entry().is_none());
    assert_eq!(can.stats().received, 0);
}

#[test]
fn test_transport_version_reported() {
    let harness = Harness::without_master(fast_config());
    assert_eq!(harness.session.version(), IN_PROCESS_VERSION);
    assert_eq!(harness.session.version().to_string(), "0.1.0;1");
}

#[test]
fn test_config_file_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("simbus.json");
    std::fs::write(
        &path,
        r#"{
            "registry_uri": "silkit://localhost:9100",
            "controller": { "network": "CAN1", "ack_correlation": "BusId" },
            "time_sync": { "beacon_interval_ms": 250 }
        }"#,
    )
    .unwrap();

    let config = SimbusConfig::from_file(&path).unwrap();
    assert_eq!(config.registry_uri, RegistryUri::localhost(9100));
    assert_eq!(config.controller.network, "CAN1");
    assert_eq!(config.controller.ack_correlation, AckCorrelation::BusId);
    assert_eq!(config.controller.rx_queue_capacity, 2000);
    assert_eq!(config.time_sync.beacon_interval(), Duration::from_millis(250));
    assert_eq!(config.time_sync.sync_timeout(), Duration::from_secs(5));
    assert!(config.federation.launch_processes);
    assert_eq!(config.federation.log_level, LogLevel::Trace);

    let reparsed = SimbusConfig::from_json_str(&config.to_json_pretty().unwrap()).unwrap();
    assert_eq!(reparsed, config);
}

#[test]
fn test_invalid_config_rejected() {
    assert!(matches!(SimbusConfig::from_json_str("{ not json"), Err(Error::Config(_))));
    assert!(matches!(
        SimbusConfig::from_json_str(r#"{ "registry_uri": "localhost" }"#),
        Err(Error::Config(_))
    ));
    assert!(matches!(
        SimbusConfig::from_json_str(r#"{ "controller": { "rx_queue_capacity": 0 } }"#),
        Err(Error::Config(_))
    ));
}

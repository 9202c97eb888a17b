mod common;

use common::{connected_session, simulated_adapter, METER_ADDR};
use routeb_core::{
    ConnectionState, EchonetObject, Error, PacketRequest, PropertyValue, ServiceCode, Session, SessionEvent,
    SimulatorConfig,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn exchange_returns_matching_reply() {
    let (session, sim) = connected_session(SimulatorConfig::default()).await;

    let reply = session.exchange(&PacketRequest::get(&[0xE7]).with_tid(0x1234)).await.unwrap();
    assert_eq!(reply.tid, 0x1234);
    assert_eq!(reply.esv, ServiceCode::GetRes);
    assert_eq!(reply.seoj, EchonetObject::SMART_METER);
    assert_eq!(reply.deoj, EchonetObject::CONTROLLER);
    assert_eq!(reply.value(0xE7), Some(&PropertyValue::InstantaneousPower(500)));
    assert_eq!(sim.sent_payloads().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn exchange_assigns_consecutive_transaction_ids() {
    let (session, sim) = connected_session(SimulatorConfig::default()).await;

    let first = session.exchange(&PacketRequest::get(&[0xE7])).await.unwrap();
    let second = session.exchange(&PacketRequest::get(&[0xE7])).await.unwrap();
    assert_eq!(second.tid, first.tid.wrapping_add(1));

    let sent = sim.sent_payloads();
    assert_eq!(u16::from_be_bytes([sent[0][2], sent[0][3]]), first.tid);
    assert_eq!(u16::from_be_bytes([sent[1][2], sent[1][3]]), second.tid);
}

#[tokio::test(start_paused = true)]
async fn exchange_paces_the_meter() {
    let (session, _sim) = connected_session(SimulatorConfig::default()).await;

    let started = Instant::now();
    session.exchange(&PacketRequest::get(&[0xE7])).await.unwrap();
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn invalid_request_is_rejected_before_sending() {
    let (session, sim) = connected_session(SimulatorConfig::default()).await;

    let err = session
        .exchange(&PacketRequest::get(&[0xE7]).with_tid(0x1_0000))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Codec(_)));
    assert!(sim.sent_payloads().is_empty());
}

#[tokio::test(start_paused = true)]
async fn response_timeout_reauthenticates_and_retries() {
    let (session, sim) = connected_session(SimulatorConfig {
        dropped_replies: 1,
        ..SimulatorConfig::default()
    })
    .await;
    assert_eq!(sim.count_written("SKJOIN"), 1);

    let started = Instant::now();
    let reply = session.exchange(&PacketRequest::get(&[0xE7]).with_tid(9)).await.unwrap();
    assert_eq!(reply.tid, 9);
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(sim.count_written("SKJOIN"), 2);

    let sent = sim.sent_payloads();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0], sent[1]);
}

#[tokio::test(start_paused = true)]
async fn failed_reauthentication_stops_retrying() {
    let (session, sim) = connected_session(SimulatorConfig {
        dropped_replies: 1,
        ..SimulatorConfig::default()
    })
    .await;
    sim.configure(|config| config.join_failures = 4);

    let err = session.exchange(&PacketRequest::get(&[0xE7])).await.unwrap_err();
    assert!(matches!(err, Error::AuthenticationFailed));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(sim.sent_payloads().len(), 1);
    assert_eq!(sim.count_written("SKJOIN"), 4);
}

#[tokio::test(start_paused = true)]
async fn send_timeout_does_not_reauthenticate() {
    let (session, sim) = connected_session(SimulatorConfig {
        dropped_confirmations: 1,
        ..SimulatorConfig::default()
    })
    .await;

    let reply = session.exchange(&PacketRequest::get(&[0xE7])).await.unwrap();
    assert_eq!(reply.esv, ServiceCode::GetRes);
    assert_eq!(sim.count_written("SKJOIN"), 1);
    assert_eq!(sim.sent_payloads().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn persistent_send_failure_gets_one_recovery_cycle() {
    let (session, sim) = connected_session(SimulatorConfig {
        send_statuses: vec![0x01, 0x01, 0x01],
        ..SimulatorConfig::default()
    })
    .await;

    let reply = session.exchange(&PacketRequest::get(&[0xE7])).await.unwrap();
    assert_eq!(reply.value(0xE7), Some(&PropertyValue::InstantaneousPower(500)));
    assert_eq!(sim.sent_payloads().len(), 4);
    assert_eq!(sim.count_written("SKJOIN"), 2);
}

#[tokio::test(start_paused = true)]
async fn failed_recovery_returns_the_send_failure() {
    let (session, sim) = connected_session(SimulatorConfig {
        send_statuses: vec![0x01; 4],
        ..SimulatorConfig::default()
    })
    .await;

    let err = session.exchange(&PacketRequest::get(&[0xE7])).await.unwrap_err();
    assert!(err.is_send_failure(), "unexpected error: {err}");
    assert_eq!(sim.sent_payloads().len(), 4);
    assert_eq!(sim.count_written("SKJOIN"), 2);
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn session_end_cancels_waiting_exchange() {
    let (session, sim) = connected_session(SimulatorConfig {
        dropped_replies: 1,
        ..SimulatorConfig::default()
    })
    .await;
    let session = Arc::new(session);

    let waiting = tokio::spawn({
        let session = session.clone();
        async move { session.exchange(&PacketRequest::get(&[0xE7])).await }
    });
    tokio::time::sleep(Duration::from_secs(2)).await;
    sim.inject_line(&format!("EVENT 29 {METER_ADDR} 02"));

    let err = waiting.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert_eq!(sim.count_written("SKJOIN"), 1);
}

#[tokio::test(start_paused = true)]
async fn unsolicited_packets_are_published() {
    let (session, sim) = connected_session(SimulatorConfig::default()).await;
    let mut events = session.subscribe();

    // INF from the meter announcing instantaneous power
    sim.push_datagram(&hex::decode("1081000002880105FF017301E704000003E8").unwrap());

    let (sender, packet) = loop {
        if let SessionEvent::PacketReceived { sender, packet } = events.recv().await.unwrap() {
            break (sender, packet);
        }
    };
    assert_eq!(sender, METER_ADDR);
    assert_eq!(packet.esv, ServiceCode::Inf);
    assert_eq!(packet.value(0xE7), Some(&PropertyValue::InstantaneousPower(1000)));
}

#[tokio::test(start_paused = true)]
async fn malformed_datagrams_are_dropped() {
    let (session, sim) = connected_session(SimulatorConfig::default()).await;
    let mut events = session.subscribe();

    sim.push_datagram(&hex::decode("1081000002880105FF017205E704").unwrap());
    sim.push_datagram(&[0x01, 0x02, 0x03]);
    sim.push_datagram(&hex::decode("1081000102880105FF017201E704000001F4").unwrap());

    let packet = loop {
        if let SessionEvent::PacketReceived { packet, .. } = events.recv().await.unwrap() {
            break packet;
        }
    };
    assert_eq!(packet.tid, 1);
}

#[tokio::test(start_paused = true)]
async fn events_report_traffic() {
    let (session, _sim) = connected_session(SimulatorConfig::default()).await;
    let mut events = session.subscribe();

    session.exchange(&PacketRequest::get(&[0xE7]).with_tid(3)).await.unwrap();

    let mut sent = None;
    let mut lines = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::PacketSent { packet, raw } => {
                assert_eq!(&raw[..4], &[0x10, 0x81, 0x00, 0x03]);
                sent = Some(packet);
            }
            SessionEvent::LineReceived(_) => lines += 1,
            _ => {}
        }
    }
    let sent = sent.unwrap();
    assert_eq!(sent.esv, ServiceCode::Get);
    assert_eq!(sent.deoj, EchonetObject::SMART_METER);
    assert!(lines >= 2);
}

#[tokio::test(start_paused = true)]
async fn reconnect_after_disconnect() {
    let (adapter, _sim) = simulated_adapter(SimulatorConfig::default());
    let session = Session::new(adapter);

    session.connect().await.unwrap();
    session.disconnect().await.unwrap();
    let err = session.exchange(&PacketRequest::get(&[0xE7])).await.unwrap_err();
    assert!(matches!(err, Error::NotConnected));

    session.connect().await.unwrap();
    assert!(session.exchange(&PacketRequest::get(&[0xE7])).await.is_ok());
}

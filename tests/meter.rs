mod common;

use chrono::NaiveDate;
use common::connected_session;
use routeb_core::{Direction, EchonetObject, Error, PropertyValue, SimulatorConfig};
use std::collections::BTreeMap;

fn close(actual: Option<f64>, expected: f64) -> bool {
    actual.is_some_and(|v| (v - expected).abs() < 1e-9)
}

#[tokio::test(start_paused = true)]
async fn instantaneous_readings() {
    let (session, _sim) = connected_session(SimulatorConfig::default()).await;

    assert_eq!(session.instantaneous_power().await.unwrap(), Some(500));

    let currents = session.instantaneous_current().await.unwrap();
    assert!(close(currents.r_phase, 3.0));
    assert!(close(currents.t_phase, 1.0));
}

#[tokio::test(start_paused = true)]
async fn missing_readings_become_none() {
    let (session, sim) = connected_session(SimulatorConfig::default()).await;
    sim.set_meter_property(0xE7, vec![0x7F, 0xFF, 0xFF, 0xFE]);
    sim.set_meter_property(0xE8, vec![0x00, 0x1E, 0x7F, 0xFE]);
    sim.set_meter_property(0xE0, vec![0xFF, 0xFF, 0xFF, 0xFE]);

    assert_eq!(session.instantaneous_power().await.unwrap(), None);
    assert_eq!(session.instantaneous_current().await.unwrap().t_phase, None);
    assert_eq!(session.cumulative_energy(Direction::Normal).await.unwrap(), None);
}

#[tokio::test(start_paused = true)]
async fn cumulative_energy_is_scaled_and_cached() {
    let (session, sim) = connected_session(SimulatorConfig::default()).await;

    assert!(close(session.cumulative_energy(Direction::Normal).await.unwrap(), 1234.5));
    // E0, then 9F, D3 and E1 for the scale
    assert_eq!(sim.sent_payloads().len(), 4);

    assert!(close(session.cumulative_energy(Direction::Reverse).await.unwrap(), 67.8));
    assert_eq!(sim.sent_payloads().len(), 5);
    assert_eq!(session.effective_digits().await.unwrap(), 6);
}

#[tokio::test(start_paused = true)]
async fn coefficient_defaults_to_one_without_d3() {
    let mut properties = BTreeMap::new();
    properties.insert(0x9F, vec![0x04, 0x80, 0xE0, 0xE1, 0xE7]);
    properties.insert(0xD3, vec![0x00, 0x00, 0x00, 0x0A]);
    let (session, _sim) = connected_session(SimulatorConfig {
        meter_properties: properties,
        ..SimulatorConfig::default()
    })
    .await;

    assert_eq!(session.coefficient().await.unwrap(), 1);
    assert!(close(session.cumulative_energy(Direction::Normal).await.unwrap(), 1234.5));
}

#[tokio::test(start_paused = true)]
async fn coefficient_and_unit_multiply() {
    let mut properties = BTreeMap::new();
    properties.insert(0xD3, vec![0x00, 0x00, 0x00, 0x0A]);
    properties.insert(0xE1, vec![0x0A]);
    let (session, _sim) = connected_session(SimulatorConfig {
        meter_properties: properties,
        ..SimulatorConfig::default()
    })
    .await;

    let scale = session.energy_scale().await.unwrap();
    assert_eq!(scale.coefficient, 10);
    assert!(close(session.cumulative_energy(Direction::Reverse).await.unwrap(), 67_800.0));
}

#[tokio::test(start_paused = true)]
async fn energy_history_one() {
    let (session, sim) = connected_session(SimulatorConfig::default()).await;

    let log = session.energy_log1(Direction::Normal, 1).await.unwrap();
    assert_eq!(log.day, 1);
    assert_eq!(log.energy.len(), 48);
    assert!(close(log.energy[0], 1210.0));
    assert!(close(log.energy[47], 1214.7));

    // SetC E5 = 01 went out first
    let first = &sim.sent_payloads()[0];
    assert_eq!(first[10], 0x61);
    assert_eq!(&first[12..], &[0xE5, 0x01, 0x01]);

    let reverse = session.energy_log1(Direction::Reverse, 0).await.unwrap();
    assert_eq!(reverse.day, 0);
    assert!(close(reverse.energy[10], 1.0));
}

#[tokio::test(start_paused = true)]
async fn energy_history_one_rejects_old_days() {
    let (session, sim) = connected_session(SimulatorConfig::default()).await;

    let err = session.energy_log1(Direction::Normal, 100).await.unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));
    assert!(sim.sent_payloads().is_empty());
}

#[tokio::test(start_paused = true)]
async fn energy_history_two() {
    let (session, sim) = connected_session(SimulatorConfig::default()).await;
    let at = NaiveDate::from_ymd_opt(2023, 11, 5).unwrap().and_hms_opt(13, 0, 0).unwrap();

    let history = session.energy_log2(Some(at), 3).await.unwrap();
    assert_eq!(history.date_time, "2023-11-05T13:00");
    assert_eq!(history.segments, 3);

    let times: Vec<_> = history.entries.iter().map(|e| e.date_time.as_str()).collect();
    assert_eq!(times, ["2023-11-05T13:00", "2023-11-05T12:30", "2023-11-05T12:00"]);
    assert!(close(history.entries[0].normal, 1210.0));
    assert!(close(history.entries[2].normal, 1209.8));
    assert!(close(history.entries[1].reverse, 0.1));

    let first = &sim.sent_payloads()[0];
    assert_eq!(&first[12..], &[0xED, 0x07, 0x07, 0xE7, 0x0B, 0x05, 0x0D, 0x00, 0x03]);
}

#[tokio::test(start_paused = true)]
async fn energy_history_two_validates_arguments() {
    let (session, sim) = connected_session(SimulatorConfig::default()).await;
    let quarter_past = NaiveDate::from_ymd_opt(2023, 11, 5).unwrap().and_hms_opt(13, 15, 0).unwrap();
    let on_the_hour = NaiveDate::from_ymd_opt(2023, 11, 5).unwrap().and_hms_opt(13, 0, 0).unwrap();

    assert!(matches!(
        session.energy_log2(Some(quarter_past), 1).await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        session.energy_log2(Some(on_the_hour), 0).await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        session.energy_log2(Some(on_the_hour), 13).await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(sim.sent_payloads().is_empty());
}

#[tokio::test(start_paused = true)]
async fn fixed_time_energy() {
    let (session, _sim) = connected_session(SimulatorConfig::default()).await;

    let normal = session.energy_at_fixed_time(Direction::Normal).await.unwrap();
    assert!(normal.date_time.starts_with("2023-11-05T13:00"));
    assert!(close(normal.energy, 1234.5));

    let reverse = session.energy_at_fixed_time(Direction::Reverse).await.unwrap();
    assert!(close(reverse.energy, 67.8));
}

#[tokio::test(start_paused = true)]
async fn device_info_collects_identification() {
    let (session, _sim) = connected_session(SimulatorConfig::default()).await;

    let info = session.device_info().await.unwrap();
    assert_eq!(info.id, Some(format!("FE000016{}", "22".repeat(13))));
    assert_eq!(info.meter_id, Some(format!("FE000016{}", "11".repeat(13))));
    assert_eq!(info.protocol.as_deref(), Some("J"));
    assert_eq!(info.manufacturer.as_deref(), Some("000016"));
    assert_eq!(info.product_code.as_deref(), Some("ROUTEB-SIM"));
    assert_eq!(info.serial_number.as_deref(), Some("S20G7300001"));
}

#[tokio::test(start_paused = true)]
async fn unknown_property_is_an_unexpected_reply() {
    let (session, _sim) = connected_session(SimulatorConfig::default()).await;

    let err = session.get_property(EchonetObject::SMART_METER, 0xF0).await.unwrap_err();
    assert!(matches!(err, Error::UnexpectedReply(_)));
}

#[tokio::test(start_paused = true)]
async fn set_property_requires_set_res() {
    let (session, _sim) = connected_session(SimulatorConfig::default()).await;

    session.set_property(EchonetObject::SMART_METER, 0xE5, vec![0x02]).await.unwrap();
    assert_eq!(
        session.get_property(EchonetObject::SMART_METER, 0xE5).await.unwrap(),
        PropertyValue::Log1Day(2)
    );

    let err = session
        .set_property(EchonetObject::SMART_METER, 0x80, vec![0x31])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnexpectedReply(_)));
}

#[tokio::test(start_paused = true)]
async fn node_profile_properties() {
    let (session, _sim) = connected_session(SimulatorConfig::default()).await;

    let value = session.get_property(EchonetObject::NODE_PROFILE, 0x82).await.unwrap();
    assert_eq!(value, PropertyValue::Version("1.13".to_string()));
}

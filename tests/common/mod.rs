//! Shared fixtures for the integration tests

#![allow(dead_code)]

use routeb_core::{Adapter, AdapterConfig, AdapterEvent, ConnectionState, DongleSimulator, Session, SimulatorConfig, SimulatorHandle};
use std::time::Duration;
use tokio::sync::broadcast;

pub const PORT: &str = "/dev/ttyUSB0";
pub const ROUTE_B_ID: &str = "00000039000000000000000000000ABC";
pub const PASSWORD: &str = "SECRET123";
pub const METER_ADDR: &str = "FE80:0000:0000:0000:021C:6400:030C:12A4";

pub fn adapter_config() -> AdapterConfig {
    AdapterConfig::new(PORT, ROUTE_B_ID, PASSWORD).unwrap()
}

pub fn simulated_adapter(config: SimulatorConfig) -> (Adapter, SimulatorHandle) {
    let simulator = DongleSimulator::new(config);
    let handle = simulator.handle();
    (Adapter::new(adapter_config(), Box::new(simulator)), handle)
}

pub async fn connected_session(config: SimulatorConfig) -> (Session, SimulatorHandle) {
    let (adapter, handle) = simulated_adapter(config);
    let session = Session::new(adapter);
    session.connect().await.unwrap();
    (session, handle)
}

/// Wait until the adapter reports `state`; false after a minute of simulated time
pub async fn wait_for_state(events: &mut broadcast::Receiver<AdapterEvent>, state: ConnectionState) -> bool {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(AdapterEvent::StateChanged(s)) if s == state => return true,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return false,
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(60), wait).await.unwrap_or(false)
}

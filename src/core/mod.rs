//! Core module containing the main functionality of routeb
//!
//! This module provides:
//! - Line transport to the Wi-SUN dongle (serial port with ERXUDP-aware framing)
//! - The adapter engine driving scan, PANA authentication and UDP sends
//! - ECHONET Lite packet codec and property decoders
//! - Request orchestration with transaction IDs and link recovery
//! - Smart meter helpers
//! - An in-process dongle simulator
//! - A traffic recorder

pub mod adapter;
pub mod echonet;
pub mod logger;
pub mod meter;
pub mod session;
pub mod simulator;
pub mod state_machine;
pub mod transport;

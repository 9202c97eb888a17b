//! Result rendering for the command-line tool

use crate::core::echonet::{Packet, PropertyValue};
use clap::ValueEnum;
use serde::Serialize;

/// CLI output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON format for scripting
    Json,
}

/// Render `value` as pretty JSON, or as `text` in text mode
pub fn render<T: Serialize>(format: OutputFormat, value: &T, text: impl FnOnce() -> String) -> String {
    match format {
        OutputFormat::Json => serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}")),
        OutputFormat::Text => text(),
    }
}

/// Kilowatt-hours with the meter's precision, or `-`
pub fn kwh(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.3} kWh"))
}

/// One-line summary of a decoded property value
pub fn describe_value(value: &PropertyValue) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("{value:?}"))
}

/// One-line summary of a packet
pub fn describe_packet(packet: &Packet) -> String {
    let props: Vec<String> = packet
        .properties
        .iter()
        .map(|p| match &p.value {
            Some(value) => format!("{:02X}={}", p.epc, describe_value(value)),
            None => format!("{:02X}:{}", p.epc, hex::encode_upper(&p.edt)),
        })
        .collect();
    format!(
        "TID {:04X} {} -> {} ESV {} [{}]",
        packet.tid,
        packet.seoj,
        packet.deoj,
        packet.esv,
        props.join(", ")
    )
}

//! ECHONET Lite packet codec
//!
//! Pure functions: [`compose`] validates a [`PacketRequest`] and produces the
//! wire bytes, [`parse`] reads a [`Packet`] back and decodes each property
//! through a [`PropertyDecoder`].

mod decoder;
mod packet;

pub use decoder::{
    ClassList, EnergyLog1, EnergyLog2, EnergyPair, FixedTimeEnergy, InstanceList, Log2Point, PropertyDecoder,
    PropertyMap, PropertyValue, StandardDecoders, TimeUnit, NODE_PROFILE_CLASS, SMART_METER_CLASS,
};
pub use packet::{
    compose, parse, EchonetObject, Packet, PacketRequest, Property, PropertyData, PropertyRequest, ServiceCode,
    ECHONET_HEADER, MAX_PROPERTIES, MIN_PACKET_LEN,
};

use thiserror::Error;

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Transaction ID missing or outside 0..=0xFFFF
    #[error("Invalid transaction ID: {0}")]
    InvalidTransactionId(String),

    /// Object code is not 6 hex digits
    #[error("Invalid object code: {0}")]
    InvalidObjectCode(String),

    /// Service code other than SetC (61) or Get (62)
    #[error("Invalid service code: {0}")]
    InvalidServiceCode(String),

    /// Missing, empty or malformed property
    #[error("Invalid property: {0}")]
    InvalidProperty(String),

    /// Property list runs past the end of the packet
    #[error("Malformed packet: {0}")]
    MalformedPacket(String),
}

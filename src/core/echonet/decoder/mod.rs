//! Property decoder registry
//!
//! Static per-class tables map an EPC to a pure decoding function. The smart
//! meter class falls back to the device superclass table; the node profile
//! has no fallback and unknown classes decode nothing.

mod meter;
mod node_profile;
mod superclass;

use super::packet::EchonetObject;
use serde::{Serialize, Serializer};

type DecodeFn = fn(&[u8]) -> Option<PropertyValue>;

/// Class code of the low-voltage smart electric energy meter
pub const SMART_METER_CLASS: u16 = 0x0288;

/// Class code of the node profile
pub const NODE_PROFILE_CLASS: u16 = 0x0EF0;

/// Turns raw property data into structured values
#[cfg_attr(test, mockall::automock)]
pub trait PropertyDecoder: Send + Sync {
    /// Decode `edt` of property `epc` for object class `class`; `None` when
    /// the property is unknown or the data does not fit
    fn decode(&self, class: u16, epc: u8, edt: &[u8]) -> Option<PropertyValue>;
}

/// Decoders for the smart meter, the node profile and the device superclass
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardDecoders;

fn lookup(table: &[(u8, DecodeFn)], epc: u8, edt: &[u8]) -> Option<PropertyValue> {
    table
        .iter()
        .find(|(code, _)| *code == epc)
        .and_then(|(_, decode)| decode(edt))
}

impl PropertyDecoder for StandardDecoders {
    fn decode(&self, class: u16, epc: u8, edt: &[u8]) -> Option<PropertyValue> {
        if edt.is_empty() {
            return None;
        }
        match class {
            SMART_METER_CLASS => {
                lookup(meter::TABLE, epc, edt).or_else(|| lookup(superclass::TABLE, epc, edt))
            }
            NODE_PROFILE_CLASS => lookup(node_profile::TABLE, epc, edt),
            _ => None,
        }
    }
}

/// Sorted list of property codes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyMap(pub Vec<u8>);

impl PropertyMap {
    /// Whether `epc` is listed
    pub fn contains(&self, epc: u8) -> bool {
        self.0.binary_search(&epc).is_ok()
    }

    /// Property codes in ascending order
    pub fn codes(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for PropertyMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter().map(|epc| format!("{epc:02X}")))
    }
}

/// Unit of the cumulative operating time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// Seconds
    Second,
    /// Minutes
    Minute,
    /// Hours
    Hour,
    /// Days
    Day,
}

/// Cumulative energy history 1: 48 half-hour readings of one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnergyLog1 {
    /// Days before today (0 = today)
    pub day: u16,
    /// Raw readings, `0xFFFFFFFE` when missing
    pub readings: Vec<u32>,
}

/// Cumulative energy taken at the last half hour
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixedTimeEnergy {
    /// `YYYY-MM-DDTHH:MM:SS`
    pub date_time: String,
    /// Raw reading
    pub reading: u32,
}

/// Normal/reverse reading pair of history 2
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnergyPair {
    /// Normal direction raw reading
    pub normal: u32,
    /// Reverse direction raw reading
    pub reverse: u32,
}

/// Cumulative energy history 2
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergyLog2 {
    /// Newest segment, `YYYY-MM-DDTHH:MM`
    pub date_time: String,
    /// Number of segments requested
    pub segments: u8,
    /// Readings, newest first
    pub readings: Vec<EnergyPair>,
}

/// Collection point of history 2
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Log2Point {
    /// `YYYY-MM-DDTHH:MM`
    pub date_time: String,
    /// Number of segments
    pub segments: u8,
}

/// Instance list of the node profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceList {
    /// Declared instance count
    pub count: u8,
    /// Object codes
    pub instances: Vec<EchonetObject>,
}

/// Class list of the node profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassList {
    /// Declared class count
    pub count: u8,
    /// Class codes as 4 hex digits
    pub classes: Vec<String>,
}

/// Decoded property value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PropertyValue {
    /// 0x80
    OperatingStatus(bool),
    /// 0x81
    InstallationLocation(String),
    /// 0x82 (device objects): release letter of the standard
    StandardVersion(String),
    /// 0x82 (node profile): `major.minor`
    Version(String),
    /// 0x83
    Identification(String),
    /// 0x84, W
    PowerConsumption(u16),
    /// 0x85, kWh
    ConsumedEnergy(f64),
    /// 0x86
    ManufacturerFaultCode(String),
    /// 0x87, %
    CurrentLimit(u8),
    /// 0x88
    FaultStatus(bool),
    /// 0x89
    FaultDescription(u16),
    /// 0x8A, manufacturer code as 6 hex digits
    Manufacturer(String),
    /// 0x8B
    BusinessFacilityCode(String),
    /// 0x8C
    ProductCode(String),
    /// 0x8D
    SerialNumber(String),
    /// 0x8E, `YYYY-MM-DD`
    ProductionDate(String),
    /// 0x8F
    PowerSaving(bool),
    /// 0x93
    RemoteControl(bool),
    /// 0x97, `HH:MM`
    CurrentTime(String),
    /// 0x98, `YYYY-MM-DD`
    CurrentDate(String),
    /// 0x99, W
    PowerLimit(u16),
    /// 0x9A
    HourMeter {
        /// Unit of `time`
        unit: TimeUnit,
        /// Operating time
        time: u32,
    },
    /// 0x9D
    AnnouncementPropertyMap(PropertyMap),
    /// 0x9E
    SetPropertyMap(PropertyMap),
    /// 0x9F
    GetPropertyMap(PropertyMap),
    /// 0xBF
    UniqueId(String),
    /// 0xD3 (meter)
    Coefficient(u32),
    /// 0xD3 (node profile)
    SelfNodeInstances(u32),
    /// 0xD4
    SelfNodeClasses(u16),
    /// 0xD5
    InstanceListNotification(InstanceList),
    /// 0xD6
    SelfNodeInstanceList(InstanceList),
    /// 0xD7 (node profile)
    SelfNodeClassList(ClassList),
    /// 0xD7 (meter)
    EffectiveDigits(u8),
    /// 0xE0, raw reading
    NormalDirectionEnergy(u32),
    /// 0xE1, kWh per reading unit
    EnergyUnit(f64),
    /// 0xE2
    NormalDirectionLog1(EnergyLog1),
    /// 0xE3, raw reading
    ReverseDirectionEnergy(u32),
    /// 0xE4
    ReverseDirectionLog1(EnergyLog1),
    /// 0xE5
    Log1Day(u8),
    /// 0xE7, W
    InstantaneousPower(i32),
    /// 0xE8, 0.1 A
    #[serde(rename_all = "camelCase")]
    InstantaneousCurrent {
        /// R phase
        r_phase: i16,
        /// T phase (0x7FFE on single-phase two-wire)
        t_phase: i16,
    },
    /// 0xEA
    NormalDirectionFixedTime(FixedTimeEnergy),
    /// 0xEB
    ReverseDirectionFixedTime(FixedTimeEnergy),
    /// 0xEC
    EnergyLog2(EnergyLog2),
    /// 0xED
    Log2Point(Log2Point),
}

impl PropertyValue {
    /// Property map carried by 0x9D/0x9E/0x9F
    pub fn as_property_map(&self) -> Option<&PropertyMap> {
        match self {
            Self::AnnouncementPropertyMap(map) | Self::SetPropertyMap(map) | Self::GetPropertyMap(map) => Some(map),
            _ => None,
        }
    }
}

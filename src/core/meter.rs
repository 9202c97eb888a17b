//! Smart meter helpers on top of [`Session::exchange`]
//!
//! Each helper issues single-property Get/SetC requests to the meter object
//! (`028801`) and converts raw readings to physical units. The Get property
//! map, coefficient, energy unit and effective digits are cached per session.

use crate::core::echonet::{EchonetObject, PacketRequest, PropertyMap, PropertyValue, ServiceCode};
use crate::core::session::Session;
use crate::error::{Error, Result};
use chrono::{Datelike, Duration, Local, NaiveDateTime, Timelike};
use serde::Serialize;

/// Missing cumulative reading
const NO_ENERGY: u32 = 0xFFFF_FFFE;
/// Missing instantaneous power
const NO_POWER: i32 = 0x7FFF_FFFE;
/// Missing phase current (also the T phase of single-phase meters)
const NO_CURRENT: i16 = 0x7FFE;

/// Oldest day selectable for history 1
pub const MAX_LOG1_DAY: u8 = 99;
/// Most segments history 2 returns
pub const MAX_LOG2_SEGMENTS: u8 = 12;

/// Time format of history 2 segments, also accepted by the CLI
pub const LOG2_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Energy flow direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Bought from the grid
    #[default]
    Normal,
    /// Sold to the grid
    Reverse,
}

impl Direction {
    fn cumulative_epc(self) -> u8 {
        match self {
            Self::Normal => 0xE0,
            Self::Reverse => 0xE3,
        }
    }

    fn log1_epc(self) -> u8 {
        match self {
            Self::Normal => 0xE2,
            Self::Reverse => 0xE4,
        }
    }

    fn fixed_time_epc(self) -> u8 {
        match self {
            Self::Normal => 0xEA,
            Self::Reverse => 0xEB,
        }
    }
}

/// Values read once per connection
#[derive(Debug, Default)]
pub(crate) struct MeterCache {
    get_map: Option<PropertyMap>,
    coefficient: Option<u32>,
    unit: Option<f64>,
    digits: Option<u8>,
}

impl MeterCache {
    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Multiplier turning raw cumulative readings into kWh
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyScale {
    /// Coefficient (D3), 1 when the meter has none
    pub coefficient: u32,
    /// kWh per reading unit (E1)
    pub unit: f64,
}

impl EnergyScale {
    /// Scale a raw reading; `None` for the "no data" marker
    pub fn apply(&self, raw: u32) -> Option<f64> {
        if raw == NO_ENERGY {
            return None;
        }
        let value = f64::from(raw) * f64::from(self.coefficient);
        // Divide by the decimal power for fractional units to keep readings exact
        Some(if self.unit < 1.0 {
            value / (1.0 / self.unit).round()
        } else {
            value * self.unit
        })
    }
}

/// Identification of the meter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Node identification number (0EF001, 83)
    pub id: Option<String>,
    /// Release letter of the supported standard (82)
    pub protocol: Option<String>,
    /// Meter object identification number (83)
    pub meter_id: Option<String>,
    /// Manufacturer code (8A)
    pub manufacturer: Option<String>,
    /// Product code (8C)
    pub product_code: Option<String>,
    /// Serial number (8D)
    pub serial_number: Option<String>,
}

/// Instantaneous currents in amperes
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Currents {
    /// R phase
    pub r_phase: Option<f64>,
    /// T phase, `None` on single-phase two-wire meters
    pub t_phase: Option<f64>,
}

/// Half-hourly cumulative energy of one day (history 1)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyEnergy {
    /// Days before today
    pub day: u16,
    /// 48 readings in kWh from 00:00, `None` where missing
    pub energy: Vec<Option<f64>>,
}

/// Cumulative energy at a point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimedEnergy {
    /// `YYYY-MM-DDTHH:MM:SS`
    pub date_time: String,
    /// kWh
    pub energy: Option<f64>,
}

/// One segment of history 2
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HalfHourEnergy {
    /// `YYYY-MM-DDTHH:MM`
    pub date_time: String,
    /// Normal direction, kWh
    pub normal: Option<f64>,
    /// Reverse direction, kWh
    pub reverse: Option<f64>,
}

/// Cumulative energy history 2
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergyHistory {
    /// Newest segment, `YYYY-MM-DDTHH:MM`
    pub date_time: String,
    /// Segment count reported by the meter
    pub segments: u8,
    /// Segments, newest first
    pub entries: Vec<HalfHourEnergy>,
}

fn unexpected(epc: u8, value: &PropertyValue) -> Error {
    Error::UnexpectedReply(format!("EPC {epc:02X} decoded as {value:?}"))
}

/// Round `at` down to the half hour
pub fn half_hour_floor(at: NaiveDateTime) -> NaiveDateTime {
    let minute = if at.minute() < 30 { 0 } else { 30 };
    at.date()
        .and_hms_opt(at.hour(), minute, 0)
        .unwrap_or(at)
}

fn log2_request(at: NaiveDateTime, segments: u8) -> Result<Vec<u8>> {
    if !(1..=MAX_LOG2_SEGMENTS).contains(&segments) {
        return Err(Error::InvalidArgument(format!(
            "segments must be 1 to {MAX_LOG2_SEGMENTS}, got {segments}"
        )));
    }
    if !matches!(at.minute(), 0 | 30) || at.second() != 0 {
        return Err(Error::InvalidArgument(format!(
            "history 2 time must be on the hour or half hour, got {}",
            at.format(LOG2_TIME_FORMAT)
        )));
    }
    let year = u16::try_from(at.year())
        .map_err(|_| Error::InvalidArgument(format!("year {} is out of range", at.year())))?;

    let mut edt = year.to_be_bytes().to_vec();
    for field in [at.month(), at.day(), at.hour(), at.minute()] {
        edt.push(u8::try_from(field).map_err(|_| Error::InvalidArgument(format!("{at} is out of range")))?);
    }
    edt.push(segments);
    Ok(edt)
}

impl Session {
    /// Get one property of `deoj`, failing unless the meter answers Get_Res
    /// with decodable data
    pub async fn get_property(&self, deoj: EchonetObject, epc: u8) -> Result<PropertyValue> {
        let request = PacketRequest::get(&[epc]).with_deoj(deoj.to_string());
        let reply = self.exchange(&request).await?;
        if reply.esv != ServiceCode::GetRes {
            return Err(Error::UnexpectedReply(format!(
                "meter answered Get {epc:02X} with ESV {}",
                reply.esv
            )));
        }
        match reply.property(epc) {
            Some(property) => property.value.clone().ok_or_else(|| {
                Error::UnexpectedReply(format!(
                    "EPC {epc:02X} data {} could not be decoded",
                    hex::encode_upper(&property.edt)
                ))
            }),
            None => Err(Error::UnexpectedReply(format!("EPC {epc:02X} missing from reply"))),
        }
    }

    /// Set one property of `deoj`, failing unless the meter answers Set_Res
    pub async fn set_property(&self, deoj: EchonetObject, epc: u8, edt: Vec<u8>) -> Result<()> {
        let request = PacketRequest::set_c(epc, edt).with_deoj(deoj.to_string());
        let reply = self.exchange(&request).await?;
        if reply.esv != ServiceCode::SetRes {
            return Err(Error::UnexpectedReply(format!(
                "meter answered SetC {epc:02X} with ESV {}",
                reply.esv
            )));
        }
        Ok(())
    }

    async fn get_meter(&self, epc: u8) -> Result<PropertyValue> {
        self.get_property(EchonetObject::SMART_METER, epc).await
    }

    /// Get property map of the meter object (cached)
    pub async fn get_property_map(&self) -> Result<PropertyMap> {
        if let Some(map) = self.cache.lock().get_map.clone() {
            return Ok(map);
        }
        let map = match self.get_meter(0x9F).await? {
            PropertyValue::GetPropertyMap(map) => map,
            other => return Err(unexpected(0x9F, &other)),
        };
        self.cache.lock().get_map = Some(map.clone());
        Ok(map)
    }

    /// Energy coefficient, 1 when the meter does not offer D3 (cached)
    pub async fn coefficient(&self) -> Result<u32> {
        if let Some(coefficient) = self.cache.lock().coefficient {
            return Ok(coefficient);
        }
        let coefficient = if self.get_property_map().await?.contains(0xD3) {
            match self.get_meter(0xD3).await? {
                PropertyValue::Coefficient(c) => c,
                other => return Err(unexpected(0xD3, &other)),
            }
        } else {
            1
        };
        self.cache.lock().coefficient = Some(coefficient);
        Ok(coefficient)
    }

    /// kWh per raw reading unit (cached)
    pub async fn energy_unit(&self) -> Result<f64> {
        if let Some(unit) = self.cache.lock().unit {
            return Ok(unit);
        }
        let unit = match self.get_meter(0xE1).await? {
            PropertyValue::EnergyUnit(unit) => unit,
            other => return Err(unexpected(0xE1, &other)),
        };
        self.cache.lock().unit = Some(unit);
        Ok(unit)
    }

    /// Number of effective digits of cumulative readings (cached)
    pub async fn effective_digits(&self) -> Result<u8> {
        if let Some(digits) = self.cache.lock().digits {
            return Ok(digits);
        }
        let digits = match self.get_meter(0xD7).await? {
            PropertyValue::EffectiveDigits(digits) => digits,
            other => return Err(unexpected(0xD7, &other)),
        };
        self.cache.lock().digits = Some(digits);
        Ok(digits)
    }

    /// Coefficient and unit together
    pub async fn energy_scale(&self) -> Result<EnergyScale> {
        Ok(EnergyScale {
            coefficient: self.coefficient().await?,
            unit: self.energy_unit().await?,
        })
    }

    /// Identification numbers, manufacturer and product of the meter
    pub async fn device_info(&self) -> Result<DeviceInfo> {
        let mut info = DeviceInfo::default();
        match self.get_property(EchonetObject::NODE_PROFILE, 0x83).await? {
            PropertyValue::Identification(id) => info.id = Some(id),
            other => return Err(unexpected(0x83, &other)),
        }

        let map = self.get_property_map().await?;
        for epc in [0x82, 0x83, 0x8A, 0x8C, 0x8D] {
            if !map.contains(epc) {
                continue;
            }
            match self.get_meter(epc).await? {
                PropertyValue::StandardVersion(v) => info.protocol = Some(v),
                PropertyValue::Identification(id) => info.meter_id = Some(id),
                PropertyValue::Manufacturer(code) => info.manufacturer = Some(code),
                PropertyValue::ProductCode(code) => info.product_code = Some(code),
                PropertyValue::SerialNumber(serial) => info.serial_number = Some(serial),
                other => return Err(unexpected(epc, &other)),
            }
        }
        Ok(info)
    }

    /// Instantaneous power in W; `None` when the meter has no reading
    pub async fn instantaneous_power(&self) -> Result<Option<i32>> {
        match self.get_meter(0xE7).await? {
            PropertyValue::InstantaneousPower(NO_POWER) => Ok(None),
            PropertyValue::InstantaneousPower(watts) => Ok(Some(watts)),
            other => Err(unexpected(0xE7, &other)),
        }
    }

    /// Instantaneous R/T phase currents in A
    pub async fn instantaneous_current(&self) -> Result<Currents> {
        let amperes = |raw: i16| (raw != NO_CURRENT).then(|| f64::from(raw) / 10.0);
        match self.get_meter(0xE8).await? {
            PropertyValue::InstantaneousCurrent { r_phase, t_phase } => Ok(Currents {
                r_phase: amperes(r_phase),
                t_phase: amperes(t_phase),
            }),
            other => Err(unexpected(0xE8, &other)),
        }
    }

    /// Cumulative energy in kWh
    pub async fn cumulative_energy(&self, direction: Direction) -> Result<Option<f64>> {
        let epc = direction.cumulative_epc();
        let raw = match self.get_meter(epc).await? {
            PropertyValue::NormalDirectionEnergy(raw) | PropertyValue::ReverseDirectionEnergy(raw) => raw,
            other => return Err(unexpected(epc, &other)),
        };
        if raw == NO_ENERGY {
            return Ok(None);
        }
        Ok(self.energy_scale().await?.apply(raw))
    }

    /// Half-hourly cumulative energy of `day` days ago (0 = today)
    pub async fn energy_log1(&self, direction: Direction, day: u8) -> Result<DailyEnergy> {
        if day > MAX_LOG1_DAY {
            return Err(Error::InvalidArgument(format!(
                "day must be 0 to {MAX_LOG1_DAY}, got {day}"
            )));
        }
        self.set_property(EchonetObject::SMART_METER, 0xE5, vec![day]).await?;

        let epc = direction.log1_epc();
        let log = match self.get_meter(epc).await? {
            PropertyValue::NormalDirectionLog1(log) | PropertyValue::ReverseDirectionLog1(log) => log,
            other => return Err(unexpected(epc, &other)),
        };
        let scale = self.energy_scale().await?;
        Ok(DailyEnergy {
            day: log.day,
            energy: log.readings.iter().map(|&raw| scale.apply(raw)).collect(),
        })
    }

    /// Cumulative energy taken at the latest half hour
    pub async fn energy_at_fixed_time(&self, direction: Direction) -> Result<TimedEnergy> {
        let epc = direction.fixed_time_epc();
        let reading = match self.get_meter(epc).await? {
            PropertyValue::NormalDirectionFixedTime(reading) | PropertyValue::ReverseDirectionFixedTime(reading) => {
                reading
            }
            other => return Err(unexpected(epc, &other)),
        };
        let energy = if reading.reading == NO_ENERGY {
            None
        } else {
            self.energy_scale().await?.apply(reading.reading)
        };
        Ok(TimedEnergy {
            date_time: reading.date_time,
            energy,
        })
    }

    /// Normal and reverse energy of `segments` half hours ending at `at`
    /// (default: the current half hour)
    pub async fn energy_log2(&self, at: Option<NaiveDateTime>, segments: u8) -> Result<EnergyHistory> {
        let at = at.unwrap_or_else(|| half_hour_floor(Local::now().naive_local()));
        let edt = log2_request(at, segments)?;
        self.set_property(EchonetObject::SMART_METER, 0xED, edt).await?;

        let log = match self.get_meter(0xEC).await? {
            PropertyValue::EnergyLog2(log) => log,
            other => return Err(unexpected(0xEC, &other)),
        };
        let newest = NaiveDateTime::parse_from_str(&log.date_time, LOG2_TIME_FORMAT)
            .map_err(|_| Error::UnexpectedReply(format!("history 2 time {}", log.date_time)))?;
        let scale = self.energy_scale().await?;

        let entries = (0i64..)
            .zip(&log.readings)
            .map(|(i, pair)| HalfHourEnergy {
                date_time: (newest - Duration::minutes(30 * i)).format(LOG2_TIME_FORMAT).to_string(),
                normal: scale.apply(pair.normal),
                reverse: scale.apply(pair.reverse),
            })
            .collect();

        Ok(EnergyHistory {
            date_time: log.date_time,
            segments: log.segments,
            entries,
        })
    }
}

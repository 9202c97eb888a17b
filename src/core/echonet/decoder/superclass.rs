//! Device object superclass properties, plus helpers shared by the class tables

use super::{DecodeFn, PropertyMap, PropertyValue, TimeUnit};

pub(super) static TABLE: &[(u8, DecodeFn)] = &[
    (0x80, operating_status),
    (0x81, installation_location),
    (0x82, standard_version),
    (0x83, identification),
    (0x84, power_consumption),
    (0x85, consumed_energy),
    (0x86, fault_code),
    (0x87, current_limit),
    (0x88, fault_status),
    (0x89, fault_description),
    (0x8A, manufacturer),
    (0x8B, business_facility),
    (0x8C, product_code),
    (0x8D, serial_number),
    (0x8E, production_date),
    (0x8F, power_saving),
    (0x93, remote_control),
    (0x97, current_time),
    (0x98, current_date),
    (0x99, power_limit),
    (0x9A, hour_meter),
    (0x9D, announcement_map),
    (0x9E, set_map),
    (0x9F, get_map),
];

pub(super) fn be_u16(edt: &[u8]) -> Option<u16> {
    Some(u16::from_be_bytes(edt.try_into().ok()?))
}

pub(super) fn be_u32(edt: &[u8]) -> Option<u32> {
    Some(u32::from_be_bytes(edt.try_into().ok()?))
}

pub(super) fn single(edt: &[u8]) -> Option<u8> {
    match edt {
        [b] => Some(*b),
        _ => None,
    }
}

pub(super) fn upper_hex(edt: &[u8]) -> String {
    hex::encode_upper(edt)
}

/// `YYYY-MM-DD` from year (u16), month, day
pub(super) fn date(edt: &[u8]) -> Option<String> {
    let year = be_u16(edt.get(0..2)?)?;
    let (month, day) = (*edt.get(2)?, *edt.get(3)?);
    Some(format!("{year}-{month:02}-{day:02}"))
}

/// ASCII text padded with NUL bytes
pub(super) fn nul_padded(edt: &[u8]) -> String {
    let end = edt.iter().position(|&b| b == 0).unwrap_or(edt.len());
    String::from_utf8_lossy(&edt[..end]).into_owned()
}

/// Two-state flag; anything outside both sets is undecodable
pub(super) fn flag(edt: &[u8], on: &[u8], off: &[u8]) -> Option<bool> {
    let b = single(edt)?;
    if on.contains(&b) {
        Some(true)
    } else if off.contains(&b) {
        Some(false)
    } else {
        None
    }
}

/// Property map: a code list below 16 entries, a 16-byte bitmap otherwise
pub(super) fn property_map(edt: &[u8]) -> Option<PropertyMap> {
    let (&count, rest) = edt.split_first()?;
    if edt.len() > 17 {
        return None;
    }

    let mut codes = if (1..16).contains(&count) {
        if rest.len() != usize::from(count) {
            return None;
        }
        rest.to_vec()
    } else {
        if rest.len() != 16 {
            return None;
        }
        let mut codes = Vec::new();
        for (i, byte) in (0u8..).zip(rest) {
            for s in 0..8u8 {
                if byte & (1 << s) != 0 {
                    codes.push(((8 + s) << 4) + i);
                }
            }
        }
        codes
    };

    codes.sort_unstable();
    Some(PropertyMap(codes))
}

pub(super) fn operating_status(edt: &[u8]) -> Option<PropertyValue> {
    flag(edt, &[0x30], &[0x31]).map(PropertyValue::OperatingStatus)
}

fn installation_location(edt: &[u8]) -> Option<PropertyValue> {
    matches!(edt.len(), 1 | 17).then(|| PropertyValue::InstallationLocation(upper_hex(edt)))
}

fn standard_version(edt: &[u8]) -> Option<PropertyValue> {
    if edt.len() != 4 {
        return None;
    }
    let release = char::from(edt[2]).to_ascii_uppercase();
    Some(PropertyValue::StandardVersion(release.to_string()))
}

fn identification(edt: &[u8]) -> Option<PropertyValue> {
    matches!(edt.len(), 9 | 17).then(|| PropertyValue::Identification(upper_hex(edt)))
}

fn power_consumption(edt: &[u8]) -> Option<PropertyValue> {
    be_u16(edt).map(PropertyValue::PowerConsumption)
}

fn consumed_energy(edt: &[u8]) -> Option<PropertyValue> {
    be_u32(edt).map(|wh| PropertyValue::ConsumedEnergy(f64::from(wh) / 1000.0))
}

fn fault_code(edt: &[u8]) -> Option<PropertyValue> {
    (edt.len() >= 5).then(|| PropertyValue::ManufacturerFaultCode(upper_hex(edt)))
}

fn current_limit(edt: &[u8]) -> Option<PropertyValue> {
    single(edt).map(PropertyValue::CurrentLimit)
}

pub(super) fn fault_status(edt: &[u8]) -> Option<PropertyValue> {
    flag(edt, &[0x41], &[0x42]).map(PropertyValue::FaultStatus)
}

pub(super) fn fault_description(edt: &[u8]) -> Option<PropertyValue> {
    be_u16(edt).map(PropertyValue::FaultDescription)
}

pub(super) fn manufacturer(edt: &[u8]) -> Option<PropertyValue> {
    (edt.len() == 3).then(|| PropertyValue::Manufacturer(upper_hex(edt)))
}

pub(super) fn business_facility(edt: &[u8]) -> Option<PropertyValue> {
    (edt.len() == 3).then(|| PropertyValue::BusinessFacilityCode(upper_hex(edt)))
}

pub(super) fn product_code(edt: &[u8]) -> Option<PropertyValue> {
    (edt.len() == 12).then(|| PropertyValue::ProductCode(nul_padded(edt)))
}

pub(super) fn serial_number(edt: &[u8]) -> Option<PropertyValue> {
    (edt.len() == 12).then(|| PropertyValue::SerialNumber(nul_padded(edt)))
}

pub(super) fn production_date(edt: &[u8]) -> Option<PropertyValue> {
    if edt.len() != 4 {
        return None;
    }
    date(edt).map(PropertyValue::ProductionDate)
}

fn power_saving(edt: &[u8]) -> Option<PropertyValue> {
    flag(edt, &[0x41], &[0x42]).map(PropertyValue::PowerSaving)
}

fn remote_control(edt: &[u8]) -> Option<PropertyValue> {
    flag(edt, &[0x41, 0x61], &[0x42, 0x62]).map(PropertyValue::RemoteControl)
}

fn current_time(edt: &[u8]) -> Option<PropertyValue> {
    match edt {
        [hour, minute] => Some(PropertyValue::CurrentTime(format!("{hour:02}:{minute:02}"))),
        _ => None,
    }
}

fn current_date(edt: &[u8]) -> Option<PropertyValue> {
    if edt.len() != 4 {
        return None;
    }
    date(edt).map(PropertyValue::CurrentDate)
}

fn power_limit(edt: &[u8]) -> Option<PropertyValue> {
    be_u16(edt).map(PropertyValue::PowerLimit)
}

fn hour_meter(edt: &[u8]) -> Option<PropertyValue> {
    let (&unit, time) = edt.split_first()?;
    let unit = match unit {
        0x41 => TimeUnit::Second,
        0x42 => TimeUnit::Minute,
        0x43 => TimeUnit::Hour,
        0x44 => TimeUnit::Day,
        _ => return None,
    };
    Some(PropertyValue::HourMeter {
        unit,
        time: be_u32(time)?,
    })
}

pub(super) fn announcement_map(edt: &[u8]) -> Option<PropertyValue> {
    property_map(edt).map(PropertyValue::AnnouncementPropertyMap)
}

pub(super) fn set_map(edt: &[u8]) -> Option<PropertyValue> {
    property_map(edt).map(PropertyValue::SetPropertyMap)
}

pub(super) fn get_map(edt: &[u8]) -> Option<PropertyValue> {
    property_map(edt).map(PropertyValue::GetPropertyMap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_map_list() {
        let map = property_map(&[0x03, 0xE7, 0x80, 0xD3]).unwrap();
        assert_eq!(map.codes(), &[0x80, 0xD3, 0xE7]);
        assert!(property_map(&[0x03, 0xE7, 0x80]).is_none());
    }

    #[test]
    fn test_property_map_bitmap() {
        let mut edt = [0u8; 17];
        edt[0] = 16;
        // byte 1 (i = 0): bit 0 -> 0x80, bit 7 -> 0xF0
        edt[1] = 0b1000_0001;
        // byte 8 (i = 7): bit 6 -> 0xE7
        edt[8] = 0b0100_0000;
        let map = property_map(&edt).unwrap();
        assert_eq!(map.codes(), &[0x80, 0xE7, 0xF0]);

        assert!(property_map(&edt[..16]).is_none());
    }

    #[test]
    fn test_zero_count_requires_bitmap() {
        assert!(property_map(&[0x00]).is_none());
        let mut edt = [0u8; 17];
        edt[2] = 0x01;
        assert_eq!(property_map(&edt).unwrap().codes(), &[0x81]);
    }

    #[test]
    fn test_text_fields() {
        let mut edt = *b"BP35C2\0\0\0\0\0\0";
        assert_eq!(product_code(&edt), Some(PropertyValue::ProductCode("BP35C2".into())));
        edt[11] = b'X';
        assert_eq!(serial_number(&edt[..11]), None);
        assert_eq!(standard_version(&[0, 0, b'j', 0]), Some(PropertyValue::StandardVersion("J".into())));
    }

    #[test]
    fn test_dates_and_flags() {
        assert_eq!(production_date(&[0x07, 0xE7, 3, 9]), Some(PropertyValue::ProductionDate("2023-03-09".into())));
        assert_eq!(current_time(&[7, 5]), Some(PropertyValue::CurrentTime("07:05".into())));
        assert_eq!(remote_control(&[0x61]), Some(PropertyValue::RemoteControl(true)));
        assert_eq!(operating_status(&[0x32]), None);
        assert_eq!(consumed_energy(&[0, 0, 0x03, 0xE8]), Some(PropertyValue::ConsumedEnergy(1.0)));
        assert_eq!(
            hour_meter(&[0x43, 0, 0, 0, 10]),
            Some(PropertyValue::HourMeter { unit: TimeUnit::Hour, time: 10 })
        );
        assert_eq!(hour_meter(&[0x45, 0, 0, 0, 10]), None);
    }
}

//! Low-voltage smart electric energy meter (class 0x0288)

use super::superclass::{be_u16, be_u32, date, single};
use super::{DecodeFn, EnergyLog1, EnergyLog2, EnergyPair, FixedTimeEnergy, Log2Point, PropertyValue};

pub(super) static TABLE: &[(u8, DecodeFn)] = &[
    (0xD3, coefficient),
    (0xD7, effective_digits),
    (0xE0, normal_energy),
    (0xE1, energy_unit),
    (0xE2, normal_log1),
    (0xE3, reverse_energy),
    (0xE4, reverse_log1),
    (0xE5, log1_day),
    (0xE7, instantaneous_power),
    (0xE8, instantaneous_current),
    (0xEA, normal_fixed_time),
    (0xEB, reverse_fixed_time),
    (0xEC, energy_log2),
    (0xED, log2_point),
];

const LOG1_LEN: usize = 2 + 48 * 4;

fn coefficient(edt: &[u8]) -> Option<PropertyValue> {
    be_u32(edt).map(PropertyValue::Coefficient)
}

fn effective_digits(edt: &[u8]) -> Option<PropertyValue> {
    single(edt).map(PropertyValue::EffectiveDigits)
}

fn normal_energy(edt: &[u8]) -> Option<PropertyValue> {
    be_u32(edt).map(PropertyValue::NormalDirectionEnergy)
}

fn reverse_energy(edt: &[u8]) -> Option<PropertyValue> {
    be_u32(edt).map(PropertyValue::ReverseDirectionEnergy)
}

/// kWh represented by one unit of a raw cumulative reading
fn unit_multiplier(code: u8) -> Option<f64> {
    Some(match code {
        0x00 => 1.0,
        0x01 => 0.1,
        0x02 => 0.01,
        0x03 => 0.001,
        0x04 => 0.0001,
        0x0A => 10.0,
        0x0B => 100.0,
        0x0C => 1000.0,
        0x0D => 10000.0,
        _ => return None,
    })
}

fn energy_unit(edt: &[u8]) -> Option<PropertyValue> {
    single(edt).and_then(unit_multiplier).map(PropertyValue::EnergyUnit)
}

fn log1(edt: &[u8]) -> Option<EnergyLog1> {
    if edt.len() != LOG1_LEN {
        return None;
    }
    let day = be_u16(&edt[..2])?;
    let readings = edt[2..].chunks_exact(4).filter_map(be_u32).collect();
    Some(EnergyLog1 { day, readings })
}

fn normal_log1(edt: &[u8]) -> Option<PropertyValue> {
    log1(edt).map(PropertyValue::NormalDirectionLog1)
}

fn reverse_log1(edt: &[u8]) -> Option<PropertyValue> {
    log1(edt).map(PropertyValue::ReverseDirectionLog1)
}

fn log1_day(edt: &[u8]) -> Option<PropertyValue> {
    single(edt).map(PropertyValue::Log1Day)
}

fn instantaneous_power(edt: &[u8]) -> Option<PropertyValue> {
    let raw: [u8; 4] = edt.try_into().ok()?;
    Some(PropertyValue::InstantaneousPower(i32::from_be_bytes(raw)))
}

fn instantaneous_current(edt: &[u8]) -> Option<PropertyValue> {
    match edt {
        [r0, r1, t0, t1] => Some(PropertyValue::InstantaneousCurrent {
            r_phase: i16::from_be_bytes([*r0, *r1]),
            t_phase: i16::from_be_bytes([*t0, *t1]),
        }),
        _ => None,
    }
}

fn fixed_time(edt: &[u8]) -> Option<FixedTimeEnergy> {
    if edt.len() != 11 {
        return None;
    }
    let (hour, minute, second) = (edt[4], edt[5], edt[6]);
    Some(FixedTimeEnergy {
        date_time: format!("{}T{hour:02}:{minute:02}:{second:02}", date(edt)?),
        reading: be_u32(&edt[7..])?,
    })
}

fn normal_fixed_time(edt: &[u8]) -> Option<PropertyValue> {
    fixed_time(edt).map(PropertyValue::NormalDirectionFixedTime)
}

fn reverse_fixed_time(edt: &[u8]) -> Option<PropertyValue> {
    fixed_time(edt).map(PropertyValue::ReverseDirectionFixedTime)
}

fn log2_header(edt: &[u8]) -> Option<(String, u8)> {
    let (hour, minute, segments) = (*edt.get(4)?, *edt.get(5)?, *edt.get(6)?);
    Some((format!("{}T{hour:02}:{minute:02}", date(edt)?), segments))
}

fn energy_log2(edt: &[u8]) -> Option<PropertyValue> {
    if !(7..=103).contains(&edt.len()) || (edt.len() - 7) % 8 != 0 {
        return None;
    }
    let (date_time, segments) = log2_header(edt)?;
    let readings = if segments == 0 {
        Vec::new()
    } else {
        edt[7..]
            .chunks_exact(8)
            .filter_map(|pair| {
                Some(EnergyPair {
                    normal: be_u32(&pair[..4])?,
                    reverse: be_u32(&pair[4..])?,
                })
            })
            .collect()
    };
    Some(PropertyValue::EnergyLog2(EnergyLog2 {
        date_time,
        segments,
        readings,
    }))
}

fn log2_point(edt: &[u8]) -> Option<PropertyValue> {
    if edt.len() != 7 {
        return None;
    }
    let (date_time, segments) = log2_header(edt)?;
    Some(PropertyValue::Log2Point(Log2Point { date_time, segments }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_codes() {
        assert_eq!(energy_unit(&[0x01]), Some(PropertyValue::EnergyUnit(0.1)));
        assert_eq!(energy_unit(&[0x0D]), Some(PropertyValue::EnergyUnit(10000.0)));
        assert_eq!(energy_unit(&[0x05]), None);
    }

    #[test]
    fn test_instantaneous_values() {
        assert_eq!(instantaneous_power(&[0xFF, 0xFF, 0xFF, 0x9C]), Some(PropertyValue::InstantaneousPower(-100)));
        assert_eq!(
            instantaneous_current(&[0x00, 0x1E, 0x7F, 0xFE]),
            Some(PropertyValue::InstantaneousCurrent { r_phase: 30, t_phase: 0x7FFE })
        );
        assert_eq!(instantaneous_current(&[0x00, 0x1E]), None);
    }

    #[test]
    fn test_log1() {
        let mut edt = vec![0x00, 0x01];
        for i in 0..48u32 {
            edt.extend_from_slice(&(1000 + i).to_be_bytes());
        }
        let Some(PropertyValue::NormalDirectionLog1(log)) = normal_log1(&edt) else {
            panic!("log 1 not decoded");
        };
        assert_eq!(log.day, 1);
        assert_eq!(log.readings.len(), 48);
        assert_eq!(log.readings[47], 1047);
        assert_eq!(reverse_log1(&edt[..100]), None);
    }

    #[test]
    fn test_fixed_time() {
        let edt = [0x07, 0xE7, 0x0B, 0x05, 0x0D, 0x1E, 0x00, 0x00, 0x00, 0x30, 0x39];
        assert_eq!(
            normal_fixed_time(&edt),
            Some(PropertyValue::NormalDirectionFixedTime(FixedTimeEnergy {
                date_time: "2023-11-05T13:30:00".into(),
                reading: 12345,
            }))
        );
    }

    #[test]
    fn test_log2() {
        let mut edt = vec![0x07, 0xE7, 0x0B, 0x05, 0x0D, 0x00, 0x02];
        edt.extend_from_slice(&[0, 0, 0, 10, 0, 0, 0, 1, 0, 0, 0, 9, 0, 0, 0, 1]);
        let Some(PropertyValue::EnergyLog2(log)) = energy_log2(&edt) else {
            panic!("log 2 not decoded");
        };
        assert_eq!(log.date_time, "2023-11-05T13:00");
        assert_eq!(log.segments, 2);
        assert_eq!(log.readings[1], EnergyPair { normal: 9, reverse: 1 });

        assert_eq!(energy_log2(&edt[..10]), None);
        assert_eq!(
            log2_point(&edt[..7]),
            Some(PropertyValue::Log2Point(Log2Point {
                date_time: "2023-11-05T13:00".into(),
                segments: 2,
            }))
        );
    }
}

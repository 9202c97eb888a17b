//! Node profile (class 0x0EF0)

use super::superclass::{
    announcement_map, be_u16, business_facility, fault_description, fault_status, get_map, manufacturer,
    operating_status, product_code, production_date, serial_number, set_map, upper_hex,
};
use super::{ClassList, DecodeFn, InstanceList, PropertyValue};
use crate::core::echonet::packet::EchonetObject;

pub(super) static TABLE: &[(u8, DecodeFn)] = &[
    (0x80, operating_status),
    (0x82, version),
    (0x83, identification),
    (0x88, fault_status),
    (0x89, fault_description),
    (0x8A, manufacturer),
    (0x8B, business_facility),
    (0x8C, product_code),
    (0x8D, serial_number),
    (0x8E, production_date),
    (0x9D, announcement_map),
    (0x9E, set_map),
    (0x9F, get_map),
    (0xBF, unique_id),
    (0xD3, instance_count),
    (0xD4, class_count),
    (0xD5, instance_list_notification),
    (0xD6, instance_list),
    (0xD7, class_list),
];

fn version(edt: &[u8]) -> Option<PropertyValue> {
    match edt {
        [major, minor, _, _] => Some(PropertyValue::Version(format!("{major}.{minor}"))),
        _ => None,
    }
}

fn identification(edt: &[u8]) -> Option<PropertyValue> {
    (edt.len() == 17).then(|| PropertyValue::Identification(upper_hex(edt)))
}

fn unique_id(edt: &[u8]) -> Option<PropertyValue> {
    (edt.len() == 2).then(|| PropertyValue::UniqueId(upper_hex(edt)))
}

fn instance_count(edt: &[u8]) -> Option<PropertyValue> {
    match edt {
        [a, b, c] => Some(PropertyValue::SelfNodeInstances(u32::from_be_bytes([0, *a, *b, *c]))),
        _ => None,
    }
}

fn class_count(edt: &[u8]) -> Option<PropertyValue> {
    be_u16(edt).map(PropertyValue::SelfNodeClasses)
}

fn instances(edt: &[u8]) -> Option<InstanceList> {
    let (&count, rest) = edt.split_first()?;
    if edt.len() > 253 || rest.len() % 3 != 0 {
        return None;
    }
    let instances = rest
        .chunks_exact(3)
        .map(|eoj| EchonetObject::new(eoj[0], eoj[1], eoj[2]))
        .collect();
    Some(InstanceList { count, instances })
}

fn instance_list_notification(edt: &[u8]) -> Option<PropertyValue> {
    instances(edt).map(PropertyValue::InstanceListNotification)
}

fn instance_list(edt: &[u8]) -> Option<PropertyValue> {
    instances(edt).map(PropertyValue::SelfNodeInstanceList)
}

fn class_list(edt: &[u8]) -> Option<PropertyValue> {
    let (&count, rest) = edt.split_first()?;
    if edt.len() > 17 || rest.len() % 2 != 0 {
        return None;
    }
    let classes = rest.chunks_exact(2).map(upper_hex).collect();
    Some(PropertyValue::SelfNodeClassList(ClassList { count, classes }))
}

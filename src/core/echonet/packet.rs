//! ECHONET Lite frame layout
//!
//! ```text
//! EHD(2) TID(2) SEOJ(3) DEOJ(3) ESV(1) OPC(1) { EPC(1) PDC(1) EDT(PDC) } * OPC
//! ```

use super::decoder::{PropertyDecoder, PropertyValue};
use super::CodecError;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Fixed ECHONET Lite header (EHD1, EHD2)
pub const ECHONET_HEADER: [u8; 2] = [0x10, 0x81];

/// Shortest frame worth parsing: header plus one empty property
pub const MIN_PACKET_LEN: usize = 14;

/// Most properties one frame can carry
pub const MAX_PROPERTIES: usize = 255;

const DEFAULT_SEOJ: &str = "05FF01";
const DEFAULT_DEOJ: &str = "028801";
const DEFAULT_ESV: &str = "62";

/// ECHONET object code: class group, class, instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EchonetObject([u8; 3]);

impl EchonetObject {
    /// Controller, instance 1
    pub const CONTROLLER: Self = Self([0x05, 0xFF, 0x01]);
    /// Low-voltage smart electric energy meter, instance 1
    pub const SMART_METER: Self = Self([0x02, 0x88, 0x01]);
    /// Node profile, instance 1
    pub const NODE_PROFILE: Self = Self([0x0E, 0xF0, 0x01]);

    /// Create from its three bytes
    pub const fn new(class_group: u8, class: u8, instance: u8) -> Self {
        Self([class_group, class, instance])
    }

    /// Class group and class as one code, e.g. `0x0288`
    pub fn class_code(&self) -> u16 {
        u16::from_be_bytes([self.0[0], self.0[1]])
    }

    /// Instance number
    pub fn instance(&self) -> u8 {
        self.0[2]
    }

    /// Wire bytes
    pub fn as_bytes(&self) -> &[u8; 3] {
        &self.0
    }
}

impl fmt::Display for EchonetObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}{:02X}", self.0[0], self.0[1], self.0[2])
    }
}

impl FromStr for EchonetObject {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CodecError::InvalidObjectCode(s.to_string());
        if s.len() != 6 {
            return Err(invalid());
        }
        let bytes = hex::decode(s).map_err(|_| invalid())?;
        Ok(Self([bytes[0], bytes[1], bytes[2]]))
    }
}

impl Serialize for EchonetObject {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// ECHONET Lite service code (ESV)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceCode {
    /// 0x60 SetI
    SetI,
    /// 0x61 SetC
    SetC,
    /// 0x62 Get
    Get,
    /// 0x63 INF_REQ
    InfReq,
    /// 0x6E SetGet
    SetGet,
    /// 0x71 Set_Res
    SetRes,
    /// 0x72 Get_Res
    GetRes,
    /// 0x73 INF
    Inf,
    /// 0x74 INFC
    InfC,
    /// 0x7A INFC_Res
    InfCRes,
    /// 0x7E SetGet_Res
    SetGetRes,
    /// 0x50 SetI_SNA
    SetISna,
    /// 0x51 SetC_SNA
    SetCSna,
    /// 0x52 Get_SNA
    GetSna,
    /// 0x53 INF_SNA
    InfSna,
    /// 0x5E SetGet_SNA
    SetGetSna,
    /// Any other code
    Other(u8),
}

impl ServiceCode {
    /// Wire value
    pub fn code(self) -> u8 {
        match self {
            Self::SetI => 0x60,
            Self::SetC => 0x61,
            Self::Get => 0x62,
            Self::InfReq => 0x63,
            Self::SetGet => 0x6E,
            Self::SetRes => 0x71,
            Self::GetRes => 0x72,
            Self::Inf => 0x73,
            Self::InfC => 0x74,
            Self::InfCRes => 0x7A,
            Self::SetGetRes => 0x7E,
            Self::SetISna => 0x50,
            Self::SetCSna => 0x51,
            Self::GetSna => 0x52,
            Self::InfSna => 0x53,
            Self::SetGetSna => 0x5E,
            Self::Other(code) => code,
        }
    }

    /// Request codes (0x6X)
    pub fn is_request(self) -> bool {
        self.code() & 0xF0 == 0x60
    }

    /// Codes that answer a SetI/SetC/Get request
    pub fn is_reply(self) -> bool {
        matches!(
            self,
            Self::SetRes | Self::GetRes | Self::SetISna | Self::SetCSna | Self::GetSna
        )
    }
}

impl From<u8> for ServiceCode {
    fn from(code: u8) -> Self {
        match code {
            0x60 => Self::SetI,
            0x61 => Self::SetC,
            0x62 => Self::Get,
            0x63 => Self::InfReq,
            0x6E => Self::SetGet,
            0x71 => Self::SetRes,
            0x72 => Self::GetRes,
            0x73 => Self::Inf,
            0x74 => Self::InfC,
            0x7A => Self::InfCRes,
            0x7E => Self::SetGetRes,
            0x50 => Self::SetISna,
            0x51 => Self::SetCSna,
            0x52 => Self::GetSna,
            0x53 => Self::InfSna,
            0x5E => Self::SetGetSna,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for ServiceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}", self.code())
    }
}

impl Serialize for ServiceCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn serialize_epc<S: Serializer>(epc: &u8, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&format_args!("{epc:02X}"))
}

fn serialize_edt<S: Serializer>(edt: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode_upper(edt))
}

/// One property of a parsed packet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Property {
    /// Property code
    #[serde(serialize_with = "serialize_epc")]
    pub epc: u8,
    /// Raw property data
    #[serde(serialize_with = "serialize_edt")]
    pub edt: Vec<u8>,
    /// Decoded value, when a decoder recognised the data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<PropertyValue>,
}

/// Parsed ECHONET Lite packet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Packet {
    /// Transaction ID
    pub tid: u16,
    /// Source object
    pub seoj: EchonetObject,
    /// Destination object
    pub deoj: EchonetObject,
    /// Service code
    pub esv: ServiceCode,
    /// Properties in wire order
    #[serde(rename = "props")]
    pub properties: Vec<Property>,
}

impl Packet {
    /// Property count
    pub fn opc(&self) -> usize {
        self.properties.len()
    }

    /// First property with code `epc`
    pub fn property(&self, epc: u8) -> Option<&Property> {
        self.properties.iter().find(|p| p.epc == epc)
    }

    /// Decoded value of property `epc`
    pub fn value(&self, epc: u8) -> Option<&PropertyValue> {
        self.property(epc).and_then(|p| p.value.as_ref())
    }
}

/// Property data of a SetC request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyData {
    /// Hex text, e.g. `"01"`
    Hex(String),
    /// Raw bytes
    Bytes(Vec<u8>),
}

/// One property of a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyRequest {
    /// Property code as 2 hex digits
    pub epc: String,
    /// Data, required for SetC and ignored for Get
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edt: Option<PropertyData>,
}

impl PropertyRequest {
    /// Property without data (Get)
    pub fn new(epc: u8) -> Self {
        Self {
            epc: format!("{epc:02X}"),
            edt: None,
        }
    }

    /// Property with raw data (SetC)
    pub fn with_bytes(epc: u8, edt: Vec<u8>) -> Self {
        Self {
            epc: format!("{epc:02X}"),
            edt: Some(PropertyData::Bytes(edt)),
        }
    }

    /// Property with hex data (SetC)
    pub fn with_hex(epc: &str, edt: &str) -> Self {
        Self {
            epc: epc.to_string(),
            edt: Some(PropertyData::Hex(edt.to_string())),
        }
    }
}

/// Packet to compose. Unset object codes and service code take the
/// controller → smart meter Get defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PacketRequest {
    /// Transaction ID; the session assigns one when unset
    pub tid: Option<u32>,
    /// Source object, default `05FF01`
    pub seoj: Option<String>,
    /// Destination object, default `028801`
    pub deoj: Option<String>,
    /// `61` (SetC) or `62` (Get, default)
    pub esv: Option<String>,
    /// Properties, at least one
    #[serde(rename = "props")]
    pub properties: Vec<PropertyRequest>,
}

impl PacketRequest {
    /// Get request for `epcs`
    pub fn get(epcs: &[u8]) -> Self {
        Self {
            properties: epcs.iter().copied().map(PropertyRequest::new).collect(),
            ..Self::default()
        }
    }

    /// SetC request with one raw-data property
    pub fn set_c(epc: u8, edt: Vec<u8>) -> Self {
        Self {
            esv: Some("61".to_string()),
            properties: vec![PropertyRequest::with_bytes(epc, edt)],
            ..Self::default()
        }
    }

    /// Set transaction ID
    #[must_use]
    pub fn with_tid(mut self, tid: u32) -> Self {
        self.tid = Some(tid);
        self
    }

    /// Set source object
    #[must_use]
    pub fn with_seoj(mut self, seoj: impl Into<String>) -> Self {
        self.seoj = Some(seoj.into());
        self
    }

    /// Set destination object
    #[must_use]
    pub fn with_deoj(mut self, deoj: impl Into<String>) -> Self {
        self.deoj = Some(deoj.into());
        self
    }

    /// Set service code
    #[must_use]
    pub fn with_esv(mut self, esv: impl Into<String>) -> Self {
        self.esv = Some(esv.into());
        self
    }

    /// Append a property
    #[must_use]
    pub fn with_property(mut self, property: PropertyRequest) -> Self {
        self.properties.push(property);
        self
    }
}

fn parse_epc(epc: &str) -> Result<u8, CodecError> {
    if epc.len() != 2 {
        return Err(CodecError::InvalidProperty(format!("EPC {epc:?} is not 2 hex digits")));
    }
    u8::from_str_radix(epc, 16).map_err(|_| CodecError::InvalidProperty(format!("EPC {epc:?} is not 2 hex digits")))
}

fn set_data(epc: u8, edt: Option<&PropertyData>) -> Result<Vec<u8>, CodecError> {
    let data = match edt {
        None => return Err(CodecError::InvalidProperty(format!("EDT of {epc:02X} is required for SetC"))),
        Some(PropertyData::Hex(text)) => {
            if text.len() % 2 != 0 {
                return Err(CodecError::InvalidProperty(format!("EDT of {epc:02X} has odd length")));
            }
            hex::decode(text).map_err(|_| CodecError::InvalidProperty(format!("EDT of {epc:02X} is not hex")))?
        }
        Some(PropertyData::Bytes(bytes)) => bytes.clone(),
    };

    if data.is_empty() {
        return Err(CodecError::InvalidProperty(format!("EDT of {epc:02X} is empty")));
    }
    if data.len() > usize::from(u8::MAX) {
        return Err(CodecError::InvalidProperty(format!(
            "EDT of {epc:02X} is {} bytes, at most 255 allowed",
            data.len()
        )));
    }
    Ok(data)
}

/// Validate `request` and serialize it to wire bytes
pub fn compose(request: &PacketRequest) -> Result<Vec<u8>, CodecError> {
    let tid = request
        .tid
        .ok_or_else(|| CodecError::InvalidTransactionId("missing".to_string()))?;
    let tid = u16::try_from(tid).map_err(|_| CodecError::InvalidTransactionId(tid.to_string()))?;

    let seoj: EchonetObject = request.seoj.as_deref().unwrap_or(DEFAULT_SEOJ).parse()?;
    let deoj: EchonetObject = request.deoj.as_deref().unwrap_or(DEFAULT_DEOJ).parse()?;

    let esv = match request.esv.as_deref().unwrap_or(DEFAULT_ESV) {
        "61" => ServiceCode::SetC,
        "62" => ServiceCode::Get,
        other => return Err(CodecError::InvalidServiceCode(other.to_string())),
    };

    if request.properties.is_empty() {
        return Err(CodecError::InvalidProperty("at least one property is required".to_string()));
    }
    let opc = u8::try_from(request.properties.len()).map_err(|_| {
        CodecError::InvalidProperty(format!(
            "{} properties, at most {MAX_PROPERTIES} allowed",
            request.properties.len()
        ))
    })?;

    let mut buf = Vec::with_capacity(12 + request.properties.len() * 2);
    buf.extend_from_slice(&ECHONET_HEADER);
    buf.extend_from_slice(&tid.to_be_bytes());
    buf.extend_from_slice(seoj.as_bytes());
    buf.extend_from_slice(deoj.as_bytes());
    buf.push(esv.code());
    buf.push(opc);

    for property in &request.properties {
        let epc = parse_epc(&property.epc)?;
        buf.push(epc);
        if esv == ServiceCode::SetC {
            let data = set_data(epc, property.edt.as_ref())?;
            // set_data caps the length at 255
            buf.push(data.len() as u8);
            buf.extend_from_slice(&data);
        } else {
            buf.push(0);
        }
    }

    Ok(buf)
}

/// Parse a frame.
///
/// Returns `Ok(None)` for frames that are not ECHONET Lite (too short, wrong
/// header) and for SetGet/SetGet_Res, which are not handled. A property list
/// running past the end of the buffer is [`CodecError::MalformedPacket`].
pub fn parse(bytes: &[u8], decoder: &dyn PropertyDecoder) -> Result<Option<Packet>, CodecError> {
    if bytes.len() < MIN_PACKET_LEN || bytes[..2] != ECHONET_HEADER {
        return Ok(None);
    }

    let tid = u16::from_be_bytes([bytes[2], bytes[3]]);
    let seoj = EchonetObject([bytes[4], bytes[5], bytes[6]]);
    let deoj = EchonetObject([bytes[7], bytes[8], bytes[9]]);
    let esv = ServiceCode::from(bytes[10]);
    if matches!(esv, ServiceCode::SetGet | ServiceCode::SetGetRes) {
        return Ok(None);
    }
    let opc = bytes[11];

    // Properties belong to the destination of a request and to the source of a reply
    let class = if esv.is_request() { deoj } else { seoj }.class_code();

    let mut properties = Vec::with_capacity(usize::from(opc));
    let mut offset = 12;
    for index in 0..opc {
        let Some(&[epc, pdc]) = bytes.get(offset..offset + 2) else {
            return Err(CodecError::MalformedPacket(format!(
                "property {index} header at offset {offset} exceeds {} bytes",
                bytes.len()
            )));
        };
        let start = offset + 2;
        let end = start + usize::from(pdc);
        let Some(edt) = bytes.get(start..end) else {
            return Err(CodecError::MalformedPacket(format!(
                "property {epc:02X} needs {pdc} bytes at offset {start}, packet has {}",
                bytes.len()
            )));
        };

        properties.push(Property {
            epc,
            edt: edt.to_vec(),
            value: decoder.decode(class, epc, edt),
        });
        offset = end;
    }

    Ok(Some(Packet {
        tid,
        seoj,
        deoj,
        esv,
        properties,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::echonet::decoder::{MockPropertyDecoder, StandardDecoders};

    #[test]
    fn test_compose_default_get() {
        let request = PacketRequest::get(&[0xE7]).with_tid(1);
        let bytes = compose(&request).unwrap();
        assert_eq!(hex::encode_upper(&bytes), "1081000105FF010288016201E700");

        let packet = parse(&bytes, &StandardDecoders).unwrap().unwrap();
        assert_eq!(packet.tid, 1);
        assert_eq!(packet.seoj.to_string(), "05FF01");
        assert_eq!(packet.deoj, EchonetObject::SMART_METER);
        assert_eq!(packet.esv.to_string(), "62");
        assert_eq!(packet.opc(), 1);
        assert_eq!(packet.properties[0].epc, 0xE7);
        assert!(packet.properties[0].edt.is_empty());
        assert!(packet.properties[0].value.is_none());
    }

    #[test]
    fn test_compose_set_c_hex_and_bytes() {
        let request = PacketRequest::default()
            .with_tid(0xFFFF)
            .with_esv("61")
            .with_property(PropertyRequest::with_hex("e5", "01"))
            .with_property(PropertyRequest::with_bytes(0xED, vec![0x07, 0xE7, 0x0B, 0x05, 0x0D, 0x00, 0x02]));
        let bytes = compose(&request).unwrap();
        assert_eq!(&bytes[2..4], &[0xFF, 0xFF]);
        assert_eq!(bytes[10], 0x61);
        assert_eq!(bytes[11], 2);
        assert_eq!(&bytes[12..15], &[0xE5, 0x01, 0x01]);

        let packet = parse(&bytes, &StandardDecoders).unwrap().unwrap();
        assert_eq!(packet.property(0xED).unwrap().edt.len(), 7);
    }

    #[test]
    fn test_compose_rejections() {
        let get = PacketRequest::get(&[0xE7]);
        assert!(matches!(compose(&get), Err(CodecError::InvalidTransactionId(_))));
        assert!(matches!(
            compose(&get.clone().with_tid(0x1_0000)),
            Err(CodecError::InvalidTransactionId(_))
        ));
        assert!(matches!(
            compose(&get.clone().with_tid(1).with_seoj("05FF0")),
            Err(CodecError::InvalidObjectCode(_))
        ));
        assert!(matches!(
            compose(&get.clone().with_tid(1).with_deoj("02880G")),
            Err(CodecError::InvalidObjectCode(_))
        ));
        assert!(matches!(
            compose(&get.clone().with_tid(1).with_esv("60")),
            Err(CodecError::InvalidServiceCode(_))
        ));
        assert!(matches!(
            compose(&PacketRequest::default().with_tid(1)),
            Err(CodecError::InvalidProperty(_))
        ));
        assert!(matches!(
            compose(&PacketRequest::get(&[0xE7]).with_tid(1).with_property(PropertyRequest {
                epc: "E".into(),
                edt: None,
            })),
            Err(CodecError::InvalidProperty(_))
        ));
    }

    #[test]
    fn test_set_c_data_rules() {
        let set = |edt: Option<PropertyData>| {
            compose(&PacketRequest::default().with_tid(1).with_esv("61").with_property(PropertyRequest {
                epc: "E5".into(),
                edt,
            }))
        };
        assert!(matches!(set(None), Err(CodecError::InvalidProperty(_))));
        assert!(matches!(set(Some(PropertyData::Hex(String::new()))), Err(CodecError::InvalidProperty(_))));
        assert!(matches!(set(Some(PropertyData::Hex("0".into()))), Err(CodecError::InvalidProperty(_))));
        assert!(matches!(set(Some(PropertyData::Hex("0Z".into()))), Err(CodecError::InvalidProperty(_))));
        assert!(matches!(set(Some(PropertyData::Bytes(Vec::new()))), Err(CodecError::InvalidProperty(_))));
        assert!(matches!(set(Some(PropertyData::Bytes(vec![0; 256]))), Err(CodecError::InvalidProperty(_))));
        assert!(set(Some(PropertyData::Bytes(vec![0; 255]))).is_ok());
    }

    #[test]
    fn test_property_count_cap() {
        let epcs: Vec<u8> = (0..=255).collect();
        let request = PacketRequest::get(&epcs).with_property(PropertyRequest::new(0x80)).with_tid(1);
        assert_eq!(request.properties.len(), 257);
        assert!(matches!(compose(&request), Err(CodecError::InvalidProperty(_))));
        assert!(compose(&PacketRequest::get(&epcs[..255]).with_tid(1)).is_ok());
    }

    #[test]
    fn test_parse_ignores_non_echonet() {
        let decoder = StandardDecoders;
        assert_eq!(parse(&[], &decoder).unwrap(), None);
        assert_eq!(parse(&hex::decode("1081000105FF010288016201E7").unwrap(), &decoder).unwrap(), None);
        assert_eq!(parse(&hex::decode("1082000105FF010288016201E700").unwrap(), &decoder).unwrap(), None);
        assert_eq!(parse(&hex::decode("1081000105FF010288016E01E700").unwrap(), &decoder).unwrap(), None);
        assert_eq!(parse(&hex::decode("1081000102880105FF017E01E700").unwrap(), &decoder).unwrap(), None);
    }

    #[test]
    fn test_parse_truncated_property() {
        // PDC says 4 bytes, only 2 present
        let bytes = hex::decode("1081000102880105FF017201E7040000").unwrap();
        assert!(matches!(parse(&bytes, &StandardDecoders), Err(CodecError::MalformedPacket(_))));

        // Second property header missing
        let bytes = hex::decode("1081000102880105FF017202E70400000001").unwrap();
        assert!(matches!(parse(&bytes, &StandardDecoders), Err(CodecError::MalformedPacket(_))));
    }

    #[test]
    fn test_reply_is_decoded_with_source_class() {
        let bytes = hex::decode("1081000102880105FF017201E704000001F4").unwrap();
        let mut decoder = MockPropertyDecoder::new();
        decoder
            .expect_decode()
            .withf(|class, epc, edt| *class == 0x0288 && *epc == 0xE7 && edt.to_vec() == [0x00u8, 0x00, 0x01, 0xF4])
            .times(1)
            .returning(|_, _, _| Some(PropertyValue::InstantaneousPower(500)));

        let packet = parse(&bytes, &decoder).unwrap().unwrap();
        assert_eq!(packet.esv, ServiceCode::GetRes);
        assert_eq!(packet.value(0xE7), Some(&PropertyValue::InstantaneousPower(500)));
    }

    #[test]
    fn test_request_is_decoded_with_destination_class() {
        let bytes = hex::decode("1081000205FF010EF0016201D600").unwrap();
        let mut decoder = MockPropertyDecoder::new();
        decoder
            .expect_decode()
            .withf(|class, epc, _| *class == 0x0EF0 && *epc == 0xD6)
            .times(1)
            .returning(|_, _, _| None);
        let packet = parse(&bytes, &decoder).unwrap().unwrap();
        assert_eq!(packet.deoj, EchonetObject::NODE_PROFILE);
    }

    #[test]
    fn test_service_codes() {
        for code in [0x71u8, 0x72, 0x50, 0x51, 0x52] {
            assert!(ServiceCode::from(code).is_reply(), "{code:02X}");
        }
        assert!(!ServiceCode::Inf.is_reply());
        assert!(ServiceCode::from(0x6F).is_request());
        assert_eq!(ServiceCode::from(0x99), ServiceCode::Other(0x99));
        assert_eq!(ServiceCode::Other(0x99).code(), 0x99);
    }

    #[test]
    fn test_packet_json() {
        let bytes = hex::decode("1081000102880105FF017201E704000001F4").unwrap();
        let packet = parse(&bytes, &StandardDecoders).unwrap().unwrap();
        let json = serde_json::to_value(&packet).unwrap();
        assert_eq!(json["seoj"], "028801");
        assert_eq!(json["esv"], "72");
        assert_eq!(json["props"][0]["epc"], "E7");
        assert_eq!(json["props"][0]["edt"], "000001F4");
        assert_eq!(json["props"][0]["value"]["instantaneousPower"], 500);
    }

    #[test]
    fn test_request_deserializes_from_json() {
        let request: PacketRequest =
            serde_json::from_str(r#"{"tid": 3, "esv": "61", "props": [{"epc": "E5", "edt": "01"}]}"#).unwrap();
        assert_eq!(request.properties[0].edt, Some(PropertyData::Hex("01".into())));
        assert_eq!(compose(&request).unwrap()[12..], [0xE5, 0x01, 0x01]);
    }
}

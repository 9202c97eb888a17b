//! Simulated Wi-SUN dongle and smart meter
//!
//! [`DongleSimulator`] is an in-process [`LineChannel`] that answers the
//! SKSTACK command set and plays a low-voltage smart electric energy meter
//! behind it. Replies are published synchronously from `write`, so tests
//! running on a paused clock never wait on real time.
//!
//! Failure modes (missed scans, failed joins, rejected sends, dropped
//! replies) are scripted through [`SimulatorConfig`]; a [`SimulatorHandle`]
//! injects lines and inspects what the host wrote after the simulator has
//! been handed to an adapter.

use crate::core::echonet::{parse, EchonetObject, ServiceCode, StandardDecoders, ECHONET_HEADER};
use crate::core::transport::{ChannelEvent, ChannelStats, LineChannel, TransportError, EVENT_CAPACITY};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Layout of simulated `ERXUDP` payloads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// Raw bytes after a `side` column (BP35C2)
    #[default]
    Binary,
    /// Hex text without a `side` column (RL7023)
    Hex,
}

/// Simulated dongle and meter behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Firmware version reported by `SKVER`
    pub version: String,
    /// Dongle MAC
    pub dongle_mac: String,
    /// Meter MAC
    pub meter_mac: String,
    /// Logical channel of the meter's PAN
    pub channel: u8,
    /// Channel page
    pub channel_page: u8,
    /// PAN ID
    pub pan_id: u16,
    /// Pairing ID
    pub pairing_id: String,
    /// Leading scans that end without a descriptor
    pub scan_misses: usize,
    /// Never answer `SKSCAN`
    pub silent_scans: bool,
    /// Leading PANA attempts that fail
    pub join_failures: usize,
    /// Never answer `SKJOIN`
    pub silent_joins: bool,
    /// Send statuses for the leading `SKSENDTO`s, `00` afterwards
    pub send_statuses: Vec<u8>,
    /// Leading `SKSENDTO`s without an `EVENT 21`
    pub dropped_confirmations: usize,
    /// Leading meter requests left unanswered
    pub dropped_replies: usize,
    /// Command keywords answered with `FAIL ER04`
    pub rejected_commands: Vec<String>,
    /// Refuse to open
    pub fail_open: bool,
    /// Echo commands back like the real firmware
    pub echo: bool,
    /// `ERXUDP` layout
    pub payload_format: PayloadFormat,
    /// Meter object properties overriding the built-in ones
    pub meter_properties: BTreeMap<u8, Vec<u8>>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            version: "1.2.10".to_string(),
            dongle_mac: "001D129100000574".to_string(),
            meter_mac: "001C6400030C12A4".to_string(),
            channel: 0x21,
            channel_page: 0x09,
            pan_id: 0x8888,
            pairing_id: "00AB1234".to_string(),
            scan_misses: 0,
            silent_scans: false,
            join_failures: 0,
            silent_joins: false,
            send_statuses: Vec::new(),
            dropped_confirmations: 0,
            dropped_replies: 0,
            rejected_commands: Vec::new(),
            fail_open: false,
            echo: true,
            payload_format: PayloadFormat::Binary,
            meter_properties: BTreeMap::new(),
        }
    }
}

/// Link-local address of an EUI-64 MAC (universal/local bit flipped)
pub fn link_local_address(mac: &str) -> Option<String> {
    let mut bytes = hex::decode(mac).ok()?;
    if bytes.len() != 8 {
        return None;
    }
    bytes[0] ^= 0x02;
    let groups: Vec<String> = bytes.chunks(2).map(hex::encode_upper).collect();
    Some(format!("FE80:0000:0000:0000:{}", groups.join(":")))
}

/// Encode a property map the way a device reports it
pub fn encode_property_map(codes: &[u8]) -> Vec<u8> {
    // count < 16 fits the list form, larger maps need the bitmap
    let count = u8::try_from(codes.len()).unwrap_or(u8::MAX);
    if codes.len() < 16 {
        let mut edt = vec![count];
        edt.extend_from_slice(codes);
        return edt;
    }
    let mut edt = vec![0u8; 17];
    edt[0] = count;
    for &code in codes.iter().filter(|&&c| c >= 0x80) {
        let row = usize::from(code & 0x0F);
        let bit = (code >> 4) - 8;
        edt[row + 1] |= 1 << bit;
    }
    edt
}

fn meter_defaults() -> BTreeMap<u8, Vec<u8>> {
    let mut identification = vec![0xFE, 0x00, 0x00, 0x16];
    identification.extend_from_slice(&[0x11; 13]);
    let mut product = b"ROUTEB-SIM".to_vec();
    product.resize(12, 0);
    let mut serial = b"S20G7300001".to_vec();
    serial.resize(12, 0);

    let mut props = BTreeMap::from([
        (0x80, vec![0x30]),
        (0x81, vec![0x00]),
        (0x82, vec![0x00, 0x00, b'J', 0x00]),
        (0x83, identification),
        (0x88, vec![0x42]),
        (0x8A, vec![0x00, 0x00, 0x16]),
        (0x8C, product),
        (0x8D, serial),
        (0x97, vec![0x0D, 0x1E]),
        (0x98, vec![0x07, 0xE7, 0x0B, 0x05]),
        (0xD3, vec![0x00, 0x00, 0x00, 0x01]),
        (0xD7, vec![0x06]),
        (0xE0, 12_345u32.to_be_bytes().to_vec()),
        (0xE1, vec![0x01]),
        (0xE3, 678u32.to_be_bytes().to_vec()),
        (0xE5, vec![0x00]),
        (0xE7, 500i32.to_be_bytes().to_vec()),
        (0xE8, vec![0x00, 0x1E, 0x00, 0x0A]),
        (0xEA, vec![0x07, 0xE7, 0x0B, 0x05, 0x0D, 0x00, 0x00, 0x00, 0x00, 0x30, 0x39]),
        (0xEB, vec![0x07, 0xE7, 0x0B, 0x05, 0x0D, 0x00, 0x00, 0x00, 0x00, 0x02, 0xA6]),
        (0xED, vec![0x07, 0xE7, 0x0B, 0x05, 0x0D, 0x00, 0x01]),
    ]);
    // History 1 and 2 are derived from E5/ED on every Get
    props.insert(0xE2, Vec::new());
    props.insert(0xE4, Vec::new());
    props.insert(0xEC, Vec::new());

    let mut codes: Vec<u8> = props.keys().copied().collect();
    codes.extend([0x9D, 0x9E, 0x9F]);
    codes.sort_unstable();
    props.insert(0x9D, encode_property_map(&[0x80, 0x81, 0x88, 0xEA, 0xEB]));
    props.insert(0x9E, encode_property_map(&[0x81, 0x97, 0x98, 0xE5, 0xED]));
    props.insert(0x9F, encode_property_map(&codes));
    props
}

fn node_profile_defaults() -> BTreeMap<u8, Vec<u8>> {
    let mut identification = vec![0xFE, 0x00, 0x00, 0x16];
    identification.extend_from_slice(&[0x22; 13]);
    BTreeMap::from([
        (0x80, vec![0x30]),
        (0x82, vec![0x01, 0x0D, 0x01, 0x00]),
        (0x83, identification),
        (0x8A, vec![0x00, 0x00, 0x16]),
        (0x9F, encode_property_map(&[0x80, 0x82, 0x83, 0x8A, 0x9F, 0xD3, 0xD4, 0xD6, 0xD7])),
        (0xD3, vec![0x00, 0x00, 0x01]),
        (0xD4, vec![0x00, 0x02]),
        (0xD5, vec![0x01, 0x02, 0x88, 0x01]),
        (0xD6, vec![0x01, 0x02, 0x88, 0x01]),
        (0xD7, vec![0x01, 0x02, 0x88]),
    ])
}

fn counter_value(day: u8, slot: u32) -> u32 {
    12_000 + u32::from(day) * 100 + slot
}

struct SimState {
    config: SimulatorConfig,
    open: bool,
    written: Vec<Bytes>,
    sent_payloads: Vec<Vec<u8>>,
    scans: usize,
    joins: usize,
    sends: usize,
    requests: usize,
    meter: BTreeMap<u8, Vec<u8>>,
    node_profile: BTreeMap<u8, Vec<u8>>,
    stats: ChannelStats,
}

impl SimState {
    fn new(config: SimulatorConfig) -> Self {
        let mut meter = meter_defaults();
        meter.extend(config.meter_properties.clone());
        Self {
            config,
            open: false,
            written: Vec::new(),
            sent_payloads: Vec::new(),
            scans: 0,
            joins: 0,
            sends: 0,
            requests: 0,
            meter,
            node_profile: node_profile_defaults(),
            stats: ChannelStats::default(),
        }
    }

    fn dongle_addr(&self) -> String {
        link_local_address(&self.config.dongle_mac).unwrap_or_default()
    }

    fn meter_addr(&self) -> String {
        link_local_address(&self.config.meter_mac).unwrap_or_default()
    }

    fn rejects(&self, keyword: &str) -> bool {
        self.config.rejected_commands.iter().any(|k| k == keyword)
    }

    fn control_reply(&self, keyword: &str) -> String {
        if self.rejects(keyword) {
            "FAIL ER04".to_string()
        } else {
            "OK".to_string()
        }
    }

    fn answer_command(&mut self, line: &str) -> Vec<String> {
        let mut out = Vec::new();
        if self.config.echo {
            out.push(line.to_string());
        }

        let mut cols = line.split_ascii_whitespace();
        let keyword = cols.next().unwrap_or_default();
        match keyword {
            "SKVER" if self.rejects(keyword) => out.push("FAIL ER04".into()),
            "SKVER" => out.push(format!("EVER {}", self.config.version)),
            "SKINFO" => out.push(format!(
                "EINFO {} {} {:02X} {:04X} FFFE",
                self.dongle_addr(),
                self.config.dongle_mac,
                self.config.channel,
                self.config.pan_id
            )),
            "SKSETPWD" | "SKSETRBID" | "SKSREG" => out.push(self.control_reply(keyword)),
            "SKSCAN" => {
                let attempt = self.scans;
                self.scans += 1;
                if self.config.silent_scans {
                    return out;
                }
                out.push("OK".into());
                if attempt >= self.config.scan_misses {
                    out.push(format!("EVENT 20 {}", self.meter_addr()));
                    out.push("EPANDESC".into());
                    out.push(format!("  Channel:{:02X}", self.config.channel));
                    out.push(format!("  Channel Page:{:02X}", self.config.channel_page));
                    out.push(format!("  Pan ID:{:04X}", self.config.pan_id));
                    out.push(format!("  Addr:{}", self.config.meter_mac));
                    out.push("  LQI:E1".into());
                    out.push(format!("  PairID:{}", self.config.pairing_id));
                }
                out.push(format!("EVENT 22 {}", self.dongle_addr()));
            }
            "SKLL64" => out.push(cols.next().and_then(link_local_address).unwrap_or_else(|| "FAIL ER06".into())),
            "SKJOIN" => {
                let attempt = self.joins;
                self.joins += 1;
                if self.config.silent_joins {
                    return out;
                }
                out.push("OK".into());
                let addr = cols.next().unwrap_or_default();
                let code = if attempt < self.config.join_failures { 24 } else { 25 };
                out.push(format!("EVENT {code} {addr} 02"));
            }
            _ => out.push("FAIL ER04".into()),
        }
        out
    }

    fn answer_sendto(&mut self, header: &str, payload: &[u8]) -> Vec<Bytes> {
        let mut out = Vec::new();
        if self.config.echo {
            out.push(Bytes::from(header.trim_end().to_string()));
        }
        self.sent_payloads.push(payload.to_vec());

        let index = self.sends;
        self.sends += 1;
        let status = self.config.send_statuses.get(index).copied().unwrap_or(0);
        if index >= self.config.dropped_confirmations {
            out.push(Bytes::from(format!("EVENT 21 {} 02 {status:02X}", self.meter_addr())));
        }
        if status != 0 {
            return out;
        }

        if let Some(reply) = self.meter_reply(payload) {
            out.push(self.erxudp(&reply));
        }
        out
    }

    fn erxudp(&self, payload: &[u8]) -> Bytes {
        let (sender, dest) = (self.meter_addr(), self.dongle_addr());
        let mac = &self.config.meter_mac;
        match self.config.payload_format {
            PayloadFormat::Binary => {
                let mut line =
                    format!("ERXUDP {sender} {dest} 0E1A 0E1A {mac} 1 0 {:04X} ", payload.len()).into_bytes();
                line.extend_from_slice(payload);
                Bytes::from(line)
            }
            PayloadFormat::Hex => Bytes::from(format!(
                "ERXUDP {sender} {dest} 0E1A 0E1A {mac} 1 {:04X} {}",
                payload.len(),
                hex::encode_upper(payload)
            )),
        }
    }

    fn property(&self, object: EchonetObject, epc: u8) -> Option<Vec<u8>> {
        match object.class_code() {
            0x0288 => {
                let stored = self.meter.get(&epc)?;
                Some(match epc {
                    0xE2 | 0xE4 => self.log1(epc),
                    0xEC => self.log2(),
                    _ => stored.clone(),
                })
            }
            0x0EF0 => self.node_profile.get(&epc).cloned(),
            _ => None,
        }
    }

    fn log1(&self, epc: u8) -> Vec<u8> {
        let day = self.meter.get(&0xE5).and_then(|d| d.first().copied()).unwrap_or(0);
        let mut edt = u16::from(day).to_be_bytes().to_vec();
        for slot in 0..48 {
            let value = if epc == 0xE4 { slot } else { counter_value(day, slot) };
            edt.extend_from_slice(&value.to_be_bytes());
        }
        edt
    }

    fn log2(&self) -> Vec<u8> {
        let mut edt = self.meter.get(&0xED).cloned().unwrap_or_default();
        edt.resize(7, 0);
        for i in 0..u32::from(edt[6]) {
            edt.extend_from_slice(&counter_value(0, 100 - i).to_be_bytes());
            edt.extend_from_slice(&i.to_be_bytes());
        }
        edt
    }

    fn meter_reply(&mut self, payload: &[u8]) -> Option<Vec<u8>> {
        let request = parse(payload, &StandardDecoders).ok()??;
        if !matches!(request.esv, ServiceCode::Get | ServiceCode::SetC) {
            return None;
        }

        let index = self.requests;
        self.requests += 1;
        if index < self.config.dropped_replies {
            return None;
        }

        let mut ok = true;
        let mut props = Vec::new();
        for property in &request.properties {
            if request.esv == ServiceCode::Get {
                match self.property(request.deoj, property.epc) {
                    Some(edt) => props.push((property.epc, edt)),
                    None => {
                        ok = false;
                        props.push((property.epc, Vec::new()));
                    }
                }
            } else if request.deoj.class_code() == 0x0288 && matches!(property.epc, 0xE5 | 0xED) {
                self.meter.insert(property.epc, property.edt.clone());
                props.push((property.epc, Vec::new()));
            } else {
                ok = false;
                props.push((property.epc, property.edt.clone()));
            }
        }

        let esv = match (request.esv, ok) {
            (ServiceCode::Get, true) => ServiceCode::GetRes,
            (ServiceCode::Get, false) => ServiceCode::GetSna,
            (_, true) => ServiceCode::SetRes,
            (_, false) => ServiceCode::SetCSna,
        };

        let mut reply = ECHONET_HEADER.to_vec();
        reply.extend_from_slice(&request.tid.to_be_bytes());
        reply.extend_from_slice(request.deoj.as_bytes());
        reply.extend_from_slice(request.seoj.as_bytes());
        reply.push(esv.code());
        reply.push(u8::try_from(props.len()).ok()?);
        for (epc, edt) in props {
            reply.push(epc);
            reply.push(u8::try_from(edt.len()).ok()?);
            reply.extend_from_slice(&edt);
        }
        Some(reply)
    }
}

/// Splits `SKSENDTO 1 <addr> <port> <sec> <side> <len> <payload>`
fn split_sendto(data: &[u8]) -> Option<(String, &[u8])> {
    let mut rest = data;
    let mut header_len = 0;
    for _ in 0..7 {
        let space = rest.iter().position(|&b| b == b' ')?;
        header_len += space + 1;
        rest = &rest[space + 1..];
    }
    let header = std::str::from_utf8(&data[..header_len]).ok()?;
    let len = usize::from_str_radix(header.split_ascii_whitespace().nth(6)?, 16).ok()?;
    let payload = rest.get(..len)?;
    Some((header.to_string(), payload))
}

/// In-process dongle implementing [`LineChannel`]
pub struct DongleSimulator {
    state: Arc<Mutex<SimState>>,
    tx: broadcast::Sender<ChannelEvent>,
}

impl DongleSimulator {
    /// Create a closed simulator
    pub fn new(config: SimulatorConfig) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(SimState::new(config))),
            tx,
        }
    }

    /// Handle that stays usable after the simulator is boxed into an adapter
    pub fn handle(&self) -> SimulatorHandle {
        SimulatorHandle {
            state: self.state.clone(),
            tx: self.tx.clone(),
        }
    }

    fn publish(&self, lines: Vec<Bytes>) {
        for line in lines {
            let _ = self.tx.send(ChannelEvent::Line(line));
        }
    }
}

#[async_trait]
impl LineChannel for DongleSimulator {
    async fn open(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.config.fail_open {
            return Err(TransportError::PortNotFound("simulator".to_string()));
        }
        state.open = true;
        state.stats = ChannelStats::default();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        let was_open = std::mem::replace(&mut self.state.lock().open, false);
        if was_open {
            let _ = self.tx.send(ChannelEvent::Closed);
        }
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let replies = {
            let mut state = self.state.lock();
            if !state.open {
                return Err(TransportError::NotConnected);
            }
            state.written.push(Bytes::copy_from_slice(data));
            state.stats.bytes_sent += data.len() as u64;

            if let Some((header, payload)) = split_sendto(data).filter(|_| data.starts_with(b"SKSENDTO ")) {
                state.answer_sendto(&header, payload)
            } else {
                let text = String::from_utf8_lossy(data);
                state
                    .answer_command(text.trim_end_matches(['\r', '\n']))
                    .into_iter()
                    .map(Bytes::from)
                    .collect()
            }
        };
        self.state.lock().stats.lines_received += replies.len() as u64;
        self.publish(replies);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    fn subscribe(&self) -> broadcast::Receiver<ChannelEvent> {
        self.tx.subscribe()
    }

    fn describe(&self) -> String {
        let state = self.state.lock();
        format!("simulated dongle (meter {})", state.config.meter_mac)
    }

    fn stats(&self) -> ChannelStats {
        self.state.lock().stats
    }
}

/// Test-side control of a [`DongleSimulator`]
#[derive(Clone)]
pub struct SimulatorHandle {
    state: Arc<Mutex<SimState>>,
    tx: broadcast::Sender<ChannelEvent>,
}

impl SimulatorHandle {
    /// Publish `line` as if the dongle sent it
    pub fn inject_line(&self, line: &str) {
        let _ = self.tx.send(ChannelEvent::Line(Bytes::from(line.to_string())));
    }

    /// Publish an `ERXUDP` from the meter carrying `payload`
    pub fn push_datagram(&self, payload: &[u8]) {
        let line = self.state.lock().erxudp(payload);
        let _ = self.tx.send(ChannelEvent::Line(line));
    }

    /// Simulate the port disappearing
    pub fn unplug(&self) {
        let was_open = std::mem::replace(&mut self.state.lock().open, false);
        if was_open {
            let _ = self.tx.send(ChannelEvent::Closed);
        }
    }

    /// Change the scripted behaviour
    pub fn configure(&self, update: impl FnOnce(&mut SimulatorConfig)) {
        update(&mut self.state.lock().config);
    }

    /// Replace a meter property
    pub fn set_meter_property(&self, epc: u8, edt: Vec<u8>) {
        self.state.lock().meter.insert(epc, edt);
    }

    /// Everything written so far, lossily decoded, delimiter stripped
    pub fn written_lines(&self) -> Vec<String> {
        self.state
            .lock()
            .written
            .iter()
            .map(|line| String::from_utf8_lossy(line).trim_end_matches(['\r', '\n']).to_string())
            .collect()
    }

    /// Number of written lines starting with `prefix`
    pub fn count_written(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .written
            .iter()
            .filter(|line| line.starts_with(prefix.as_bytes()))
            .count()
    }

    /// Payloads of every `SKSENDTO`
    pub fn sent_payloads(&self) -> Vec<Vec<u8>> {
        self.state.lock().sent_payloads.clone()
    }

    /// Whether the port is open
    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Meter's link-local address
    pub fn meter_address(&self) -> String {
        self.state.lock().meter_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::echonet::{compose, PacketRequest, PropertyValue};

    fn lines(rx: &mut broadcast::Receiver<ChannelEvent>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let ChannelEvent::Line(line) = event {
                out.push(String::from_utf8_lossy(&line).into_owned());
            }
        }
        out
    }

    #[test]
    fn test_link_local_address() {
        assert_eq!(
            link_local_address("001C6400030C12A4").unwrap(),
            "FE80:0000:0000:0000:021C:6400:030C:12A4"
        );
        assert!(link_local_address("0011").is_none());
    }

    #[test]
    fn test_property_map_encoding() {
        assert_eq!(encode_property_map(&[0x80, 0xE7]), vec![2, 0x80, 0xE7]);
        let codes: Vec<u8> = (0xE0..=0xEF).collect();
        let edt = encode_property_map(&codes);
        assert_eq!(edt.len(), 17);
        assert_eq!(edt[0], 16);
        assert!(edt[1..].iter().all(|&b| b == 0x40));
    }

    #[tokio::test]
    async fn test_command_replies() {
        let mut sim = DongleSimulator::new(SimulatorConfig::default());
        let mut rx = sim.subscribe();
        assert!(matches!(sim.write(b"SKVER\r\n").await, Err(TransportError::NotConnected)));

        sim.open().await.unwrap();
        sim.write(b"SKVER\r\n").await.unwrap();
        assert_eq!(lines(&mut rx), vec!["SKVER", "EVER 1.2.10"]);

        sim.write(b"SKSCAN 2 FFFFFFFF 6 0\r\n").await.unwrap();
        let scan = lines(&mut rx);
        assert!(scan.contains(&"EPANDESC".to_string()));
        assert!(scan.contains(&"  Pan ID:8888".to_string()));
        assert!(scan.last().unwrap().starts_with("EVENT 22"));
    }

    #[tokio::test]
    async fn test_meter_answers_get() {
        let config = SimulatorConfig {
            echo: false,
            payload_format: PayloadFormat::Hex,
            ..SimulatorConfig::default()
        };
        let mut sim = DongleSimulator::new(config);
        let handle = sim.handle();
        let mut rx = sim.subscribe();
        sim.open().await.unwrap();

        let payload = compose(&PacketRequest::get(&[0xE7]).with_tid(7)).unwrap();
        let mut frame = format!("SKSENDTO 1 {} 0E1A 1 0 {:04X} ", handle.meter_address(), payload.len()).into_bytes();
        frame.extend_from_slice(&payload);
        frame.extend_from_slice(b"\r\n");
        sim.write(&frame).await.unwrap();

        let out = lines(&mut rx);
        assert!(out[0].starts_with("EVENT 21") && out[0].ends_with(" 00"));
        let data = hex::decode(out[1].rsplit(' ').next().unwrap()).unwrap();
        let reply = parse(&data, &StandardDecoders).unwrap().unwrap();
        assert_eq!(reply.tid, 7);
        assert_eq!(reply.esv, ServiceCode::GetRes);
        assert_eq!(reply.value(0xE7), Some(&PropertyValue::InstantaneousPower(500)));
        assert_eq!(handle.sent_payloads(), vec![payload]);
    }

    #[test]
    fn test_unknown_property_is_not_available() {
        let mut state = SimState::new(SimulatorConfig::default());
        let payload = compose(&PacketRequest::get(&[0xE7, 0xF5]).with_tid(1)).unwrap();
        let reply = state.meter_reply(&payload).unwrap();
        assert_eq!(reply[10], 0x52);
        assert_eq!(reply[11], 2);
    }

    #[tokio::test]
    async fn test_close_publishes_once() {
        let mut sim = DongleSimulator::new(SimulatorConfig::default());
        let mut rx = sim.subscribe();
        sim.open().await.unwrap();
        sim.close().await.unwrap();
        sim.close().await.unwrap();
        assert_eq!(rx.try_recv().unwrap(), ChannelEvent::Closed);
        assert!(rx.try_recv().is_err());
    }
}

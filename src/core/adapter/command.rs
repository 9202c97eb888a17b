//! SKSTACK command vocabulary and reply parsing
//!
//! Commands are rendered exactly as the dongle expects them (the caller
//! appends CRLF). Replies and unsolicited events are parsed from single lines.

use super::pending::LineFilter;
use bytes::Bytes;
use serde::Serialize;
use std::fmt;

/// UDP port used for ECHONET Lite
pub const ECHONET_UDP_PORT: u16 = 0x0E1A;

/// Command sent to the dongle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// `SKVER`: firmware version
    Version,
    /// `SKINFO`: own address, MAC and PAN settings
    Info,
    /// `SKSETPWD C <password>`: Route-B password as PSK source
    SetPassword(&'a str),
    /// `SKSETRBID <id>`: Route-B authentication ID
    SetRouteBId(&'a str),
    /// `SKSCAN 2 FFFFFFFF 6 0`: active scan on all channels
    ActiveScan,
    /// `SKSREG S2 <ch>`: logical channel register
    SetChannel(u8),
    /// `SKSREG S3 <panid>`: PAN ID register
    SetPanId(u16),
    /// `SKSREG SA2 0`: ERXUDP payload format register
    SetReceiveFormat,
    /// `SKLL64 <mac>`: link-local address from a MAC
    LinkLocal(&'a str),
    /// `SKJOIN <addr>`: start PANA authentication
    Join(&'a str),
}

impl Command<'_> {
    /// Command keyword, used in logs and errors
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Version => "SKVER",
            Self::Info => "SKINFO",
            Self::SetPassword(_) => "SKSETPWD",
            Self::SetRouteBId(_) => "SKSETRBID",
            Self::ActiveScan => "SKSCAN",
            Self::SetChannel(_) | Self::SetPanId(_) | Self::SetReceiveFormat => "SKSREG",
            Self::LinkLocal(_) => "SKLL64",
            Self::Join(_) => "SKJOIN",
        }
    }

    /// Wire text without the line delimiter
    pub fn to_line(&self) -> String {
        match self {
            Self::Version => "SKVER".to_string(),
            Self::Info => "SKINFO".to_string(),
            Self::SetPassword(password) => format!("SKSETPWD C {password}"),
            Self::SetRouteBId(id) => format!("SKSETRBID {id}"),
            Self::ActiveScan => "SKSCAN 2 FFFFFFFF 6 0".to_string(),
            Self::SetChannel(channel) => format!("SKSREG S2 {channel:02X}"),
            Self::SetPanId(pan_id) => format!("SKSREG S3 {pan_id:04X}"),
            Self::SetReceiveFormat => "SKSREG SA2 0".to_string(),
            Self::LinkLocal(mac) => format!("SKLL64 {mac}"),
            Self::Join(addr) => format!("SKJOIN {addr}"),
        }
    }
}

impl Command<'_> {
    /// Filter selecting the single reply line of this command.
    ///
    /// `None` for the scan and join commands, whose results arrive as events.
    pub fn reply_filter(&self) -> Option<LineFilter> {
        let filter: LineFilter = match self {
            Self::ActiveScan | Self::Join(_) => return None,
            Self::Version => is_version_reply,
            Self::Info => is_info_reply,
            Self::LinkLocal(_) => is_link_local_reply,
            Self::SetPassword(_)
            | Self::SetRouteBId(_)
            | Self::SetChannel(_)
            | Self::SetPanId(_)
            | Self::SetReceiveFormat => is_control_reply,
        };
        Some(filter)
    }
}

fn is_version_reply(line: &str) -> bool {
    line.starts_with("EVER")
}

fn is_info_reply(line: &str) -> bool {
    line.starts_with("EINFO")
}

fn is_link_local_reply(line: &str) -> bool {
    line.starts_with("FE80")
}

fn is_control_reply(line: &str) -> bool {
    ControlReply::parse(line).is_some()
}

/// Lines that belong to an active scan
pub fn is_scan_line(line: &str) -> bool {
    line.starts_with("EPANDESC") || line.starts_with("  ") || line.starts_with("EVENT 22")
}

/// PANA result events
pub fn is_join_result(line: &str) -> bool {
    line.starts_with("EVENT 24") || line.starts_with("EVENT 25")
}

/// UDP send confirmation
pub fn is_send_confirmation(line: &str) -> bool {
    line.starts_with("EVENT 21")
}

impl fmt::Display for Command<'_> {
    /// Same as the wire text, with credentials masked
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetPassword(_) => write!(f, "SKSETPWD C ********"),
            Self::SetRouteBId(_) => write!(f, "SKSETRBID ********"),
            other => f.write_str(&other.to_line()),
        }
    }
}

/// Mask credentials in an echoed command line
pub fn mask_echo(line: &str) -> &str {
    if line.starts_with("SKSETPWD") {
        "SKSETPWD C ********"
    } else if line.starts_with("SKSETRBID") {
        "SKSETRBID ********"
    } else {
        line
    }
}

/// Build a `SKSENDTO` frame carrying `payload` to `dest`, CRLF included
pub fn udp_send_frame(dest: &str, payload: &[u8]) -> Vec<u8> {
    let header = format!(
        "SKSENDTO 1 {dest} {ECHONET_UDP_PORT:04X} 1 0 {:04X} ",
        payload.len()
    );
    let mut frame = Vec::with_capacity(header.len() + payload.len() + 2);
    frame.extend_from_slice(header.as_bytes());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(b"\r\n");
    frame
}

/// `EVENT <code> <sender> [params...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Event number (hex on the wire)
    pub code: u8,
    /// Sender address, if present
    pub sender: Option<String>,
    /// Remaining columns
    pub params: Vec<String>,
}

impl Event {
    /// Beacon received during a scan
    pub const BEACON: u8 = 0x20;
    /// UDP send finished; last column is the status
    pub const UDP_SENT: u8 = 0x21;
    /// Active scan finished
    pub const SCAN_COMPLETE: u8 = 0x22;
    /// PANA authentication failed
    pub const PANA_FAILED: u8 = 0x24;
    /// PANA authentication succeeded
    pub const PANA_SUCCEEDED: u8 = 0x25;
    /// Meter requested PANA session termination
    pub const SESSION_TERMINATE_REQUESTED: u8 = 0x26;
    /// PANA session lifetime expired
    pub const SESSION_EXPIRED: u8 = 0x29;

    /// Parse an `EVENT` line
    pub fn parse(line: &str) -> Option<Self> {
        let mut cols = line.split_ascii_whitespace();
        if cols.next()? != "EVENT" {
            return None;
        }
        let code = u8::from_str_radix(cols.next()?, 16).ok()?;
        let sender = cols.next().map(str::to_string);
        let params = cols.map(str::to_string).collect();
        Some(Self { code, sender, params })
    }

    /// Whether this event ends the PANA session
    pub fn ends_session(&self) -> bool {
        matches!(self.code, Self::SESSION_TERMINATE_REQUESTED | Self::SESSION_EXPIRED)
    }

    /// Status column of a send confirmation
    pub fn send_status(&self) -> Option<u8> {
        if self.code != Self::UDP_SENT {
            return None;
        }
        self.params.last().and_then(|s| u8::from_str_radix(s, 16).ok())
    }
}

/// Reply to a command answered by `OK`/`FAIL`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    /// `OK`
    Ok,
    /// `FAIL <code>`
    Fail(String),
}

impl ControlReply {
    /// Parse an `OK`/`FAIL` line
    pub fn parse(line: &str) -> Option<Self> {
        if line.starts_with("OK") {
            Some(Self::Ok)
        } else if line.starts_with("FAIL") {
            Some(Self::Fail(line.to_string()))
        } else {
            None
        }
    }
}

/// Firmware version from `EVER <version>`
pub fn parse_version(line: &str) -> Option<String> {
    line.strip_prefix("EVER").map(|rest| rest.trim().to_string())
}

/// Own link-local address and MAC from `EINFO <addr> <mac> ...`
pub fn parse_info(line: &str) -> Option<(String, String)> {
    let mut cols = line.split_ascii_whitespace();
    if cols.next()? != "EINFO" {
        return None;
    }
    let addr = cols.next()?.to_string();
    let mac = cols.next()?.to_string();
    Some((addr, mac))
}

/// Link-local address returned by `SKLL64`
pub fn parse_link_local(line: &str) -> Option<String> {
    line.starts_with("FE80").then(|| line.trim().to_string())
}

/// PAN found by an active scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanDescriptor {
    /// Meter MAC address (16 hex digits)
    pub mac: String,
    /// Logical channel
    pub channel: u8,
    /// Channel page
    pub channel_page: u8,
    /// PAN ID
    pub pan_id: u16,
    /// Pairing ID (8 hex digits)
    pub pairing_id: String,
    /// Link quality of the beacon, when reported
    pub lqi: Option<u8>,
}

/// Collects the indented `Key:Value` lines that follow `EPANDESC`
#[derive(Debug, Default, Clone)]
pub struct PanDescriptorBuilder {
    mac: Option<String>,
    channel: Option<u8>,
    channel_page: Option<u8>,
    pan_id: Option<u16>,
    pairing_id: Option<String>,
    lqi: Option<u8>,
}

impl PanDescriptorBuilder {
    /// Feed one line; returns `false` if it is not a descriptor field
    pub fn feed(&mut self, line: &str) -> bool {
        if !line.starts_with("  ") {
            return false;
        }
        let Some((key, value)) = line.trim().split_once(':') else {
            return false;
        };
        let value = value.trim();
        match key {
            "Channel" => self.channel = u8::from_str_radix(value, 16).ok(),
            "Channel Page" => self.channel_page = u8::from_str_radix(value, 16).ok(),
            "Pan ID" => self.pan_id = u16::from_str_radix(value, 16).ok(),
            "Addr" => self.mac = Some(value.to_uppercase()),
            "LQI" => self.lqi = u8::from_str_radix(value, 16).ok(),
            "PairID" => self.pairing_id = Some(value.to_uppercase()),
            _ => {}
        }
        true
    }

    /// Build the descriptor if every required field arrived
    pub fn build(&self) -> Option<PanDescriptor> {
        Some(PanDescriptor {
            mac: self.mac.clone()?,
            channel: self.channel?,
            channel_page: self.channel_page?,
            pan_id: self.pan_id?,
            pairing_id: self.pairing_id.clone()?,
            lqi: self.lqi,
        })
    }
}

/// UDP datagram delivered by `ERXUDP`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Erxudp {
    /// Sender IPv6 address
    pub sender: String,
    /// Destination IPv6 address
    pub destination: String,
    /// Remote port
    pub rport: u16,
    /// Local port
    pub lport: u16,
    /// Sender MAC address
    pub sender_mac: String,
    /// Received over the encrypted PANA session
    pub secured: bool,
    /// Payload bytes
    pub payload: Bytes,
    /// Payload arrived as hex text (RL7023 layout)
    pub hex_text: bool,
}

fn split_fields(line: &[u8], count: usize) -> Option<(Vec<&str>, &[u8])> {
    let mut fields = Vec::with_capacity(count);
    let mut rest = line;
    for _ in 0..count {
        let space = rest.iter().position(|&b| b == b' ')?;
        fields.push(std::str::from_utf8(&rest[..space]).ok()?);
        rest = &rest[space + 1..];
    }
    Some((fields, rest))
}

fn decode_payload(data: &[u8], datalen: usize) -> Option<(Bytes, bool)> {
    if data.len() == datalen * 2 && data.iter().all(u8::is_ascii_hexdigit) {
        return hex::decode(data).ok().map(|bytes| (Bytes::from(bytes), true));
    }
    (data.len() == datalen).then(|| (Bytes::copy_from_slice(data), false))
}

impl Erxudp {
    /// Parse an `ERXUDP` line, with or without the `side` column
    pub fn parse(line: &[u8]) -> Option<Self> {
        if !line.starts_with(b"ERXUDP ") {
            return None;
        }
        // With side: ERXUDP sender dest rport lport mac secured side datalen
        // Without:   ERXUDP sender dest rport lport mac secured datalen
        [9usize, 8].into_iter().find_map(|count| {
            let (fields, data) = split_fields(line, count)?;
            let datalen = usize::from_str_radix(fields[count - 1], 16).ok()?;
            let (payload, hex_text) = decode_payload(data, datalen)?;
            Some(Self {
                sender: fields[1].to_string(),
                destination: fields[2].to_string(),
                rport: u16::from_str_radix(fields[3], 16).ok()?,
                lport: u16::from_str_radix(fields[4], 16).ok()?,
                sender_mac: fields[5].to_string(),
                secured: fields[6] == "1",
                payload,
                hex_text,
            })
        })
    }

    /// Render the line for diagnostics: binary payloads as upper-case hex
    pub fn display_line(&self, raw: &[u8]) -> String {
        if self.hex_text {
            return String::from_utf8_lossy(raw).into_owned();
        }
        let header_len = raw.len() - self.payload.len();
        format!(
            "{}{}",
            String::from_utf8_lossy(&raw[..header_len]),
            hex::encode_upper(&self.payload)
        )
    }
}

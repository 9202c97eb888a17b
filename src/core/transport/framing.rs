//! CRLF line framing for the dongle byte stream
//!
//! Plain CRLF splitting is not enough: dongles that deliver `ERXUDP` payloads
//! as raw bytes may embed `\r\n` inside the payload. For those lines the
//! header's data-length column decides where the line really ends.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::Decoder;

/// Longest line kept before the buffer is discarded
pub const MAX_LINE_LENGTH: usize = 4096;

const CRLF: &[u8] = b"\r\n";
const ERXUDP_PREFIX: &[u8] = b"ERXUDP ";
// ERXUDP, sender, dest, rport, lport, senderlla, secured, side, datalen
const ERXUDP_BINARY_FIELDS: usize = 9;

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == CRLF)
}

/// Expected length (without delimiter) of a binary-payload `ERXUDP` line.
///
/// Returns `None` when `buf` does not start with such a header, e.g. for the
/// hex-text layout that has no `side` column.
pub fn erxudp_frame_len(buf: &[u8]) -> Option<usize> {
    if !buf.starts_with(ERXUDP_PREFIX) {
        return None;
    }

    let header = &buf[..find_crlf(buf).unwrap_or(buf.len())];
    let mut offset = 0;
    let mut fields: [&[u8]; ERXUDP_BINARY_FIELDS] = [&[]; ERXUDP_BINARY_FIELDS];
    for field in &mut fields {
        let rest = header.get(offset..)?;
        let space = rest.iter().position(|&b| b == b' ')?;
        *field = &rest[..space];
        offset += space + 1;
    }

    let (side, datalen) = (fields[7], fields[8]);
    if side.len() != 1 || datalen.len() != 4 {
        return None;
    }
    let datalen = usize::from_str_radix(std::str::from_utf8(datalen).ok()?, 16).ok()?;
    Some(offset + datalen)
}

/// Tokio decoder producing one [`Bytes`] per dongle line, delimiter stripped.
/// Empty lines are skipped.
#[derive(Debug, Clone, Default)]
pub struct DongleLineCodec {
    discarded: u64,
}

impl DongleLineCodec {
    /// Create a new decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes thrown away because a line exceeded [`MAX_LINE_LENGTH`]
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

impl Decoder for DongleLineCodec {
    type Item = Bytes;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(pos) = find_crlf(src) else {
                if src.len() > MAX_LINE_LENGTH {
                    let keep = usize::from(src.last() == Some(&b'\r'));
                    let dropped = src.len() - keep;
                    tracing::warn!(bytes = dropped, "Discarding over-long line");
                    self.discarded += dropped as u64;
                    src.advance(dropped);
                }
                return Ok(None);
            };

            let end = match erxudp_frame_len(src) {
                Some(len) if len > pos && len <= MAX_LINE_LENGTH => {
                    if src.len() < len + CRLF.len() {
                        return Ok(None);
                    }
                    if &src[len..len + CRLF.len()] == CRLF {
                        len
                    } else {
                        pos
                    }
                }
                _ => pos,
            };

            let line = src.split_to(end).freeze();
            src.advance(CRLF.len());
            if !line.is_empty() {
                return Ok(Some(line));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "ERXUDP FE80:0000:0000:0000:021C:6400:030C:12A4 \
        FE80:0000:0000:0000:021D:1291:0000:0574 0E1A 0E1A 001C6400030C12A4 1 0 ";

    fn decode_all(codec: &mut DongleLineCodec, buf: &mut BytesMut) -> Vec<Bytes> {
        let mut lines = Vec::new();
        while let Some(line) = codec.decode(buf).unwrap() {
            lines.push(line);
        }
        lines
    }

    #[test]
    fn test_header_is_123_bytes() {
        assert_eq!(HEADER.len() + 5, 123);
    }

    #[test]
    fn test_plain_lines() {
        let mut codec = DongleLineCodec::new();
        let mut buf = BytesMut::from(&b"SKVER\r\nEVER 1.2.10\r\n\r\nOK\r\nEVE"[..]);
        let lines = decode_all(&mut codec, &mut buf);
        assert_eq!(lines, vec![
            Bytes::from_static(b"SKVER"),
            Bytes::from_static(b"EVER 1.2.10"),
            Bytes::from_static(b"OK"),
        ]);
        assert_eq!(&buf[..], b"EVE");

        buf.extend_from_slice(b"NT 22 FE80\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Bytes::from_static(b"EVENT 22 FE80")));
    }

    #[test]
    fn test_binary_payload_with_embedded_crlf() {
        let payload = [0x10, 0x81, 0x00, 0x01, 0x0D, 0x0A, 0x01, 0x05];
        let mut raw = format!("{HEADER}0008 ").into_bytes();
        raw.extend_from_slice(&payload);
        let expected = Bytes::from(raw.clone());
        raw.extend_from_slice(b"\r\nOK\r\n");

        let mut codec = DongleLineCodec::new();
        let mut buf = BytesMut::from(&raw[..]);
        let lines = decode_all(&mut codec, &mut buf);
        assert_eq!(lines, vec![expected, Bytes::from_static(b"OK")]);
    }

    #[test]
    fn test_binary_payload_waits_for_remainder() {
        let mut raw = format!("{HEADER}0004 ").into_bytes();
        raw.extend_from_slice(&[0x0D, 0x0A]);

        let mut codec = DongleLineCodec::new();
        let mut buf = BytesMut::from(&raw[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(&[0xAA, 0xBB, b'\r', b'\n']);
        let line = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(line.len(), HEADER.len() + 5 + 4);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_hex_payload_layout_uses_plain_split() {
        let line = "ERXUDP FE80:0000:0000:0000:021C:6400:030C:12A4 \
            FE80:0000:0000:0000:021D:1291:0000:0574 0E1A 0E1A 001C6400030C12A4 1 0012 \
            1081000102880105FF017201E704000001F4";
        assert_eq!(erxudp_frame_len(line.as_bytes()), None);

        let mut codec = DongleLineCodec::new();
        let mut buf = BytesMut::from(format!("{line}\r\n").as_bytes());
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Bytes::from(line)));
    }

    #[test]
    fn test_frame_len() {
        let raw = format!("{HEADER}0012 ");
        assert_eq!(erxudp_frame_len(raw.as_bytes()), Some(123 + 0x12));
        assert_eq!(erxudp_frame_len(b"EVENT 21 FE80"), None);
    }

    #[test]
    fn test_over_long_line_is_discarded() {
        let mut codec = DongleLineCodec::new();
        let mut buf = BytesMut::from(&vec![b'A'; MAX_LINE_LENGTH + 10][..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
        assert_eq!(codec.discarded(), (MAX_LINE_LENGTH + 10) as u64);

        buf.extend_from_slice(b"OK\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Bytes::from_static(b"OK")));
    }
}

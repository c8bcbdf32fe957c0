//! FIX message encode/decode.
//!
//! Tag-value framing over SOH, FIXT.1.1 begin string, body-length and
//! checksum synthesis and validation. The parser returns a flat tag map
//! (duplicate tags keep the last value); repeating groups are recovered
//! from the raw bytes by a separate walker because tag 269 legitimately
//! repeats inside 35=W/35=X.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

/// FIX tag delimiter.
pub const SOH: u8 = 0x01;

/// Transport begin string (tag 8).
pub const BEGIN_STRING: &str = "FIXT.1.1";

/// Application version id sent in tag 1137 on Logon.
pub const APPL_VER_ID: &str = "FIX.5.0SP2";

/// Tags used by this implementation.
pub mod tag {
    // Framing / standard header
    pub const BEGIN_STRING: u32 = 8;
    pub const BODY_LENGTH: u32 = 9;
    pub const CHECKSUM: u32 = 10;
    pub const MSG_TYPE: u32 = 35;
    pub const SENDER_COMP_ID: u32 = 49;
    pub const TARGET_COMP_ID: u32 = 56;
    pub const MSG_SEQ_NUM: u32 = 34;
    pub const SENDING_TIME: u32 = 52;
    pub const POSS_DUP_FLAG: u32 = 43;
    pub const ORIG_SENDING_TIME: u32 = 122;

    // Logon
    pub const ENCRYPT_METHOD: u32 = 98;
    pub const HEART_BT_INT: u32 = 108;
    pub const RESET_SEQ_NUM_FLAG: u32 = 141;
    pub const USERNAME: u32 = 553;
    pub const PASSWORD: u32 = 554;
    pub const DEFAULT_APPL_VER_ID: u32 = 1137;

    // Session admin
    pub const TEST_REQ_ID: u32 = 112;
    pub const BEGIN_SEQ_NO: u32 = 7;
    pub const END_SEQ_NO: u32 = 16;
    pub const REF_SEQ_NUM: u32 = 45;
    pub const TEXT: u32 = 58;

    // Orders / execution reports
    pub const CL_ORD_ID: u32 = 11;
    pub const ORIG_CL_ORD_ID: u32 = 41;
    pub const ORDER_ID: u32 = 37;
    pub const EXEC_ID: u32 = 17;
    pub const EXEC_TYPE: u32 = 150;
    pub const ORD_STATUS: u32 = 39;
    pub const SYMBOL: u32 = 55;
    pub const SIDE: u32 = 54;
    pub const ORDER_QTY: u32 = 38;
    pub const ORD_TYPE: u32 = 40;
    pub const PRICE: u32 = 44;
    pub const TIME_IN_FORCE: u32 = 59;
    pub const LAST_QTY: u32 = 32;
    pub const LAST_PX: u32 = 31;

    // Party identification
    pub const NO_PARTY_IDS: u32 = 453;
    pub const PARTY_ID: u32 = 448;
    pub const PARTY_ROLE: u32 = 452;

    // Market data
    pub const MD_REQ_ID: u32 = 262;
    pub const SUBSCRIPTION_REQUEST_TYPE: u32 = 263;
    pub const MARKET_DEPTH: u32 = 264;
    pub const NO_MD_ENTRY_TYPES: u32 = 267;
    pub const NO_MD_ENTRIES: u32 = 268;
    pub const MD_ENTRY_TYPE: u32 = 269;
    pub const MD_ENTRY_PX: u32 = 270;
    pub const MD_ENTRY_SIZE: u32 = 271;
    pub const MD_UPDATE_ACTION: u32 = 279;
    pub const NO_RELATED_SYM: u32 = 146;
}

/// Message types (tag 35).
pub mod msg_type {
    pub const HEARTBEAT: &str = "0";
    pub const TEST_REQUEST: &str = "1";
    pub const RESEND_REQUEST: &str = "2";
    pub const REJECT: &str = "3";
    pub const LOGOUT: &str = "5";
    pub const EXECUTION_REPORT: &str = "8";
    pub const LOGON: &str = "A";
    pub const NEW_ORDER_SINGLE: &str = "D";
    pub const ORDER_CANCEL_REQUEST: &str = "F";
    pub const MARKET_DATA_REQUEST: &str = "V";
    pub const MARKET_DATA_SNAPSHOT: &str = "W";
    pub const MARKET_DATA_INCREMENTAL: &str = "X";
}

/// Header tags emitted first, in this exact order.
const HEADER_FIELD_ORDER: [u32; 5] = [
    tag::MSG_TYPE,
    tag::SENDER_COMP_ID,
    tag::TARGET_COMP_ID,
    tag::MSG_SEQ_NUM,
    tag::SENDING_TIME,
];

/// Well-known body tags emitted next, in this exact order.
const BODY_FIELD_ORDER: [u32; 10] = [
    tag::CL_ORD_ID,
    tag::ORDER_QTY,
    tag::ORD_TYPE,
    tag::PRICE,
    tag::SIDE,
    tag::SYMBOL,
    tag::TIME_IN_FORCE,
    tag::NO_PARTY_IDS,
    tag::PARTY_ID,
    tag::PARTY_ROLE,
];

/// Errors raised while decoding an inbound frame. Frames failing
/// validation are dropped, never dispatched.
#[derive(Debug, Clone, PartialEq)]
pub enum FixDecodeError {
    MissingBeginString,
    MissingBodyLength,
    Truncated,
    InvalidField(String),
    BodyLengthMismatch { declared: usize, actual: usize },
    ChecksumMismatch { declared: u32, computed: u32 },
}

impl std::fmt::Display for FixDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingBeginString => write!(f, "message does not start with 8="),
            Self::MissingBodyLength => write!(f, "missing 9= after begin string"),
            Self::Truncated => write!(f, "message shorter than framing requires"),
            Self::InvalidField(s) => write!(f, "invalid field: {}", s),
            Self::BodyLengthMismatch { declared, actual } => {
                write!(f, "body length mismatch: declared {} actual {}", declared, actual)
            }
            Self::ChecksumMismatch { declared, computed } => {
                write!(f, "checksum mismatch: declared {:03} computed {:03}", declared, computed)
            }
        }
    }
}

impl std::error::Error for FixDecodeError {}

/// A FIX message as an insertion-ordered tag map. Tags 8, 9 and 10 are
/// synthesized on encode and retained on decode for inspection only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FixMessage {
    fields: IndexMap<u32, String>,
}

impl FixMessage {
    pub fn new(msg_type: &str) -> Self {
        let mut fields = IndexMap::new();
        fields.insert(tag::MSG_TYPE, msg_type.to_string());
        Self { fields }
    }

    pub fn empty() -> Self {
        Self { fields: IndexMap::new() }
    }

    /// Sets a field, replacing any existing value while keeping the
    /// original insertion position.
    pub fn set(&mut self, t: u32, value: impl ToString) -> &mut Self {
        self.fields.insert(t, value.to_string());
        self
    }

    pub fn get(&self, t: u32) -> Option<&str> {
        self.fields.get(&t).map(|s| s.as_str())
    }

    pub fn get_u64(&self, t: u32) -> Option<u64> {
        self.get(t).and_then(|s| s.parse().ok())
    }

    pub fn get_f64(&self, t: u32) -> Option<f64> {
        self.get(t).and_then(|s| s.parse().ok())
    }

    pub fn contains(&self, t: u32) -> bool {
        self.fields.contains_key(&t)
    }

    pub fn msg_type(&self) -> Option<&str> {
        self.get(tag::MSG_TYPE)
    }

    pub fn seq_num(&self) -> Option<u64> {
        self.get_u64(tag::MSG_SEQ_NUM)
    }

    /// Body fields in the outbound emission order: fixed header order,
    /// then well-known body tags, then everything else in insertion
    /// order. Framing tags are excluded.
    pub fn ordered_fields(&self) -> Vec<(u32, String)> {
        let mut out = Vec::with_capacity(self.fields.len());
        for t in HEADER_FIELD_ORDER {
            if let Some(v) = self.fields.get(&t) {
                out.push((t, v.clone()));
            }
        }
        for t in BODY_FIELD_ORDER {
            if let Some(v) = self.fields.get(&t) {
                out.push((t, v.clone()));
            }
        }
        for (&t, v) in &self.fields {
            if t == tag::BEGIN_STRING || t == tag::BODY_LENGTH || t == tag::CHECKSUM {
                continue;
            }
            if HEADER_FIELD_ORDER.contains(&t) || BODY_FIELD_ORDER.contains(&t) {
                continue;
            }
            out.push((t, v.clone()));
        }
        out
    }

    /// Encodes with synthesized 8/9/10.
    pub fn encode(&self) -> Vec<u8> {
        encode_fields(&self.ordered_fields())
    }
}

/// Encodes an explicit field list (duplicates allowed, emitted verbatim
/// in the given order) with synthesized framing. This is the path for
/// bodies carrying true repeating groups, where a map cannot express the
/// required duplicate tags.
pub fn encode_fields(fields: &[(u32, String)]) -> Vec<u8> {
    let mut body = Vec::with_capacity(256);
    for (t, v) in fields {
        if *t == tag::BEGIN_STRING || *t == tag::BODY_LENGTH || *t == tag::CHECKSUM {
            continue;
        }
        body.extend_from_slice(t.to_string().as_bytes());
        body.push(b'=');
        body.extend_from_slice(v.as_bytes());
        body.push(SOH);
    }
    let mut out = Vec::with_capacity(body.len() + 32);
    out.extend_from_slice(format!("8={}\x019={}\x01", BEGIN_STRING, body.len()).as_bytes());
    out.extend_from_slice(&body);
    let sum: u32 = out.iter().map(|&b| b as u32).sum();
    out.extend_from_slice(format!("10={:03}\x01", sum % 256).as_bytes());
    out
}

/// Decodes and validates one complete frame.
pub fn decode(raw: &[u8]) -> Result<FixMessage, FixDecodeError> {
    if !raw.starts_with(b"8=") {
        return Err(FixDecodeError::MissingBeginString);
    }
    let first_soh = raw
        .iter()
        .position(|&b| b == SOH)
        .ok_or(FixDecodeError::Truncated)?;
    let after_begin = first_soh + 1;
    if !raw[after_begin..].starts_with(b"9=") {
        return Err(FixDecodeError::MissingBodyLength);
    }
    let len_soh = raw[after_begin..]
        .iter()
        .position(|&b| b == SOH)
        .map(|p| p + after_begin)
        .ok_or(FixDecodeError::Truncated)?;
    let declared: usize = std::str::from_utf8(&raw[after_begin + 2..len_soh])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| FixDecodeError::InvalidField("9".into()))?;

    let body_start = len_soh + 1;
    let trailer_at = find_trailer(raw).ok_or(FixDecodeError::Truncated)?;
    let actual = trailer_at - body_start;
    if actual != declared {
        return Err(FixDecodeError::BodyLengthMismatch { declared, actual });
    }

    let declared_sum: u32 = std::str::from_utf8(&raw[trailer_at + 3..trailer_at + 6])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| FixDecodeError::InvalidField("10".into()))?;
    let computed: u32 = raw[..trailer_at].iter().map(|&b| b as u32).sum::<u32>() % 256;
    if computed != declared_sum {
        return Err(FixDecodeError::ChecksumMismatch { declared: declared_sum, computed });
    }

    let mut msg = FixMessage::empty();
    for field in raw.split(|&b| b == SOH) {
        if field.is_empty() {
            continue;
        }
        let eq = match field.iter().position(|&b| b == b'=') {
            Some(p) => p,
            None => {
                return Err(FixDecodeError::InvalidField(
                    String::from_utf8_lossy(field).into_owned(),
                ))
            }
        };
        let t: u32 = std::str::from_utf8(&field[..eq])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                FixDecodeError::InvalidField(String::from_utf8_lossy(field).into_owned())
            })?;
        let value = String::from_utf8_lossy(&field[eq + 1..]).into_owned();
        // Duplicate tags keep the last value seen
        msg.fields.insert(t, value);
    }
    Ok(msg)
}

/// Byte offset of `10=` in a complete frame, if present with its
/// three-digit value and trailing SOH.
fn find_trailer(raw: &[u8]) -> Option<usize> {
    let mut i = 0;
    while i + 7 <= raw.len() {
        if raw[i] == SOH && raw[i + 1..].starts_with(b"10=") {
            let at = i + 1;
            if at + 7 <= raw.len() && raw[at + 6] == SOH {
                return Some(at);
            }
            return None;
        }
        i += 1;
    }
    None
}

/// Extracts the next complete frame from a rolling receive buffer.
/// Bytes before the first `8=` are discarded; a partial frame is left
/// in place for the next read.
pub fn next_frame(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    let start = find_subslice(buf, b"8=")?;
    if start > 0 {
        buf.drain(..start);
    }
    let trailer = find_trailer(buf)?;
    let end = trailer + 7; // "10=" + 3 digits + SOH
    let frame: Vec<u8> = buf.drain(..end).collect();
    Some(frame)
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// One market-data entry recovered from the raw byte stream of a 35=W
/// or 35=X message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MdEntry {
    /// Tag 279: '0' new, '1' change, '2' delete. Absent in snapshots.
    pub update_action: Option<char>,
    /// Tag 269: '0' bid, '1' ask.
    pub entry_type: Option<char>,
    pub price: Option<f64>,
    pub size: Option<f64>,
}

impl MdEntry {
    fn has_content(&self) -> bool {
        self.update_action.is_some()
            || self.entry_type.is_some()
            || self.price.is_some()
            || self.size.is_some()
    }
}

/// Walks the raw SOH-delimited tag stream of a market-data message and
/// reconstructs the 268 repeating group. Entries may open with 279
/// (incremental) or 269 (snapshot); a new 269 while the current entry
/// already has a type finalizes the current entry.
pub fn parse_md_entries(raw: &[u8]) -> Vec<MdEntry> {
    let mut entries = Vec::new();
    let mut current = MdEntry::default();
    let mut in_group = false;

    for field in raw.split(|&b| b == SOH) {
        if field.is_empty() {
            continue;
        }
        let eq = match field.iter().position(|&b| b == b'=') {
            Some(p) => p,
            None => continue,
        };
        let t: u32 = match std::str::from_utf8(&field[..eq]).ok().and_then(|s| s.parse().ok()) {
            Some(t) => t,
            None => continue,
        };
        let value = &field[eq + 1..];

        if t == tag::NO_MD_ENTRIES {
            in_group = true;
            continue;
        }
        if !in_group {
            continue;
        }
        match t {
            tag::MD_UPDATE_ACTION => {
                if current.has_content() {
                    entries.push(std::mem::take(&mut current));
                }
                current.update_action = value.first().map(|&b| b as char);
            }
            tag::MD_ENTRY_TYPE => {
                if current.entry_type.is_some() {
                    entries.push(std::mem::take(&mut current));
                }
                current.entry_type = value.first().map(|&b| b as char);
            }
            tag::MD_ENTRY_PX => {
                current.price = std::str::from_utf8(value).ok().and_then(|s| s.parse().ok());
            }
            tag::MD_ENTRY_SIZE => {
                current.size = std::str::from_utf8(value).ok().and_then(|s| s.parse().ok());
            }
            tag::CHECKSUM => break,
            _ => {}
        }
    }
    if current.has_content() {
        entries.push(current);
    }
    entries
}

/// FIX UTC timestamp with millisecond precision (tags 52, 122).
pub fn fix_timestamp(t: DateTime<Utc>) -> String {
    t.format("%Y%m%d-%H:%M:%S%.3f").to_string()
}

pub fn now_timestamp() -> String {
    fix_timestamp(Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_str(raw: &[u8]) -> String {
        String::from_utf8_lossy(raw).replace('\x01', "|")
    }

    #[test]
    fn test_encode_framing() {
        let mut msg = FixMessage::new(msg_type::HEARTBEAT);
        msg.set(tag::SENDER_COMP_ID, "SND")
            .set(tag::TARGET_COMP_ID, "TGT")
            .set(tag::MSG_SEQ_NUM, 2)
            .set(tag::SENDING_TIME, "20251007-13:40:00.000");
        let raw = msg.encode();
        let s = frame_str(&raw);
        assert!(s.starts_with("8=FIXT.1.1|9="), "{}", s);
        assert!(s.ends_with('|'), "{}", s);

        // Declared body length matches the bytes between the framing fields
        let decoded = decode(&raw).expect("frame valid");
        assert_eq!(decoded.msg_type(), Some("0"));
        assert_eq!(decoded.seq_num(), Some(2));
    }

    #[test]
    fn test_checksum_is_mod_256_zero_padded() {
        let mut msg = FixMessage::new(msg_type::HEARTBEAT);
        msg.set(tag::SENDER_COMP_ID, "A")
            .set(tag::TARGET_COMP_ID, "B")
            .set(tag::MSG_SEQ_NUM, 1)
            .set(tag::SENDING_TIME, "20251007-13:40:00.000");
        let raw = msg.encode();
        let trailer = find_trailer(&raw).unwrap();
        let declared = std::str::from_utf8(&raw[trailer + 3..trailer + 6]).unwrap();
        assert_eq!(declared.len(), 3);
        let computed: u32 = raw[..trailer].iter().map(|&b| b as u32).sum::<u32>() % 256;
        assert_eq!(declared.parse::<u32>().unwrap(), computed);
    }

    #[test]
    fn test_roundtrip_all_supported_types() {
        for mt in [
            msg_type::LOGON,
            msg_type::HEARTBEAT,
            msg_type::TEST_REQUEST,
            msg_type::RESEND_REQUEST,
            msg_type::REJECT,
            msg_type::LOGOUT,
            msg_type::EXECUTION_REPORT,
            msg_type::NEW_ORDER_SINGLE,
            msg_type::ORDER_CANCEL_REQUEST,
            msg_type::MARKET_DATA_REQUEST,
            msg_type::MARKET_DATA_SNAPSHOT,
            msg_type::MARKET_DATA_INCREMENTAL,
        ] {
            let mut msg = FixMessage::new(mt);
            msg.set(tag::SENDER_COMP_ID, "SND")
                .set(tag::TARGET_COMP_ID, "TGT")
                .set(tag::MSG_SEQ_NUM, 7)
                .set(tag::SENDING_TIME, "20251007-13:40:00.123")
                .set(tag::TEXT, "note");
            let decoded = decode(&msg.encode()).expect("roundtrip");
            for (t, v) in msg.ordered_fields() {
                assert_eq!(decoded.get(t), Some(v.as_str()), "tag {} for 35={}", t, mt);
            }
        }
    }

    #[test]
    fn test_outbound_field_ordering() {
        let mut msg = FixMessage::new(msg_type::NEW_ORDER_SINGLE);
        // Insert deliberately out of order
        msg.set(tag::TIME_IN_FORCE, "1")
            .set(tag::SENDING_TIME, "20251007-13:40:00.000")
            .set(tag::PRICE, "100.5")
            .set(tag::MSG_SEQ_NUM, 3)
            .set(tag::SYMBOL, "BTC-USD")
            .set(tag::SIDE, "1")
            .set(tag::TARGET_COMP_ID, "TGT")
            .set(tag::ORDER_QTY, "0.5")
            .set(tag::SENDER_COMP_ID, "SND")
            .set(tag::ORD_TYPE, "2")
            .set(tag::CL_ORD_ID, "Qabc")
            .set(112, "custom");
        let tags: Vec<u32> = msg.ordered_fields().iter().map(|(t, _)| *t).collect();
        assert_eq!(tags, vec![35, 49, 56, 34, 52, 11, 38, 40, 44, 54, 55, 59, 112]);
    }

    #[test]
    fn test_duplicate_tag_keeps_last_value() {
        let raw = encode_fields(&[
            (35, "8".to_string()),
            (58, "first".to_string()),
            (58, "second".to_string()),
        ]);
        let decoded = decode(&raw).unwrap();
        assert_eq!(decoded.get(58), Some("second"));
    }

    #[test]
    fn test_body_length_mismatch_rejected() {
        let mut raw = FixMessage::new(msg_type::HEARTBEAT).encode();
        // Corrupt the declared body length
        let pos = find_subslice(&raw, b"9=").unwrap();
        raw[pos + 2] = b'0';
        match decode(&raw) {
            Err(FixDecodeError::BodyLengthMismatch { .. }) => {}
            other => panic!("expected body length mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_checksum_mismatch_rejected() {
        let mut msg = FixMessage::new(msg_type::HEARTBEAT);
        msg.set(tag::SENDER_COMP_ID, "SND");
        let mut raw = msg.encode();
        let trailer = find_trailer(&raw).unwrap();
        raw[trailer + 3] = if raw[trailer + 3] == b'0' { b'1' } else { b'0' };
        match decode(&raw) {
            Err(FixDecodeError::ChecksumMismatch { .. }) => {}
            other => panic!("expected checksum mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_next_frame_handles_partials_and_bursts() {
        let mut a = FixMessage::new(msg_type::HEARTBEAT);
        a.set(tag::MSG_SEQ_NUM, 1);
        let mut b = FixMessage::new(msg_type::HEARTBEAT);
        b.set(tag::MSG_SEQ_NUM, 2);
        let raw_a = a.encode();
        let raw_b = b.encode();

        let mut buf = Vec::new();
        buf.extend_from_slice(&raw_a);
        buf.extend_from_slice(&raw_b[..raw_b.len() / 2]);

        let first = next_frame(&mut buf).expect("first frame complete");
        assert_eq!(first, raw_a);
        assert!(next_frame(&mut buf).is_none(), "partial frame must stay buffered");

        buf.extend_from_slice(&raw_b[raw_b.len() / 2..]);
        let second = next_frame(&mut buf).expect("second frame complete");
        assert_eq!(second, raw_b);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_next_frame_discards_leading_garbage() {
        let msg = FixMessage::new(msg_type::HEARTBEAT).encode();
        let mut buf = b"\x00garbage".to_vec();
        buf.extend_from_slice(&msg);
        let frame = next_frame(&mut buf).expect("frame after garbage");
        assert_eq!(frame, msg);
    }

    #[test]
    fn test_md_entries_snapshot_ordering() {
        // 269-first entries, as a 35=W carries them
        let raw = encode_fields(&[
            (35, "W".into()),
            (55, "BTC-USD".into()),
            (268, "3".into()),
            (269, "0".into()),
            (270, "99950.5".into()),
            (271, "1.5".into()),
            (269, "0".into()),
            (270, "99950.0".into()),
            (271, "0".into()),
            (269, "1".into()),
            (270, "100050.5".into()),
            (271, "2.0".into()),
        ]);
        let entries = parse_md_entries(&raw);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].entry_type, Some('0'));
        assert_eq!(entries[0].price, Some(99950.5));
        assert_eq!(entries[1].size, Some(0.0));
        assert_eq!(entries[2].entry_type, Some('1'));
        assert!(entries.iter().all(|e| e.update_action.is_none()));
    }

    #[test]
    fn test_md_entries_incremental_ordering() {
        // 279-first entries, as a 35=X carries them
        let raw = encode_fields(&[
            (35, "X".into()),
            (268, "2".into()),
            (279, "0".into()),
            (269, "0".into()),
            (270, "99950.5".into()),
            (271, "1.0".into()),
            (279, "2".into()),
            (269, "1".into()),
            (270, "100050.5".into()),
            (271, "0".into()),
        ]);
        let entries = parse_md_entries(&raw);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].update_action, Some('0'));
        assert_eq!(entries[1].update_action, Some('2'));
        assert_eq!(entries[1].entry_type, Some('1'));
    }

    #[test]
    fn test_fix_timestamp_format() {
        let t = chrono::DateTime::parse_from_rfc3339("2025-10-07T13:40:00.000Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(fix_timestamp(t), "20251007-13:40:00.000");
    }
}

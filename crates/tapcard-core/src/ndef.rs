// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Single-record NDEF URI messages (NFC Forum RTD-URI).
//!
//! Layout written by [`encode_uri`]:
//!
//! ```text
//! header | type_len | payload_len (1 or 4 bytes) | "U" | id_code | uri remainder
//! ```
//!
//! `header` always has MB and ME set (exactly one record) and TNF = well-known.
//! The short-record flag is used whenever the payload fits in 255 bytes. The
//! identifier code compresses the longest matching URI prefix from the RTD-URI
//! abbreviation table.

use thiserror::Error;

const FLAG_MB: u8 = 0x80;
const FLAG_ME: u8 = 0x40;
const FLAG_CF: u8 = 0x20;
const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;
const TNF_MASK: u8 = 0x07;
const TNF_EMPTY: u8 = 0x00;
const TNF_WELL_KNOWN: u8 = 0x01;
const URI_TYPE: &[u8] = b"U";

/// RTD-URI identifier codes; the index is the code.
const URI_PREFIXES: [&str; 36] = [
    "",
    "http://www.",
    "https://www.",
    "http://",
    "https://",
    "tel:",
    "mailto:",
    "ftp://anonymous:anonymous@",
    "ftp://ftp.",
    "ftps://",
    "sftp://",
    "smb://",
    "nfs://",
    "ftp://",
    "dav://",
    "news:",
    "telnet://",
    "imap:",
    "rtsp://",
    "urn:",
    "pop:",
    "sip:",
    "sips:",
    "tftp:",
    "btspp://",
    "btl2cap://",
    "btgoep://",
    "tcpobex://",
    "irdaobex://",
    "file://",
    "urn:epc:id:",
    "urn:epc:tag:",
    "urn:epc:pat:",
    "urn:epc:raw:",
    "urn:epc:",
    "urn:nfc:",
];

/// Raw NDEF message bytes as stored on (or read from) a tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NdefMessage(Vec<u8>);

impl NdefMessage {
    /// Wrap raw bytes reported by a driver.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Message length in bytes; this is what must fit in the tag's capacity.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` when no bytes are present.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// NDEF encode/decode failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NdefError {
    /// URI payload exceeds what a single record length field can express.
    #[error("uri payload of {0} bytes is too large for one record")]
    PayloadTooLarge(usize),
    /// Message ended before the declared lengths.
    #[error("ndef message truncated")]
    Truncated,
    /// The first record is not flagged as message begin.
    #[error("ndef message does not start with a message-begin record")]
    MissingMessageBegin,
    /// Chunked records are not produced by this engine.
    #[error("chunked ndef records are not supported")]
    Chunked,
    /// The message holds an explicit empty record.
    #[error("ndef message holds an empty record")]
    EmptyRecord,
    /// More than one record (or trailing bytes) present.
    #[error("expected exactly one ndef record")]
    MultipleRecords,
    /// Record is not a well-known URI record.
    #[error("record is not a uri record (tnf {tnf:#04x})")]
    NotUri {
        /// Type name format of the record found.
        tnf: u8,
    },
    /// Identifier code outside the RTD-URI table.
    #[error("reserved uri identifier code {0:#04x}")]
    ReservedPrefix(u8),
    /// URI bytes are not UTF-8.
    #[error("uri is not valid utf-8")]
    InvalidUtf8,
}

/// Encode `uri` as a one-record NDEF message.
pub fn encode_uri(uri: &str) -> Result<NdefMessage, NdefError> {
    let (code, rest) = compress_prefix(uri);
    let payload_len = rest.len() + 1;

    let mut out = Vec::with_capacity(payload_len + 7);
    if let Ok(short_len) = u8::try_from(payload_len) {
        out.push(FLAG_MB | FLAG_ME | FLAG_SR | TNF_WELL_KNOWN);
        out.push(1);
        out.push(short_len);
    } else {
        let long_len =
            u32::try_from(payload_len).map_err(|_| NdefError::PayloadTooLarge(payload_len))?;
        out.push(FLAG_MB | FLAG_ME | TNF_WELL_KNOWN);
        out.push(1);
        out.extend_from_slice(&long_len.to_be_bytes());
    }
    out.extend_from_slice(URI_TYPE);
    out.push(code);
    out.extend_from_slice(rest.as_bytes());
    Ok(NdefMessage(out))
}

/// Decode the URI held by a one-record NDEF message.
pub fn decode_uri(bytes: &[u8]) -> Result<String, NdefError> {
    let mut cursor = Cursor { bytes, pos: 0 };
    let header = cursor.byte()?;
    if header & FLAG_MB == 0 {
        return Err(NdefError::MissingMessageBegin);
    }
    if header & FLAG_CF != 0 {
        return Err(NdefError::Chunked);
    }
    let tnf = header & TNF_MASK;

    let type_len = usize::from(cursor.byte()?);
    let payload_len = if header & FLAG_SR != 0 {
        usize::from(cursor.byte()?)
    } else {
        let raw = cursor.take(4)?;
        let len = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        usize::try_from(len).map_err(|_| NdefError::Truncated)?
    };
    let id_len = if header & FLAG_IL != 0 {
        usize::from(cursor.byte()?)
    } else {
        0
    };
    let record_type = cursor.take(type_len)?;
    cursor.take(id_len)?;
    let payload = cursor.take(payload_len)?;

    if header & FLAG_ME == 0 || cursor.pos != bytes.len() {
        return Err(NdefError::MultipleRecords);
    }
    if tnf == TNF_EMPTY {
        return Err(NdefError::EmptyRecord);
    }
    if tnf != TNF_WELL_KNOWN || record_type != URI_TYPE {
        return Err(NdefError::NotUri { tnf });
    }

    let (&code, rest) = payload.split_first().ok_or(NdefError::Truncated)?;
    let prefix = URI_PREFIXES
        .get(usize::from(code))
        .ok_or(NdefError::ReservedPrefix(code))?;
    let rest = std::str::from_utf8(rest).map_err(|_| NdefError::InvalidUtf8)?;
    Ok(format!("{prefix}{rest}"))
}

fn compress_prefix(uri: &str) -> (u8, &str) {
    let mut best: (u8, &str) = (0, uri);
    for (code, prefix) in (0u8..).zip(URI_PREFIXES.iter()).skip(1) {
        if let Some(rest) = uri.strip_prefix(prefix) {
            if rest.len() < best.1.len() {
                best = (code, rest);
            }
        }
    }
    best
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn byte(&mut self) -> Result<u8, NdefError> {
        Ok(self.take(1)?[0])
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], NdefError> {
        let end = self.pos.checked_add(n).ok_or(NdefError::Truncated)?;
        let slice = self.bytes.get(self.pos..end).ok_or(NdefError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }
}

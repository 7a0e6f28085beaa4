//! Serialization codec and the auto-save artifact format.
//!
//! This module provides:
//! - [`serialize`] / [`deserialize`]: JSON codec for any payload; decoding
//!   an absent (`null`) value is a hard [`CoreError::NullPayload`] failure
//! - [`encode_auto_save`] / [`decode_auto_save`]: the framed auto-save artifact
//! - [`decode_auto_save_header`]: read only the recency marker, cheaply
//!
//! # Artifact Layout
//!
//! ```text
//! Magic (4 B) | Header Len (u32 LE) | Header JSON | Payload JSON
//! ```
//!
//! - **Magic**: `b"KWAS"`, identifies the file format
//! - **Header**: JSON-serialized [`AutoSaveHeader`] (version, recency marker, digest)
//! - **Payload**: JSON-serialized [`ChangeLog`]
//!
//! The header's BLAKE3 digest and entry count must match the payload, and
//! every decoded change must pass [`ChangeLog::validate`]; otherwise the
//! whole artifact is rejected and nothing from it is applied.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::change::ChangeLog;
use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic bytes identifying an auto-save artifact.
pub const MAGIC: &[u8; 4] = b"KWAS";

/// Current artifact format version.
pub const FORMAT_VERSION: u8 = 1;

const MAGIC_LEN: usize = 4;

const LEN_PREFIX: usize = 4;

/// Magic plus the header length prefix.
const PREAMBLE_LEN: usize = 8;

// ---------------------------------------------------------------------------
// Generic codec
// ---------------------------------------------------------------------------

/// Encode a value as JSON bytes.
///
/// # Errors
///
/// Returns [`CoreError::Codec`] if the value cannot be represented.
pub fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, CoreError> {
    serde_json::to_vec(value).map_err(|e| CoreError::Codec(format!("serialization failed: {e}")))
}

/// Decode a value from JSON bytes.
///
/// # Errors
///
/// - [`CoreError::NullPayload`] if the bytes decode to `null`.
/// - [`CoreError::Codec`] for malformed JSON or a shape mismatch.
pub fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CoreError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| CoreError::Codec(format!("deserialization failed: {e}")))?;
    if value.is_null() {
        return Err(CoreError::NullPayload);
    }
    serde_json::from_value(value)
        .map_err(|e| CoreError::Codec(format!("deserialization failed: {e}")))
}

// ---------------------------------------------------------------------------
// Auto-save artifact
// ---------------------------------------------------------------------------

/// Unencrypted metadata at the start of an auto-save artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoSaveHeader {
    pub version: u8,
    /// Main-store sequence number the writing session started from.
    pub base_sequence: u64,
    pub written_at: DateTime<Utc>,
    pub entry_count: u64,
    /// BLAKE3 hex digest of the payload bytes.
    pub checksum: String,
}

/// Encode `changes` as an auto-save artifact.
///
/// # Errors
///
/// Returns [`CoreError::Codec`] if encoding fails or the header exceeds `u32`.
pub fn encode_auto_save(
    base_sequence: u64,
    written_at: DateTime<Utc>,
    changes: &ChangeLog,
) -> Result<Vec<u8>, CoreError> {
    let payload = serialize(changes)?;

    let header = AutoSaveHeader {
        version: FORMAT_VERSION,
        base_sequence,
        written_at,
        entry_count: u64::try_from(changes.len())
            .map_err(|_| CoreError::Codec("entry count overflow".into()))?,
        checksum: blake3::hash(&payload).to_hex().to_string(),
    };
    let header_json = serialize(&header)?;
    let header_len = u32::try_from(header_json.len())
        .map_err(|_| CoreError::Codec("header too large for u32 length".into()))?;

    let total = PREAMBLE_LEN
        .checked_add(header_json.len())
        .and_then(|s| s.checked_add(payload.len()))
        .ok_or_else(|| CoreError::Codec("artifact size overflow".into()))?;

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(&header_json);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Read only the header of an artifact.
///
/// # Errors
///
/// [`CoreError::BadMagic`], [`CoreError::Truncated`],
/// [`CoreError::UnsupportedVersion`], or a codec error for the header JSON.
pub fn decode_auto_save_header(data: &[u8]) -> Result<AutoSaveHeader, CoreError> {
    split_frame(data).map(|(header, _)| header)
}

/// Decode and verify a complete artifact.
///
/// # Errors
///
/// Everything [`decode_auto_save_header`] returns, plus
/// [`CoreError::ChecksumMismatch`], [`CoreError::NullPayload`],
/// [`CoreError::Codec`] (bad payload or entry-count mismatch) and
/// [`CoreError::MalformedChange`].
pub fn decode_auto_save(data: &[u8]) -> Result<(AutoSaveHeader, ChangeLog), CoreError> {
    let (header, payload) = split_frame(data)?;

    if blake3::hash(payload).to_hex().as_str() != header.checksum {
        return Err(CoreError::ChecksumMismatch);
    }

    let changes: ChangeLog = deserialize(payload)?;
    if u64::try_from(changes.len()).ok() != Some(header.entry_count) {
        return Err(CoreError::Codec(format!(
            "entry count mismatch: header says {}, payload has {}",
            header.entry_count,
            changes.len()
        )));
    }
    changes.validate()?;

    Ok((header, changes))
}

fn split_frame(data: &[u8]) -> Result<(AutoSaveHeader, &[u8]), CoreError> {
    let magic = data.get(..MAGIC_LEN).ok_or(CoreError::Truncated)?;
    if magic != MAGIC {
        return Err(CoreError::BadMagic);
    }

    let len_bytes: [u8; LEN_PREFIX] = data
        .get(MAGIC_LEN..PREAMBLE_LEN)
        .and_then(|b| b.try_into().ok())
        .ok_or(CoreError::Truncated)?;
    let header_len =
        usize::try_from(u32::from_le_bytes(len_bytes)).map_err(|_| CoreError::Truncated)?;
    let header_end = PREAMBLE_LEN
        .checked_add(header_len)
        .ok_or(CoreError::Truncated)?;

    let header_json = data
        .get(PREAMBLE_LEN..header_end)
        .ok_or(CoreError::Truncated)?;
    let header: AutoSaveHeader = deserialize(header_json)?;
    if header.version > FORMAT_VERSION {
        return Err(CoreError::UnsupportedVersion(header.version));
    }

    let payload = data.get(header_end..).ok_or(CoreError::Truncated)?;
    Ok((header, payload))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::change::Change;

    fn written_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 9, 8, 30, 0).unwrap()
    }

    fn sample_log() -> ChangeLog {
        vec![
            Change::add("id1", "password", "a"),
            Change::update("id1", "password", "b"),
            Change::delete("id2"),
        ]
        .into()
    }

    #[test]
    fn null_payload_is_rejected() {
        assert_eq!(
            deserialize::<ChangeLog>(b"null"),
            Err(CoreError::NullPayload)
        );
    }

    #[test]
    fn malformed_json_is_a_codec_error() {
        assert!(matches!(
            deserialize::<ChangeLog>(b"[{"),
            Err(CoreError::Codec(_))
        ));
    }

    #[test]
    fn artifact_roundtrip() {
        let bytes = encode_auto_save(7, written_at(), &sample_log()).unwrap();
        assert_eq!(&bytes[..4], MAGIC);

        let (header, changes) = decode_auto_save(&bytes).unwrap();
        assert_eq!(header.base_sequence, 7);
        assert_eq!(header.entry_count, 3);
        assert_eq!(header.written_at, written_at());
        assert_eq!(changes, sample_log());
    }

    #[test]
    fn header_is_readable_alone() {
        let bytes = encode_auto_save(3, written_at(), &sample_log()).unwrap();
        let header = decode_auto_save_header(&bytes).unwrap();
        assert_eq!(header.base_sequence, 3);
        assert_eq!(header.version, FORMAT_VERSION);
    }

    #[test]
    fn flipped_payload_byte_fails_checksum() {
        let mut bytes = encode_auto_save(1, written_at(), &sample_log()).unwrap();
        let last = bytes.len() - 2;
        bytes[last] ^= 0x01;
        assert_eq!(decode_auto_save(&bytes), Err(CoreError::ChecksumMismatch));
    }

    #[test]
    fn wrong_magic_is_rejected() {
        let mut bytes = encode_auto_save(1, written_at(), &sample_log()).unwrap();
        bytes[0] = b'X';
        assert_eq!(decode_auto_save(&bytes), Err(CoreError::BadMagic));
    }

    #[test]
    fn truncated_frames_are_rejected() {
        let bytes = encode_auto_save(1, written_at(), &sample_log()).unwrap();
        assert_eq!(decode_auto_save(&bytes[..2]), Err(CoreError::Truncated));
        assert_eq!(decode_auto_save(&bytes[..12]), Err(CoreError::Truncated));
    }

    #[test]
    fn malformed_change_is_rejected_even_with_valid_checksum() {
        let log: ChangeLog = vec![Change::update("", "password", "x")].into();
        let bytes = encode_auto_save(1, written_at(), &log).unwrap();
        assert!(matches!(
            decode_auto_save(&bytes),
            Err(CoreError::MalformedChange { index: 0, .. })
        ));
    }

    #[test]
    fn newer_version_is_rejected() {
        let header = AutoSaveHeader {
            version: FORMAT_VERSION + 1,
            base_sequence: 0,
            written_at: written_at(),
            entry_count: 0,
            checksum: String::new(),
        };
        let header_json = serialize(&header).unwrap();
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&u32::try_from(header_json.len()).unwrap().to_le_bytes());
        bytes.extend_from_slice(&header_json);
        bytes.extend_from_slice(b"[]");
        assert_eq!(
            decode_auto_save_header(&bytes),
            Err(CoreError::UnsupportedVersion(FORMAT_VERSION + 1))
        );
    }
}

//! Converts raw logs into canonical `Registration` / `Transfer` records.
//!
//! Pure: no I/O, no side effects. Addresses are lowercased, and 32-byte ABI
//! words are narrowed to `u64` through `U256` so on-chain integers keep
//! exact precision; narrowing failures surface as `ValueOverflow`, never as
//! silent truncation.

use alloy_primitives::U256;

use assetsync_core::{AssetEvent, Registration, SyncError, Transfer};

use crate::reader::RawLog;
use crate::topics::EventKind;

const WORD: usize = 32;

/// Normalize one raw log into a canonical event.
///
/// `block_timestamp` is the containing block's timestamp, resolved by the
/// caller (the engine caches it per sync pass). Logs missing expected topics
/// or with undecodable data fail with `MalformedEvent`; numeric fields wider
/// than `u64`/`i64` fail with `ValueOverflow`.
pub fn normalize(log: &RawLog, block_timestamp: i64) -> Result<AssetEvent, SyncError> {
    let topic0 = log
        .topics
        .first()
        .ok_or_else(|| SyncError::MalformedEvent("log has no topics".into()))?;
    let kind = EventKind::from_topic0(topic0)
        .ok_or_else(|| SyncError::MalformedEvent(format!("unknown topic0 {topic0}")))?;

    match kind {
        EventKind::Registration => {
            let asset_id = topic_u64(log, 1, "asset_id")?;
            let owner = topic_address(log, 2)?;
            let data = decode_data(&log.data)?;
            // ABI tail: word 0 = offset to the description string,
            // word 1 = timestamp, then length-prefixed string bytes.
            let event_timestamp = timestamp_from_word(&data, 1)?;
            let description = abi_string(&data, 0)?;

            Ok(AssetEvent::Registered(Registration {
                asset_id,
                owner,
                description,
                event_timestamp,
                block_number: log.block_number_u64(),
                tx_hash: log.tx_hash.clone(),
                log_index: log.log_index_u32(),
                block_timestamp,
            }))
        }
        EventKind::Transfer => {
            let asset_id = topic_u64(log, 1, "asset_id")?;
            let previous_owner = topic_address(log, 2)?;
            let new_owner = topic_address(log, 3)?;
            let data = decode_data(&log.data)?;
            let event_timestamp = timestamp_from_word(&data, 0)?;

            Ok(AssetEvent::Transferred(Transfer {
                asset_id,
                previous_owner,
                new_owner,
                event_timestamp,
                block_number: log.block_number_u64(),
                tx_hash: log.tx_hash.clone(),
                log_index: log.log_index_u32(),
                block_timestamp,
            }))
        }
    }
}

// ─── Word helpers ─────────────────────────────────────────────────────────────

fn topic_word<'a>(log: &'a RawLog, index: usize) -> Result<&'a str, SyncError> {
    log.topics
        .get(index)
        .map(String::as_str)
        .ok_or_else(|| SyncError::MalformedEvent(format!("missing topic {index}")))
}

fn topic_u64(log: &RawLog, index: usize, field: &'static str) -> Result<u64, SyncError> {
    let word = topic_word(log, index)?;
    let hex = word.strip_prefix("0x").unwrap_or(word);
    let value = U256::from_str_radix(hex, 16)
        .map_err(|_| SyncError::MalformedEvent(format!("non-hex topic {index}: {word}")))?;
    u64::try_from(value).map_err(|_| SyncError::ValueOverflow {
        field,
        value: value.to_string(),
    })
}

/// An address topic is a 32-byte word with the address in the last 20 bytes.
fn topic_address(log: &RawLog, index: usize) -> Result<String, SyncError> {
    let word = topic_word(log, index)?;
    let hex = word.strip_prefix("0x").unwrap_or(word);
    if hex.len() < 40 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(SyncError::MalformedEvent(format!(
            "topic {index} is not an address word: {word}"
        )));
    }
    let tail = &hex[hex.len() - 40..];
    Ok(format!("0x{}", tail.to_ascii_lowercase()))
}

fn decode_data(data: &str) -> Result<Vec<u8>, SyncError> {
    let hex = data.strip_prefix("0x").unwrap_or(data);
    hex::decode(hex).map_err(|e| SyncError::MalformedEvent(format!("non-hex data: {e}")))
}

fn data_word(data: &[u8], index: usize) -> Result<&[u8], SyncError> {
    let range = index
        .checked_mul(WORD)
        .and_then(|start| start.checked_add(WORD).map(|end| start..end))
        .ok_or_else(|| SyncError::MalformedEvent(format!("word index {index} overflows")))?;
    data.get(range)
        .ok_or_else(|| SyncError::MalformedEvent(format!("data too short for word {index}")))
}

fn word_u64(data: &[u8], index: usize, field: &'static str) -> Result<u64, SyncError> {
    let word = data_word(data, index)?;
    let value = U256::from_be_slice(word);
    u64::try_from(value).map_err(|_| SyncError::ValueOverflow {
        field,
        value: value.to_string(),
    })
}

fn timestamp_from_word(data: &[u8], index: usize) -> Result<i64, SyncError> {
    let raw = word_u64(data, index, "timestamp")?;
    i64::try_from(raw).map_err(|_| SyncError::ValueOverflow {
        field: "timestamp",
        value: raw.to_string(),
    })
}

/// Decode a dynamic ABI string whose offset word sits at `head_index`.
fn abi_string(data: &[u8], head_index: usize) -> Result<String, SyncError> {
    let offset = word_u64(data, head_index, "string_offset")? as usize;
    if offset % WORD != 0 || offset.checked_add(WORD).map_or(true, |end| end > data.len()) {
        return Err(SyncError::MalformedEvent(format!(
            "string offset {offset} out of bounds"
        )));
    }
    let len = word_u64(data, offset / WORD, "string_length")? as usize;
    // The length word is log-controlled; bound it before any offset math.
    if len > data.len() {
        return Err(SyncError::MalformedEvent(format!(
            "string of length {len} exceeds data"
        )));
    }
    let start = offset + WORD;
    let bytes = start
        .checked_add(len)
        .and_then(|end| data.get(start..end))
        .ok_or_else(|| {
            SyncError::MalformedEvent(format!("string of length {len} exceeds data"))
        })?;
    String::from_utf8(bytes.to_vec())
        .map_err(|e| SyncError::MalformedEvent(format!("non-utf8 string: {e}")))
}

// ─── Tests ────────────────────────────────────────────────────────────────────

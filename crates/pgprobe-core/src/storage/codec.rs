//! Status file encoding.
//!
//! File layout:
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ HEADER (16 bytes)                            │
//! │   magic: [u8; 4]        = b"PGPS"            │
//! │   version: u16          = 1                  │
//! │   _reserved: u16        = 0                  │
//! │   payload_len: u32                           │
//! │   payload_crc32: u32                         │
//! ├──────────────────────────────────────────────┤
//! │ PAYLOAD                                      │
//! │   postcard(StatusData)                       │
//! └──────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use super::StoreError;

const MAGIC: [u8; 4] = *b"PGPS";
const VERSION: u16 = 1;
const HEADER_SIZE: usize = 16;

/// One persisted observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct StoredEntry {
    pub key: String,
    pub value: f64,
    pub observed_secs: i64,
    pub observed_nanos: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct StatusData {
    pub entries: Vec<StoredEntry>,
}

pub(crate) fn encode(data: &StatusData) -> Result<Vec<u8>, StoreError> {
    let payload =
        postcard::to_allocvec(data).map_err(|e| StoreError::Encode(e.to_string()))?;
    let payload_len = u32::try_from(payload.len())
        .map_err(|_| StoreError::Encode("status payload too large".to_string()))?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&MAGIC);
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&0u16.to_le_bytes());
    buf.extend_from_slice(&payload_len.to_le_bytes());
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

pub(crate) fn decode(bytes: &[u8]) -> Result<StatusData, StoreError> {
    if bytes.len() < HEADER_SIZE {
        return Err(StoreError::Corrupt(format!(
            "truncated header ({} bytes)",
            bytes.len()
        )));
    }
    if bytes[0..4] != MAGIC {
        return Err(StoreError::Corrupt(format!(
            "invalid magic: expected PGPS, got {:?}",
            &bytes[0..4]
        )));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != VERSION {
        return Err(StoreError::Corrupt(format!(
            "unsupported version: {}",
            version
        )));
    }
    let payload_len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
    let crc = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);

    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != payload_len {
        return Err(StoreError::Corrupt(format!(
            "payload length mismatch: header says {}, found {}",
            payload_len,
            payload.len()
        )));
    }
    if crc32fast::hash(payload) != crc {
        return Err(StoreError::Corrupt("payload checksum mismatch".to_string()));
    }

    postcard::from_bytes(payload).map_err(|e| StoreError::Corrupt(e.to_string()))
}

//! Record types consumed by the engine

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A single record fetched from a partition of the event log.
///
/// The same shape carries changelog records while a partition's state store
/// is being rebuilt before its worker goes live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerRecord {
    /// Offset of this record within the partition
    pub offset: i64,

    /// Timestamp of the record (milliseconds since epoch)
    pub timestamp: i64,

    /// Optional key for the record
    pub key: Option<Bytes>,

    /// Value of the record
    pub value: Bytes,

    /// Optional headers
    pub headers: Vec<Header>,
}

/// A record header (key-value pair)
///
/// `ConsumerRecord` uses `Bytes` (Arc-based) for `key` and `value`, making
/// cloning O(1). Header keys are typically short and few, so a `String` key
/// is acceptable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    /// Header key
    pub key: String,

    /// Header value
    pub value: Bytes,
}

impl ConsumerRecord {
    /// Create a new record
    pub fn new(offset: i64, timestamp: i64, key: Option<Bytes>, value: Bytes) -> Self {
        Self {
            offset,
            timestamp,
            key,
            value,
            headers: Vec::new(),
        }
    }

    /// Create a new record with headers
    pub fn with_headers(
        offset: i64,
        timestamp: i64,
        key: Option<Bytes>,
        value: Bytes,
        headers: Vec<Header>,
    ) -> Self {
        Self {
            offset,
            timestamp,
            key,
            value,
            headers,
        }
    }

    /// Total payload size in bytes (key + value, excluding headers)
    pub fn payload_size(&self) -> usize {
        self.key.as_ref().map(|k| k.len()).unwrap_or(0) + self.value.len()
    }
}

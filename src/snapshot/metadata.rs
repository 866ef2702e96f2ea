//! Sync watermark persisted alongside the index.

use crate::types::Timestamp;
use serde::{Deserialize, Serialize};

/// Progress of the last successful sync.
///
/// Wire form: `{"last_timestamp": "2024-01-01T00:00:00.000000", "last_index": 3}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncMetadata {
    /// Largest record timestamp already folded into the index.
    pub last_timestamp: Timestamp,
    /// Index size after the last successful sync.
    pub last_index: u64,
}

impl Default for SyncMetadata {
    fn default() -> Self {
        Self {
            last_timestamp: Timestamp::epoch(),
            last_index: 0,
        }
    }
}

impl SyncMetadata {
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_epoch() {
        let json = String::from_utf8(SyncMetadata::default().to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            r#"{"last_timestamp":"1970-01-01T00:00:00.000000","last_index":0}"#
        );
    }

    #[test]
    fn test_reads_offset_timestamps() {
        let meta =
            SyncMetadata::from_json(br#"{"last_timestamp":"2024-03-01T12:00:00.250000+00:00","last_index":7}"#)
                .unwrap();
        assert_eq!(meta.last_index, 7);
        assert_eq!(meta.last_timestamp.to_string(), "2024-03-01T12:00:00.250000");
    }

    #[test]
    fn test_rejects_missing_fields() {
        assert!(SyncMetadata::from_json(br#"{"last_index":1}"#).is_err());
        assert!(SyncMetadata::from_json(br#"{"last_timestamp":"x","last_index":1}"#).is_err());
    }
}

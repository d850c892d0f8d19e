//! Cross-process batch format
//!
//! ```proto
//! message SignalItem  { string to_peer_id = 1; bytes data = 2; }
//! message SignalBatch { repeated SignalItem items = 1; uint32 version = 2; }
//! ```

use prost::Message;

use crate::error::Result;

/// Version written into every batch this build produces
pub const BATCH_VERSION: u32 = 1;

/// One signaling message bound for a peer on the receiving process
#[derive(Clone, PartialEq, prost::Message)]
pub struct SignalItem {
    #[prost(string, tag = "1")]
    pub to_peer_id: String,

    /// UTF-8 JSON of the message as the destination should receive it
    #[prost(bytes = "vec", tag = "2")]
    pub data: Vec<u8>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct SignalBatch {
    #[prost(message, repeated, tag = "1")]
    pub items: Vec<SignalItem>,

    /// Zero in batches from producers that predate versioning
    #[prost(uint32, tag = "2")]
    pub version: u32,
}

impl SignalItem {
    pub fn new(to_peer_id: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            to_peer_id: to_peer_id.into(),
            data: data.into(),
        }
    }
}

impl SignalBatch {
    pub fn new(items: Vec<SignalItem>) -> Self {
        Self {
            items,
            version: BATCH_VERSION,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::decode(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let batch = SignalBatch::new(vec![
            SignalItem::new("peer-aaaaaa", br#"{"action":"signal"}"#.to_vec()),
            SignalItem::new("peer-bbbbbb", b"Cabc".to_vec()),
        ]);
        let decoded = SignalBatch::from_bytes(&batch.to_bytes()).unwrap();
        assert_eq!(decoded, batch);
        assert_eq!(decoded.version, BATCH_VERSION);
    }

    #[test]
    fn test_unversioned_batch() {
        // items only, as written by producers without the version field
        let legacy = SignalBatch {
            items: vec![SignalItem::new("peer-aaaaaa", b"{}".to_vec())],
            version: 0,
        };
        let decoded = SignalBatch::from_bytes(&legacy.to_bytes()).unwrap();
        assert_eq!(decoded.version, 0);
        assert_eq!(decoded.items.len(), 1);
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(SignalBatch::from_bytes(&[0xff, 0xff, 0xff]).is_err());
    }
}

use crate::codec::Codec;
use crate::error::{StorageError, StorageResult};

/// JSON codec. The persisted-on-disk default.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["json"]
    }

    fn encode(&self, value: &serde_json::Value) -> StorageResult<Vec<u8>> {
        serde_json::to_vec_pretty(value).map_err(|e| StorageError::Serialization {
            codec: self.name().to_string(),
            message: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> StorageResult<serde_json::Value> {
        serde_json::from_slice(bytes).map_err(|e| StorageError::Deserialization {
            codec: self.name().to_string(),
            message: e.to_string(),
        })
    }
}

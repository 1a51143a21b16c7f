use crate::codec::Codec;
use crate::error::{StorageError, StorageResult};

/// YAML codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct YamlCodec;

impl Codec for YamlCodec {
    fn name(&self) -> &'static str {
        "yaml"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["yaml", "yml"]
    }

    fn encode(&self, value: &serde_json::Value) -> StorageResult<Vec<u8>> {
        serde_yaml::to_string(value)
            .map(|s| s.into_bytes())
            .map_err(|e| StorageError::Serialization {
                codec: self.name().to_string(),
                message: e.to_string(),
            })
    }

    fn decode(&self, bytes: &[u8]) -> StorageResult<serde_json::Value> {
        serde_yaml::from_slice(bytes).map_err(|e| StorageError::Deserialization {
            codec: self.name().to_string(),
            message: e.to_string(),
        })
    }
}

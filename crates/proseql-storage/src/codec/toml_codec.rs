use crate::codec::Codec;
use crate::error::{StorageError, StorageResult};

/// TOML codec. Values must serialize to a table at the top level, which
/// holds for ProseQL's persisted shape (a map from id to record).
#[derive(Debug, Default, Clone, Copy)]
pub struct TomlCodec;

impl Codec for TomlCodec {
    fn name(&self) -> &'static str {
        "toml"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["toml"]
    }

    fn encode(&self, value: &serde_json::Value) -> StorageResult<Vec<u8>> {
        let as_toml: toml::Value =
            serde_json::from_value(value.clone()).map_err(|e| StorageError::Serialization {
                codec: self.name().to_string(),
                message: e.to_string(),
            })?;
        toml::to_string_pretty(&as_toml)
            .map(|s| s.into_bytes())
            .map_err(|e| StorageError::Serialization {
                codec: self.name().to_string(),
                message: e.to_string(),
            })
    }

    fn decode(&self, bytes: &[u8]) -> StorageResult<serde_json::Value> {
        let text = std::str::from_utf8(bytes).map_err(|e| StorageError::Deserialization {
            codec: self.name().to_string(),
            message: e.to_string(),
        })?;
        let as_toml: toml::Value = toml::from_str(text).map_err(|e| StorageError::Deserialization {
            codec: self.name().to_string(),
            message: e.to_string(),
        })?;
        serde_json::to_value(as_toml).map_err(|e| StorageError::Deserialization {
            codec: self.name().to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn roundtrip() {
        let codec = TomlCodec;
        let value = json!({"user-1": {"id": "user-1", "age": 30, "active": true}});
        let bytes = codec.encode(&value).unwrap();
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, value);
    }
}

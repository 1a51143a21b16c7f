use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::codec::{Codec, JsonCodec, ProseCodec, TomlCodec, YamlCodec};
use crate::error::{StorageError, StorageResult};

/// Serializer registry: dispatches `serialize`/`deserialize` to a
/// codec chosen by file extension, or explicit override.
///
/// Built with the four built-in codecs registered; custom codecs supplied by
/// a plugin (§4.14) are added via [`CodecRegistry::register`].
#[derive(Clone)]
pub struct CodecRegistry {
    by_extension: HashMap<&'static str, Arc<dyn Codec>>,
}

impl CodecRegistry {
    /// A registry with the JSON, YAML, TOML, and prose codecs registered.
    pub fn with_builtins() -> Self {
        let mut registry = CodecRegistry {
            by_extension: HashMap::new(),
        };
        registry.register(Arc::new(JsonCodec));
        registry.register(Arc::new(YamlCodec));
        registry.register(Arc::new(TomlCodec));
        registry.register(Arc::new(ProseCodec));
        registry
    }

    /// Register a codec under every extension it claims, overwriting any
    /// existing handler for the same extension.
    pub fn register(&mut self, codec: Arc<dyn Codec>) {
        for ext in codec.extensions() {
            self.by_extension.insert(ext, codec.clone());
        }
    }

    pub fn by_extension(&self, extension: &str) -> StorageResult<Arc<dyn Codec>> {
        self.by_extension
            .get(extension)
            .cloned()
            .ok_or_else(|| StorageError::UnsupportedFormat {
                extension: extension.to_string(),
            })
    }

    /// Resolve a codec from a file path's extension.
    pub fn by_path(&self, path: &Path) -> StorageResult<Arc<dyn Codec>> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| StorageError::UnsupportedFormat {
                extension: path.display().to_string(),
            })?;
        self.by_extension(extension)
    }

    pub fn serialize(&self, value: &serde_json::Value, extension: &str) -> StorageResult<Vec<u8>> {
        self.by_extension(extension)?.encode(value)
    }

    pub fn deserialize(&self, bytes: &[u8], extension: &str) -> StorageResult<serde_json::Value> {
        self.by_extension(extension)?.decode(bytes)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    #[test]
    fn dispatches_by_extension() {
        let registry = CodecRegistry::with_builtins();
        let value = json!({"1": {"id": "1"}});
        let bytes = registry.serialize(&value, "json").unwrap();
        let decoded = registry.deserialize(&bytes, "json").unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn unknown_extension_is_unsupported_format() {
        let registry = CodecRegistry::with_builtins();
        let err = registry.by_extension("exotic").unwrap_err();
        assert!(matches!(err, StorageError::UnsupportedFormat { .. }));
    }

    #[test]
    fn by_path_resolves_extension() {
        let registry = CodecRegistry::with_builtins();
        let codec = registry.by_path(&PathBuf::from("users.yaml")).unwrap();
        assert_eq!(codec.name(), "yaml");
    }
}

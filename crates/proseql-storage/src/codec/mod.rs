//! Serializer registry and the four codecs it dispatches to:
//! JSON, YAML, TOML, and the in-house "prose" line-oriented format.

mod json;
mod prose;
mod registry;
mod toml_codec;
mod yaml;

pub use json::JsonCodec;
pub use prose::ProseCodec;
pub use registry::CodecRegistry;
pub use toml_codec::TomlCodec;
pub use yaml::YamlCodec;

use crate::error::StorageResult;

/// A format plugged into the [`CodecRegistry`].
///
/// `{name, extensions[], encode(value, opts?), decode(bytes)}`;
/// `opts` is represented here as the absence of any parameter — none of the
/// four built-in codecs take encode-time options, and custom codecs added
/// through the plugin registry (§4.14) can close over their own config.
pub trait Codec: Send + Sync {
    /// Human-readable codec name (e.g. `"json"`).
    fn name(&self) -> &'static str;

    /// File extensions this codec handles, without the leading dot.
    fn extensions(&self) -> &'static [&'static str];

    /// Serialize a value to bytes.
    fn encode(&self, value: &serde_json::Value) -> StorageResult<Vec<u8>>;

    /// Parse bytes into a value.
    fn decode(&self, bytes: &[u8]) -> StorageResult<serde_json::Value>;
}

//! Cumulative context codec
//!
//! Every node carries the outputs of all of its ancestors, keyed by ancestor
//! id. The map grows with the depth of the flow, so once its JSON form passes
//! a size threshold it is stored zstd-compressed and base64-encoded.
//! Gzip blobs written by earlier canvas versions are still read.
//!
//! On the wire a context is always `{ "compressed": bool, "blob": ... }`,
//! where `blob` is the entry map when uncompressed and a base64 string
//! otherwise.

use std::collections::BTreeMap;
use std::io::Read;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::EngineConfig;
use crate::error::{Result, TaskflowError};
use crate::types::NodeId;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// One ancestor's contribution to a cumulative context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    /// The ancestor's output at the time it was recorded
    pub output: Value,
    /// The ancestor's node type tag
    #[serde(rename = "type")]
    pub node_type: String,
    /// Monotonic stamp of when the entry was recorded
    pub version: i64,
}

/// Logical content of a cumulative context
pub type ContextBlob = BTreeMap<NodeId, ContextEntry>;

/// Stored form of a cumulative context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawContext", into = "RawContext")]
pub enum CumulativeContext {
    /// Plain entry map
    Inline(ContextBlob),
    /// zstd-compressed JSON of the entry map
    Compressed(Vec<u8>),
}

impl Default for CumulativeContext {
    fn default() -> Self {
        CumulativeContext::Inline(ContextBlob::new())
    }
}

impl CumulativeContext {
    pub fn is_compressed(&self) -> bool {
        matches!(self, CumulativeContext::Compressed(_))
    }
}

#[derive(Serialize, Deserialize)]
struct RawContext {
    #[serde(default)]
    compressed: bool,
    #[serde(default)]
    blob: Value,
}

impl TryFrom<RawContext> for CumulativeContext {
    type Error = String;

    fn try_from(raw: RawContext) -> std::result::Result<Self, Self::Error> {
        if raw.compressed {
            let Value::String(encoded) = raw.blob else {
                return Err("compressed context blob must be a base64 string".to_string());
            };
            let bytes = base64::decode(encoded).map_err(|e| e.to_string())?;
            Ok(CumulativeContext::Compressed(bytes))
        } else if raw.blob.is_null() {
            Ok(CumulativeContext::default())
        } else {
            let blob: ContextBlob = serde_json::from_value(raw.blob).map_err(|e| e.to_string())?;
            Ok(CumulativeContext::Inline(blob))
        }
    }
}

impl From<CumulativeContext> for RawContext {
    fn from(ctx: CumulativeContext) -> Self {
        match ctx {
            CumulativeContext::Inline(blob) => RawContext {
                compressed: false,
                blob: serde_json::to_value(blob).unwrap_or(Value::Null),
            },
            CumulativeContext::Compressed(bytes) => RawContext {
                compressed: true,
                blob: Value::String(base64::encode(bytes)),
            },
        }
    }
}

/// Encodes, decodes and merges cumulative contexts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextCodec {
    /// Serialized size above which a context is stored compressed
    pub compression_threshold: usize,
    /// zstd compression level
    pub compression_level: i32,
}

impl Default for ContextCodec {
    fn default() -> Self {
        Self::new(
            crate::config::defaults::COMPRESSION_THRESHOLD_BYTES,
            crate::config::defaults::COMPRESSION_LEVEL,
        )
    }
}

impl ContextCodec {
    pub fn new(compression_threshold: usize, compression_level: i32) -> Self {
        Self {
            compression_threshold,
            compression_level,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.compression_threshold_bytes, config.compression_level)
    }

    /// Return the logical entry map of a context
    pub fn decompress(&self, ctx: &CumulativeContext) -> Result<ContextBlob> {
        match ctx {
            CumulativeContext::Inline(blob) => Ok(blob.clone()),
            CumulativeContext::Compressed(bytes) => {
                let json = if bytes.starts_with(&GZIP_MAGIC) {
                    let mut json = Vec::new();
                    flate2::read::GzDecoder::new(&bytes[..])
                        .read_to_end(&mut json)
                        .map_err(|e| TaskflowError::Compression(e.to_string()))?;
                    json
                } else {
                    zstd::decode_all(&bytes[..])
                        .map_err(|e| TaskflowError::Compression(e.to_string()))?
                };
                Ok(serde_json::from_slice(&json)?)
            }
        }
    }

    /// Store a blob, compressing it when its JSON passes the threshold
    pub fn encode(&self, blob: ContextBlob) -> Result<CumulativeContext> {
        let json = serde_json::to_vec(&blob)?;
        if json.len() <= self.compression_threshold {
            return Ok(CumulativeContext::Inline(blob));
        }
        let compressed = zstd::encode_all(&json[..], self.compression_level)
            .map_err(|e| TaskflowError::Compression(e.to_string()))?;
        log::debug!(
            "Compressed context of {} entries: {} -> {} bytes",
            blob.len(),
            json.len(),
            compressed.len()
        );
        Ok(CumulativeContext::Compressed(compressed))
    }

    /// Record `entry` under `parent_id`, replacing any earlier entry
    pub fn merge(&self, mut base: ContextBlob, parent_id: &str, entry: ContextEntry) -> ContextBlob {
        base.insert(parent_id.to_string(), entry);
        base
    }

    /// Fold another blob into `base`
    ///
    /// Entries of `other` overwrite same-id entries of `base`; unrelated
    /// entries of `base` are kept.
    pub fn merge_blob(&self, mut base: ContextBlob, other: ContextBlob) -> ContextBlob {
        base.extend(other);
        base
    }

    /// Extend `base` with one parent's context and an entry for the parent
    pub fn accumulate(
        &self,
        base: ContextBlob,
        parent_ctx: &CumulativeContext,
        parent_id: &str,
        parent_type: &str,
        parent_output: Option<&Value>,
        version: i64,
    ) -> Result<ContextBlob> {
        let inherited = self.decompress(parent_ctx)?;
        let merged = self.merge_blob(base, inherited);
        let entry = ContextEntry {
            output: parent_output.cloned().unwrap_or(Value::Null),
            node_type: parent_type.to_string(),
            version,
        };
        Ok(self.merge(merged, parent_id, entry))
    }

    /// Context a child inherits from a single parent
    pub fn build_child_context(
        &self,
        parent_ctx: &CumulativeContext,
        parent_id: &str,
        parent_type: &str,
        parent_output: Option<&Value>,
        version: i64,
    ) -> Result<ContextBlob> {
        self.accumulate(
            ContextBlob::new(),
            parent_ctx,
            parent_id,
            parent_type,
            parent_output,
            version,
        )
    }

    /// Drop one ancestor's entry, re-encoding the result
    pub fn without_entry(&self, ctx: &CumulativeContext, id: &str) -> Result<CumulativeContext> {
        let mut blob = self.decompress(ctx)?;
        blob.remove(id);
        self.encode(blob)
    }
}

//! The block descriptor (`meta.json`) in the Prometheus/Thanos layout.
//!
//! Decoding is lenient: missing or `null` fields take their zero value and
//! unknown fields are ignored. The document itself must be a JSON object.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{de, Deserialize, Deserializer, Serialize};
use ulid::Ulid;

/// Provenance tag stamped on every block that enters through this service.
pub const UPLOAD_SOURCE: &str = "upload";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockMeta {
    #[serde(default = "Ulid::nil")]
    pub ulid: Ulid,
    #[serde(rename = "minTime", default, deserialize_with = "null_as_default")]
    pub min_time: i64,
    #[serde(rename = "maxTime", default, deserialize_with = "null_as_default")]
    pub max_time: i64,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "BlockStats::is_empty"
    )]
    pub stats: BlockStats,
    #[serde(default, deserialize_with = "null_as_default")]
    pub compaction: BlockCompaction,
    #[serde(default, deserialize_with = "null_as_default")]
    pub version: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub thanos: ThanosMeta,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockStats {
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "is_zero")]
    pub num_samples: u64,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "is_zero")]
    pub num_float_samples: u64,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "is_zero")]
    pub num_histogram_samples: u64,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "is_zero")]
    pub num_series: u64,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "is_zero")]
    pub num_chunks: u64,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "is_zero")]
    pub num_tombstones: u64,
}

impl BlockStats {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockCompaction {
    #[serde(default, deserialize_with = "null_as_default")]
    pub level: i32,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Ulid>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub deletable: bool,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<BlockDesc>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub failed: bool,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockDesc {
    #[serde(default = "Ulid::nil")]
    pub ulid: Ulid,
    #[serde(rename = "minTime", default, deserialize_with = "null_as_default")]
    pub min_time: i64,
    #[serde(rename = "maxTime", default, deserialize_with = "null_as_default")]
    pub max_time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThanosMeta {
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "is_zero_i32")]
    pub version: i32,
    /// External labels. `None` when the document carried no mapping.
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub downsample: Downsample,
    #[serde(default, deserialize_with = "null_as_default")]
    pub source: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub segment_files: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<BlockFile>,
    /// Index statistics, carried through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_stats: Option<serde_json::Value>,
    /// Producer-specific data, carried through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Downsample {
    #[serde(default, deserialize_with = "null_as_default")]
    pub resolution: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockFile {
    #[serde(default, deserialize_with = "null_as_default")]
    pub rel_path: String,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "is_zero_i64")]
    pub size_bytes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<ObjectHash>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectHash {
    #[serde(rename = "hashFunc")]
    pub hash_func: String,
    pub value: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

fn is_zero(v: &u64) -> bool {
    *v == 0
}

fn is_zero_i32(v: &i32) -> bool {
    *v == 0
}

fn is_zero_i64(v: &i64) -> bool {
    *v == 0
}

fn unexpected(value: &serde_json::Value) -> de::Unexpected<'_> {
    match value {
        serde_json::Value::Null => de::Unexpected::Unit,
        serde_json::Value::Bool(b) => de::Unexpected::Bool(*b),
        serde_json::Value::Number(_) => de::Unexpected::Other("number"),
        serde_json::Value::String(s) => de::Unexpected::Str(s),
        serde_json::Value::Array(_) => de::Unexpected::Seq,
        serde_json::Value::Object(_) => de::Unexpected::Map,
    }
}

impl BlockMeta {
    pub fn from_json(data: &[u8]) -> serde_json::Result<Self> {
        let value: serde_json::Value = serde_json::from_slice(data)?;
        if !value.is_object() {
            return Err(de::Error::invalid_type(
                unexpected(&value),
                &"a block descriptor object",
            ));
        }
        serde_json::from_value(value)
    }

    /// Newline-terminated JSON encoding.
    pub fn to_json(&self) -> serde_json::Result<Bytes> {
        let mut buf = serde_json::to_vec(self)?;
        buf.push(b'\n');
        Ok(Bytes::from(buf))
    }

    pub fn labels(&self) -> Option<&BTreeMap<String, String>> {
        self.thanos.labels.as_ref()
    }
}

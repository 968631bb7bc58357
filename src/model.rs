use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque key/value bag carried alongside an entry.
pub type Metadata = Map<String, Value>;

/// Wall clock in Unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Dedup digest over the raw vector bytes followed by the text bytes.
///
/// SeaHash rendered as 16 hex chars. Collisions are tolerated: a collision
/// only means a real change is treated as a no-op re-upsert.
pub fn compute_checksum(vector: Option<&[f32]>, text: Option<&str>) -> String {
    let mut bytes = Vec::with_capacity(vector.map_or(0, |v| v.len() * 4) + text.map_or(0, str::len));
    if let Some(v) = vector {
        for component in v {
            bytes.extend_from_slice(&component.to_le_bytes());
        }
    }
    if let Some(t) = text {
        bytes.extend_from_slice(t.as_bytes());
    }
    format!("{:016x}", seahash::hash(&bytes))
}

/// The unit of indexed content
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Entry {
    /// Caller-chosen key
    pub id: String,

    /// Dense embedding
    #[serde(default)]
    pub vector: Option<Vec<f32>>,

    /// Node/edge payload, passed through untouched
    #[serde(default)]
    pub graph_data: Option<Value>,

    /// Raw text for the downstream full-text index
    #[serde(default)]
    pub text: Option<String>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Unix millis of the last mutation
    pub timestamp: u64,

    pub checksum: String,
}

impl Entry {
    pub fn new(
        id: impl Into<String>,
        vector: Option<Vec<f32>>,
        graph_data: Option<Value>,
        text: Option<String>,
        metadata: Metadata,
    ) -> Self {
        let checksum = compute_checksum(vector.as_deref(), text.as_deref());
        Self {
            id: id.into(),
            vector,
            graph_data,
            text,
            metadata,
            timestamp: now_millis(),
            checksum,
        }
    }
}

/// Upstream write: everything but the id is optional.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct UpsertRequest {
    pub id: String,
    #[serde(default)]
    pub vector: Option<Vec<f32>>,
    #[serde(default)]
    pub graph_data: Option<Value>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl UpsertRequest {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), ..Default::default() }
    }

    pub fn vector(mut self, vector: Vec<f32>) -> Self {
        self.vector = Some(vector);
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn graph_data(mut self, graph_data: Value) -> Self {
        self.graph_data = Some(graph_data);
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn into_entry(self) -> Entry {
        Entry::new(self.id, self.vector, self.graph_data, self.text, self.metadata)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WalOp {
    Insert,
    Update,
    Delete,
}

/// Body of a WAL record: a full entry for writes, a tombstone for deletes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum WalPayload {
    Entry(Entry),
    Tombstone { id: String, timestamp: u64 },
}

impl WalPayload {
    pub fn id(&self) -> &str {
        match self {
            WalPayload::Entry(entry) => &entry.id,
            WalPayload::Tombstone { id, .. } => id,
        }
    }
}

/// One line of the write-ahead log
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WalRecord {
    pub op: WalOp,
    pub entry: WalPayload,
    pub ts: u64,
}

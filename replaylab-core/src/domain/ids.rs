use serde::{Deserialize, Serialize};
use std::fmt;

/// Order ID, unique and monotonically increasing within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "O{}", self.0)
    }
}

/// Deterministic content hash of a loaded market data set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetHash(pub String);

impl DatasetHash {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(blake3::hash(bytes).to_hex().to_string())
    }
}

impl fmt::Display for DatasetHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic run ID (config + dataset).
///
/// Two runs with the same configuration over the same data always get the
/// same ID, which makes result artifacts comparable across machines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// BLAKE3 over the canonical JSON of `config` plus the dataset hash.
    pub fn derive<T: Serialize>(config: &T, dataset: &DatasetHash) -> Self {
        let canonical = serde_json::json!({
            "config": config,
            "dataset_hash": &dataset.0,
        });
        Self(blake3::hash(canonical.to_string().as_bytes()).to_hex().to_string())
    }

    /// First 12 hex characters, for log lines and file names.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

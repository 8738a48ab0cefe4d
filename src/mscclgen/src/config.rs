use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Program metadata: the attributes of the document's root element.
///
/// Defaults mirror a single-channel out-of-place allgather over two
/// ranks; generators override what they need.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgramConfig {
    pub name: String,
    #[serde(default = "default_proto")]
    pub proto: String,
    #[serde(default = "default_nchannels")]
    pub nchannels: u32,
    #[serde(default = "default_nchunksperloop")]
    pub nchunksperloop: u32,
    #[serde(default = "default_ngpus")]
    pub ngpus: usize,
    #[serde(default = "default_coll")]
    pub coll: String,
    #[serde(default = "default_placement_flag")]
    pub inplace: u32,
    #[serde(default = "default_placement_flag")]
    pub outofplace: u32,
    #[serde(default)]
    pub min_bytes: u64,
    #[serde(default)]
    pub max_bytes: u64,
}

fn default_proto() -> String {
    "Simple".to_string()
}

fn default_nchannels() -> u32 {
    1
}

fn default_nchunksperloop() -> u32 {
    2
}

fn default_ngpus() -> usize {
    2
}

fn default_coll() -> String {
    "allgather".to_string()
}

fn default_placement_flag() -> u32 {
    1
}

impl ProgramConfig {
    pub fn new(name: impl Into<String>) -> Self {
        ProgramConfig {
            name: name.into(),
            proto: default_proto(),
            nchannels: default_nchannels(),
            nchunksperloop: default_nchunksperloop(),
            ngpus: default_ngpus(),
            coll: default_coll(),
            inplace: default_placement_flag(),
            outofplace: default_placement_flag(),
            min_bytes: 0,
            max_bytes: 0,
        }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config = toml::from_str(&content)?;
        Ok(config)
    }
}

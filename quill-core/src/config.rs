use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_INSTANTIATION_DEPTH: usize = 1024;
pub const DEFAULT_MAX_EXPANSION_SIZE: u64 = 65536;

/// Limits for the checker; the `[expansion]` table of `quill.toml`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    /// Nested instantiations (cells, aliases, expansion indices) allowed at once.
    pub max_instantiation_depth: usize,
    /// Elements a single expansion statement may unroll.
    pub max_expansion_size: u64,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            max_instantiation_depth: DEFAULT_MAX_INSTANTIATION_DEPTH,
            max_expansion_size: DEFAULT_MAX_EXPANSION_SIZE,
        }
    }
}

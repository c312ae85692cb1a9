//! Configuration for the shard store

use serde::{Deserialize, Serialize};

use crate::variable::DEFAULT_ROW_BLOCK;

/// Shard store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Row growth quantum. On-demand growth rounds the target row count
    /// up to a multiple of this, amortizing reallocation under sparse
    /// access patterns. Values below 1 are treated as 1.
    pub row_block: usize,

    /// Maximum number of variables a shard will hold, `None` for
    /// unbounded.
    pub max_variables: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            row_block: DEFAULT_ROW_BLOCK,
            max_variables: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.row_block, 64);
        assert_eq!(config.max_variables, None);
    }
}

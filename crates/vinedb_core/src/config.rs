//! Database configuration.

use serde::{Deserialize, Serialize};

/// Configuration for opening a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Number of entries after which a LinkBag switches from the embedded
    /// representation to the tree representation.
    pub link_bag_tree_threshold: usize,

    /// Run version cleanup every N commits (0 = only on demand).
    pub cleanup_interval: u64,

    /// Maximum number of nested `begin()` scopes per session.
    pub max_nesting_depth: u32,

    /// Null policy applied to index definitions that do not choose one.
    pub ignore_null_values: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            link_bag_tree_threshold: 40,
            cleanup_interval: 64,
            max_nesting_depth: 64,
            ignore_null_values: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the LinkBag embedded-to-tree threshold.
    #[must_use]
    pub const fn link_bag_tree_threshold(mut self, value: usize) -> Self {
        self.link_bag_tree_threshold = value;
        self
    }

    /// Sets the automatic cleanup interval in commits.
    #[must_use]
    pub const fn cleanup_interval(mut self, commits: u64) -> Self {
        self.cleanup_interval = commits;
        self
    }

    /// Sets the maximum nesting depth.
    #[must_use]
    pub const fn max_nesting_depth(mut self, depth: u32) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    /// Sets the default null policy for new indexes.
    #[must_use]
    pub const fn ignore_null_values(mut self, value: bool) -> Self {
        self.ignore_null_values = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.link_bag_tree_threshold, 40);
        assert_eq!(config.cleanup_interval, 64);
        assert!(!config.ignore_null_values);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .link_bag_tree_threshold(5)
            .cleanup_interval(0)
            .max_nesting_depth(3)
            .ignore_null_values(true);

        assert_eq!(config.link_bag_tree_threshold, 5);
        assert_eq!(config.cleanup_interval, 0);
        assert_eq!(config.max_nesting_depth, 3);
        assert!(config.ignore_null_values);
    }
}

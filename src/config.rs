//! Engine configuration.
//!
//! Matching thresholds and dictionaries are fixed; what a host can tune is
//! how the surrounding pipeline behaves.

use serde::{Deserialize, Serialize};

use crate::error::{ResolverError, ResolverResult};

/// Resolution engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Category/role values that count as "not set" during a merge.
    pub placeholder_categories: Vec<String>,
    /// Re-fetch attempts after an insert-time conflict before skipping.
    pub insert_retry_limit: usize,
    /// Re-verify attempts for a cluster whose members changed mid-scan.
    pub merge_retry_limit: usize,
    /// Evaluate candidate pairs on the rayon pool.
    pub parallel_buckets: bool,
    /// Blocking buckets processed between cancellation checkpoints.
    pub buckets_per_checkpoint: usize,
    /// Upper bound on cluster-and-merge passes per batch run. Clusters
    /// skipped on a conflict and records written during a pass are picked up
    /// by the next one, so the job repeats until a pass merges nothing.
    pub max_passes: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            placeholder_categories: ["unknown", "person", "other", "n/a", "none"]
                .into_iter()
                .map(str::to_string)
                .collect(),
            insert_retry_limit: 1,
            merge_retry_limit: 1,
            parallel_buckets: true,
            buckets_per_checkpoint: 256,
            max_passes: 4,
        }
    }
}

impl ResolverConfig {
    /// Parses a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    /// Returns `Config` if the JSON is malformed or a count that must be
    /// positive is zero.
    pub fn from_json(json: &str) -> ResolverResult<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ResolverError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks invariants serde can't express.
    ///
    /// # Errors
    /// Returns `Config` if `buckets_per_checkpoint` or `max_passes` is zero.
    pub fn validate(&self) -> ResolverResult<()> {
        if self.buckets_per_checkpoint == 0 {
            return Err(ResolverError::config("buckets_per_checkpoint must be non-zero"));
        }
        if self.max_passes == 0 {
            return Err(ResolverError::config("max_passes must be non-zero"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ResolverConfig::default();
        assert_eq!(config.insert_retry_limit, 1);
        assert!(config.placeholder_categories.iter().any(|p| p == "unknown"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config = ResolverConfig::from_json(r#"{"merge_retry_limit": 3, "parallel_buckets": false}"#).unwrap();
        assert_eq!(config.merge_retry_limit, 3);
        assert!(!config.parallel_buckets);
        assert_eq!(config.insert_retry_limit, 1);
    }

    #[test]
    fn test_from_json_rejects_bad_input() {
        assert!(ResolverConfig::from_json("{not json").is_err());
        let err = ResolverConfig::from_json(r#"{"buckets_per_checkpoint": 0}"#).unwrap_err();
        assert!(err.to_string().contains("buckets_per_checkpoint"));
        let err = ResolverConfig::from_json(r#"{"max_passes": 0}"#).unwrap_err();
        assert!(err.to_string().contains("max_passes"));
    }
}

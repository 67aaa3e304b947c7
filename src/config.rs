//! Batching configuration types and serialisation for feed evaluation.

use serde::{Deserialize, Serialize};

/// How feeds are split and evaluated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchingConfig {
    /// Largest sub-batch handed to the model; `0` disables splitting.
    #[serde(default)]
    pub max_batch_size: usize,
    /// Worker threads for sub-batch evaluation; sequential when unset.
    #[serde(default)]
    pub workers: Option<usize>,
}

impl BatchingConfig {
    /// Ensure the configuration values are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// Returns an error if `workers` is zero.
    #[must_use = "Validation should not be ignored"]
    pub fn validate(self) -> Result<Self, String> {
        if self.workers == Some(0) {
            Err("workers must be greater than 0 when set".into())
        } else {
            Ok(self)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn serialise_batching() {
        let cfg = BatchingConfig {
            max_batch_size: 32,
            workers: Some(4),
        };
        #[expect(clippy::expect_used, reason = "test should fail loudly")]
        let json = serde_json::to_string(&cfg).expect("serialise BatchingConfig to JSON");
        assert_eq!(json, r#"{"max_batch_size":32,"workers":4}"#);
    }

    #[rstest]
    fn deserialise_defaults() {
        #[expect(clippy::expect_used, reason = "test should fail loudly")]
        let cfg: BatchingConfig = serde_json::from_str("{}").expect("deserialise BatchingConfig");
        assert_eq!(cfg, BatchingConfig::default());
    }

    #[rstest]
    fn deserialise_unknown_field() {
        let cfg: Result<BatchingConfig, _> = serde_json::from_str(r#"{"window":5}"#);
        assert!(cfg.is_err());
    }

    #[rstest]
    #[case(None, true)]
    #[case(Some(0), false)]
    #[case(Some(2), true)]
    fn validate_workers(#[case] workers: Option<usize>, #[case] ok: bool) {
        let cfg = BatchingConfig {
            max_batch_size: 8,
            workers,
        };
        assert_eq!(cfg.validate().is_ok(), ok);
    }
}

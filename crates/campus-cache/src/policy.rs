//! Expiration delays of the update-frequency buckets.

use campus_types::UpdateFrequency;
use serde::{Deserialize, Serialize};

/// Centralized TTL table, in milliseconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    pub usually_ms: i64,
    pub often_ms: i64,
    pub sometimes_ms: i64,
    pub rarely_ms: i64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            usually_ms: 420_000,
            often_ms: 1_200_000,
            sometimes_ms: 3_600_000,
            rarely_ms: 43_200_000,
        }
    }
}

impl CachePolicy {
    pub fn delay(&self, frequency: UpdateFrequency) -> i64 {
        match frequency {
            UpdateFrequency::Usually => self.usually_ms,
            UpdateFrequency::Often => self.often_ms,
            UpdateFrequency::Sometimes => self.sometimes_ms,
            UpdateFrequency::Rarely => self.rarely_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = CachePolicy::default();
        assert_eq!(policy.delay(UpdateFrequency::Usually), 420_000);
        assert_eq!(policy.delay(UpdateFrequency::Rarely), 43_200_000);
    }

    #[test]
    fn test_partial_override() {
        let policy: CachePolicy = serde_json::from_str(r#"{"often_ms": 5}"#).expect("parse");
        assert_eq!(policy.delay(UpdateFrequency::Often), 5);
        assert_eq!(policy.delay(UpdateFrequency::Sometimes), 3_600_000);
    }
}

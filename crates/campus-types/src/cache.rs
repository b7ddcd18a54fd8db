//! Cache policy enums shared by the cache layer and its callers.

use serde::{Deserialize, Serialize};

/// Coarse expiration class of a cached web service response.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateFrequency {
    #[default]
    Usually,
    Often,
    Sometimes,
    Rarely,
}

impl UpdateFrequency {
    pub const ALL: [UpdateFrequency; 4] = [
        UpdateFrequency::Usually,
        UpdateFrequency::Often,
        UpdateFrequency::Sometimes,
        UpdateFrequency::Rarely,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateFrequency::Usually => "usually",
            UpdateFrequency::Often => "often",
            UpdateFrequency::Sometimes => "sometimes",
            UpdateFrequency::Rarely => "rarely",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == value)
    }
}

/// How a read should combine the local cache and the network.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingStrategy {
    /// Fresh cache, else network, else stale cache.
    #[default]
    Default,
    /// Any cached entry regardless of expiration, else network.
    PreferCache,
    /// Only the cache; never touches the network.
    OnlyCache,
    /// Network first, cached entry if the call fails.
    PreferNetwork,
    /// Only the network; never reads the cache.
    OnlyNetwork,
}

impl ReadingStrategy {
    /// Whether a successful network response may be stored.
    pub fn saves_to_cache(&self) -> bool {
        !matches!(self, ReadingStrategy::OnlyCache)
    }

    /// Whether the cache is consulted at all.
    pub fn reads_cache(&self) -> bool {
        !matches!(self, ReadingStrategy::OnlyNetwork)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_frequency_parse() {
        for freq in UpdateFrequency::ALL {
            assert_eq!(UpdateFrequency::parse(freq.as_str()), Some(freq));
        }
        assert_eq!(UpdateFrequency::parse("never"), None);
    }

    #[test]
    fn test_strategy_cache_usage() {
        assert!(!ReadingStrategy::OnlyNetwork.reads_cache());
        assert!(ReadingStrategy::PreferNetwork.reads_cache());
        assert!(!ReadingStrategy::OnlyCache.saves_to_cache());
        assert_eq!(ReadingStrategy::default(), ReadingStrategy::Default);
    }
}

use cellbridge_cache::{CacheConfig, VALUE_CACHE_UNIQUIFIER};
use cellbridge_rtd::RtdConfig;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextConfig {
    pub object_cache: CacheConfig,
    pub value_cache: CacheConfig,
    pub rtd: RtdConfig,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            object_cache: CacheConfig::default(),
            value_cache: CacheConfig::with_uniquifier(VALUE_CACHE_UNIQUIFIER),
            rtd: RtdConfig::default(),
        }
    }
}

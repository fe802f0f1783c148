//! ETA Search - hit counts from a web search engine
//!
//! The PMI assessor scores an entity by comparing how often it co-occurs with
//! concept phrases on the web. This crate provides the [`HitCountService`]
//! implementations it queries:
//! - [`HttpHitCounter`]: JSON search endpoint over HTTP
//! - [`CachedHitCounter`]: memoising wrapper around any other counter
//! - [`FixedHitCounter`]: fixed table, for offline runs and tests
//!
//! Author: hephaex@gmail.com

pub mod cache;
pub mod http;

pub use cache::{CacheSnapshot, CacheStats, CachedHitCounter};
pub use http::HttpHitCounter;

use async_trait::async_trait;
use eta_core::{HitCountService, Result};
use std::collections::HashMap;

/// Hit counter answering from a fixed table; unknown queries count zero
#[derive(Debug, Clone, Default)]
pub struct FixedHitCounter {
    counts: HashMap<String, u64>,
}

impl FixedHitCounter {
    /// Create an empty counter
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the hit count of a query
    pub fn with_count(mut self, query: impl Into<String>, count: u64) -> Self {
        self.counts.insert(query.into(), count);
        self
    }
}

impl FromIterator<(String, u64)> for FixedHitCounter {
    fn from_iter<I: IntoIterator<Item = (String, u64)>>(iter: I) -> Self {
        Self {
            counts: iter.into_iter().collect(),
        }
    }
}

#[async_trait]
impl HitCountService for FixedHitCounter {
    async fn hit_count(&self, query: &str) -> Result<u64> {
        Ok(self.counts.get(query).copied().unwrap_or(0))
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

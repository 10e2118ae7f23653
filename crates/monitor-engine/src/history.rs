//! Historical aggregate cache
//!
//! The historical store is an external, potentially slow collaborator.
//! [`HistoryCache`] wraps any [`HistoricalSource`] with a timeout-bounded
//! reload; on failure or timeout the previously cached mapping is
//! retained, so a flaky store degrades the data's freshness but never the
//! poll loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Aggregated call history for one extension on one day.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoricalStats {
    pub total_calls: u64,
    pub answered_calls: u64,
    pub missed_calls: u64,
    pub total_duration: u64,
    pub inbound_calls: u64,
    pub outbound_calls: u64,
    pub internal_calls: u64,
    pub first_call: Option<DateTime<Utc>>,
    pub last_call: Option<DateTime<Utc>>,
}

/// An opaque source of historical aggregates.
#[async_trait]
pub trait HistoricalSource: Send + Sync {
    async fn fetch(&self, date: NaiveDate) -> anyhow::Result<HashMap<String, HistoricalStats>>;
}

/// Timeout-bounded cache over a historical source.
pub struct HistoryCache {
    source: Arc<dyn HistoricalSource>,
    timeout: Duration,
    cached: RwLock<HashMap<String, HistoricalStats>>,
}

impl HistoryCache {
    pub fn new(source: Arc<dyn HistoricalSource>, timeout: Duration) -> Self {
        Self {
            source,
            timeout,
            cached: RwLock::new(HashMap::new()),
        }
    }

    /// Reload the aggregate for `date`. Failure or timeout keeps the
    /// previous mapping.
    pub async fn reload(&self, date: NaiveDate) {
        match tokio::time::timeout(self.timeout, self.source.fetch(date)).await {
            Ok(Ok(stats)) => {
                debug!("historical aggregate reloaded: {} extensions", stats.len());
                *self.cached.write() = stats;
            }
            Ok(Err(e)) => {
                warn!("historical reload failed, keeping cached aggregate: {}", e);
            }
            Err(_) => {
                warn!(
                    "historical reload timed out after {:?}, keeping cached aggregate",
                    self.timeout
                );
            }
        }
    }

    /// The current cached mapping.
    pub fn current(&self) -> HashMap<String, HistoricalStats> {
        self.cached.read().clone()
    }
}

//! The published snapshot document
//!
//! One JSON document per poll cycle, pushed to every subscriber.

use chrono::Utc;
use serde::Serialize;

use crate::correlate::CallRecord;
use crate::kpi::ExtensionKpi;
use crate::queues::QueueSnapshot;

/// The consolidated realtime view for one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub status: String,
    pub active_calls: u32,
    pub total_channels: usize,
    pub calls: Vec<CallRecord>,
    pub extension_kpis: Vec<ExtensionKpi>,
    pub queues: Vec<QueueSnapshot>,
    /// Epoch seconds.
    pub timestamp: i64,
}

impl Snapshot {
    pub fn new(
        active_calls: u32,
        total_channels: usize,
        calls: Vec<CallRecord>,
        extension_kpis: Vec<ExtensionKpi>,
        queues: Vec<QueueSnapshot>,
    ) -> Self {
        Self {
            status: "ok".to_string(),
            active_calls,
            total_channels,
            calls,
            extension_kpis,
            queues,
            timestamp: Utc::now().timestamp(),
        }
    }
}

//! Monitoring engine for the amimon PBX telemetry service
//!
//! Turns the raw manager-interface telemetry gathered by
//! [`amimon_ami_core`] into a consolidated realtime view: logical calls
//! correlated from channel legs, per-extension KPI rows with presence and
//! break accounting, per-queue health summaries, and a broadcast hub that
//! fans each snapshot out to push subscribers.
//!
//! The [`orchestrator::Monitor`] owns all shared state and drives two
//! independent loops: a periodic poll loop that queries, aggregates, and
//! publishes, and an event loop that applies asynchronous presence
//! notifications to the ledger.

pub mod config;
pub mod correlate;
pub mod database;
pub mod history;
pub mod hub;
pub mod kpi;
pub mod orchestrator;
pub mod presence;
pub mod queues;
pub mod snapshot;

pub use config::MonitorConfig;
pub use correlate::{correlate, CallRecord, Correlation, Direction, LiveCounts};
pub use database::CdrDatabase;
pub use history::{HistoricalSource, HistoricalStats, HistoryCache};
pub use hub::BroadcastHub;
pub use kpi::{Availability, ExtensionKpi, ExtensionStatus, KpiInputs};
pub use orchestrator::Monitor;
pub use presence::{BreakInterval, PresenceLedger, PresenceRecord, PresenceState};
pub use queues::{aggregate_queues, MemberSnapshot, QueueSnapshot, WaitingCall};
pub use snapshot::Snapshot;

//! The two control loops
//!
//! [`Monitor`] owns the shared state (presence ledger, broadcast hub,
//! historical cache) and drives two indefinitely-running tasks:
//!
//! * the **poll loop** queries the manager interface, correlates,
//!   aggregates, and publishes a snapshot every cycle;
//! * the **event loop** holds a second manager connection and applies
//!   asynchronous presence notifications to the ledger.
//!
//! The loops share only the ledger and the subscriber set, under
//! single-writer discipline: the event loop is the sole source of ledger
//! transitions, the poll loop the sole publisher. Each loop reconnects
//! with its own backoff; a failure in one never halts the other, and
//! nothing short of the shutdown signal stops either.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use amimon_ami_core::{EventListener, ManagerClient};

use crate::config::MonitorConfig;
use crate::correlate::correlate;
use crate::history::{HistoricalSource, HistoryCache};
use crate::hub::BroadcastHub;
use crate::kpi::{aggregate, KpiInputs};
use crate::presence::PresenceLedger;
use crate::queues::aggregate_queues;
use crate::snapshot::Snapshot;

/// The monitoring engine: owns shared state and spawns the loops.
pub struct Monitor {
    config: MonitorConfig,
    ledger: Arc<PresenceLedger>,
    hub: Arc<BroadcastHub>,
    history: Option<Arc<HistoryCache>>,
}

impl Monitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            ledger: Arc::new(PresenceLedger::new()),
            hub: Arc::new(BroadcastHub::new()),
            history: None,
        }
    }

    /// Attach a historical source (CDR database). Without one, the
    /// historical counters stay empty.
    pub fn with_history(mut self, source: Arc<dyn HistoricalSource>) -> Self {
        self.history = Some(Arc::new(HistoryCache::new(
            source,
            self.config.history_timeout(),
        )));
        self
    }

    pub fn hub(&self) -> Arc<BroadcastHub> {
        self.hub.clone()
    }

    pub fn ledger(&self) -> Arc<PresenceLedger> {
        self.ledger.clone()
    }

    /// Spawn the poll and event loops. Both run until `shutdown` flips to
    /// true.
    pub fn run(&self, shutdown: watch::Receiver<bool>) -> (JoinHandle<()>, JoinHandle<()>) {
        let poll = tokio::spawn(poll_loop(
            self.config.clone(),
            self.ledger.clone(),
            self.hub.clone(),
            self.history.clone(),
            shutdown.clone(),
        ));
        let events = tokio::spawn(event_loop(
            self.config.clone(),
            self.ledger.clone(),
            shutdown,
        ));
        (poll, events)
    }
}

/// Sleep for `period` unless shutdown fires first; returns false on
/// shutdown.
async fn pause(period: std::time::Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = sleep(period) => true,
        _ = shutdown.changed() => false,
    }
}

async fn poll_loop(
    config: MonitorConfig,
    ledger: Arc<PresenceLedger>,
    hub: Arc<BroadcastHub>,
    history: Option<Arc<HistoryCache>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let gateways = config.normalized_gateways();
    let mut client = ManagerClient::new(config.manager_config());
    let mut last_channel_count = 0usize;
    let mut last_reload: Option<Instant> = None;
    let mut last_seen: HashMap<String, Instant> = HashMap::new();

    info!("poll loop started (interval {:?})", config.poll_interval());
    loop {
        if *shutdown.borrow() {
            break;
        }

        if !client.is_logged_in() {
            let session = async {
                client.connect().await?;
                client.login().await
            }
            .await;
            if let Err(e) = session {
                warn!(
                    "manager session failed ({}); retrying in {:?}",
                    e,
                    config.reconnect_backoff()
                );
                if !pause(config.reconnect_backoff(), &mut shutdown).await {
                    break;
                }
                continue;
            }
        }

        // The five queries, each bounded by its own deadline; all of them
        // fail soft so one bad answer degrades the cycle, not the loop.
        let channels = client.channels().await;
        let registrations = client.registration_states().await;
        let paused = client.paused_members().await;
        let dump = client.presence_dump().await;
        for entry in &dump {
            ledger.seed(&entry.extension, &entry.label);
        }
        let queue_events = client.queue_status().await;

        let correlation = correlate(&channels, &gateways);

        // Visibility window: an extension keeps its row for a while after
        // its last live sighting.
        let now = Instant::now();
        for extension in correlation.extensions.keys() {
            last_seen.insert(extension.clone(), now);
        }
        let window = config.visibility_window();
        last_seen.retain(|_, seen| now.duration_since(*seen) <= window);

        // A drop in the live channel count means a hangup just landed in
        // the historical store; reload immediately. Otherwise reload on
        // the periodic timer.
        if let Some(history) = &history {
            let hangup = last_channel_count > 0 && channels.len() < last_channel_count;
            let due = last_reload
                .map(|at| at.elapsed() >= config.reload_interval())
                .unwrap_or(true);
            if hangup || due {
                history.reload(Utc::now().date_naive()).await;
                last_reload = Some(Instant::now());
            }
        }
        last_channel_count = channels.len();

        let history_map = history
            .as_ref()
            .map(|h| h.current())
            .unwrap_or_default();
        let visible: Vec<String> = last_seen.keys().cloned().collect();
        let kpis = aggregate(KpiInputs {
            live: &correlation.extensions,
            registrations: &registrations,
            paused: &paused,
            history: &history_map,
            ledger: &ledger,
            visible: &visible,
        });
        let queues = aggregate_queues(&queue_events);

        let snapshot = Snapshot::new(
            correlation.active_calls,
            channels.len(),
            correlation.calls,
            kpis,
            queues,
        );
        let delivered = hub.publish(&snapshot);
        debug!(
            "cycle: {} active, {} channels, {} extensions, {} queues, {} subscribers",
            snapshot.active_calls,
            snapshot.total_channels,
            snapshot.extension_kpis.len(),
            snapshot.queues.len(),
            delivered
        );

        if !pause(config.poll_interval(), &mut shutdown).await {
            break;
        }
    }

    client.logoff().await;
    info!("poll loop stopped");
}

async fn event_loop(
    config: MonitorConfig,
    ledger: Arc<PresenceLedger>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut listener = EventListener::new(
        config.manager_config(),
        config.event_liveness_timeout(),
    );

    info!("event loop started");
    loop {
        if *shutdown.borrow() {
            break;
        }

        if !listener.is_connected() {
            if let Err(e) = listener.connect().await {
                warn!(
                    "event listener connect failed ({}); retrying in {:?}",
                    e,
                    config.event_reconnect_backoff()
                );
                if !pause(config.event_reconnect_backoff(), &mut shutdown).await {
                    break;
                }
                continue;
            }
            info!("event listener connected");
        }

        tokio::select! {
            result = listener.next_event() => match result {
                Ok(Some(update)) => {
                    debug!("presence event: {} -> {}", update.extension, update.label);
                    ledger.apply(&update.extension, &update.label);
                }
                // Liveness timeout: a quiet PBX, not a failure.
                Ok(None) => {}
                Err(e) => {
                    warn!("event connection lost: {}", e);
                    if !pause(config.event_reconnect_backoff(), &mut shutdown).await {
                        break;
                    }
                }
            },
            _ = shutdown.changed() => break,
        }
    }

    listener.close().await;
    info!("event loop stopped");
}

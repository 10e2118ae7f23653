//! Monitor configuration
//!
//! All intervals are stored as integer seconds so the structure maps
//! directly onto the JSON config file; accessors expose them as
//! [`Duration`]s.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use amimon_ami_core::ManagerConfig;

/// Manager-interface connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5038,
            username: "reporting".to_string(),
            secret: String::new(),
        }
    }
}

/// Top-level monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub manager: ManagerSettings,
    /// Bind address for the WebSocket push listener.
    pub listen: String,
    /// Gateway identifiers; channel names containing one of these tokens
    /// are treated as trunk legs. `PJSIP/`/`SIP/` prefixes are accepted
    /// and stripped.
    pub gateways: Vec<String>,
    pub poll_interval_secs: u64,
    /// Periodic historical reload cadence (a live-channel drop also
    /// triggers a reload immediately).
    pub reload_interval_secs: u64,
    /// How long an extension stays in the snapshot after its last live
    /// sighting.
    pub visibility_window_secs: u64,
    pub reconnect_backoff_secs: u64,
    pub event_reconnect_backoff_secs: u64,
    pub event_liveness_timeout_secs: u64,
    pub response_timeout_secs: u64,
    pub query_deadline_secs: u64,
    pub history_timeout_secs: u64,
    /// CDR database URL (`mysql://...`); historical counters stay empty
    /// when unset.
    pub cdr_url: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            manager: ManagerSettings::default(),
            listen: "0.0.0.0:8765".to_string(),
            gateways: vec![
                "trunk".to_string(),
                "gateway".to_string(),
                "pstn".to_string(),
                "did".to_string(),
            ],
            poll_interval_secs: 2,
            reload_interval_secs: 30,
            visibility_window_secs: 300,
            reconnect_backoff_secs: 10,
            event_reconnect_backoff_secs: 5,
            event_liveness_timeout_secs: 60,
            response_timeout_secs: 3,
            query_deadline_secs: 5,
            history_timeout_secs: 10,
            cdr_url: None,
        }
    }
}

impl MonitorConfig {
    /// Gateway tokens normalized for matching: technology prefixes
    /// stripped, lowercased.
    pub fn normalized_gateways(&self) -> Vec<String> {
        self.gateways
            .iter()
            .map(|g| {
                g.strip_prefix("PJSIP/")
                    .or_else(|| g.strip_prefix("SIP/"))
                    .unwrap_or(g)
                    .to_ascii_lowercase()
            })
            .filter(|g| !g.is_empty())
            .collect()
    }

    /// Manager connection settings for the protocol client.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig::new(
            self.manager.host.clone(),
            self.manager.port,
            self.manager.username.clone(),
            self.manager.secret.clone(),
        )
        .with_response_timeout(self.response_timeout())
        .with_query_deadline(self.query_deadline())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_interval_secs)
    }

    pub fn visibility_window(&self) -> Duration {
        Duration::from_secs(self.visibility_window_secs)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.reconnect_backoff_secs)
    }

    pub fn event_reconnect_backoff(&self) -> Duration {
        Duration::from_secs(self.event_reconnect_backoff_secs)
    }

    pub fn event_liveness_timeout(&self) -> Duration {
        Duration::from_secs(self.event_liveness_timeout_secs)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }

    pub fn query_deadline(&self) -> Duration {
        Duration::from_secs(self.query_deadline_secs)
    }

    pub fn history_timeout(&self) -> Duration {
        Duration::from_secs(self.history_timeout_secs)
    }
}

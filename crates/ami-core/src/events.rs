//! Asynchronous event listener
//!
//! A second, independent manager connection subscribed to asynchronous
//! notifications. The listener blocks on the stream with a liveness
//! timeout; an elapsed timeout is a quiet period (retried by the caller),
//! not a failure. I/O errors drop the connection so the caller can
//! reconnect with its own backoff, without affecting the poll loop.

use std::time::Duration;

use crate::client::{ManagerClient, ManagerConfig};
use crate::error::{Error, Result};
use crate::types::PresenceUpdate;

/// Event-listener connection yielding presence updates.
pub struct EventListener {
    client: ManagerClient,
    liveness_timeout: Duration,
}

impl EventListener {
    pub fn new(config: ManagerConfig, liveness_timeout: Duration) -> Self {
        Self {
            client: ManagerClient::new(config),
            liveness_timeout,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_logged_in()
    }

    /// Connect, authenticate, and subscribe to call/user events.
    pub async fn connect(&mut self) -> Result<()> {
        self.client.connect().await?;
        self.client.login().await?;
        self.client.subscribe_events("call,user").await?;
        Ok(())
    }

    /// Wait for the next presence notification.
    ///
    /// Returns `Ok(None)` when the liveness timeout elapses with no
    /// presence event (other event classes reset the wait); the caller
    /// simply retries. Errors mean the connection is gone.
    pub async fn next_event(&mut self) -> Result<Option<PresenceUpdate>> {
        loop {
            match self.client.next_block(self.liveness_timeout).await {
                Ok(block) => {
                    if let Some(update) = PresenceUpdate::from_block(&block) {
                        return Ok(Some(update));
                    }
                }
                Err(Error::Timeout(_)) => return Ok(None),
                Err(e) => return Err(e),
            }
        }
    }

    /// Best-effort logoff and disconnect.
    pub async fn close(&mut self) {
        self.client.logoff().await;
    }
}

//! Typed manager-protocol client
//!
//! One TCP connection carrying request/response traffic. Responses are
//! framed blocks: a single block for simple actions, or an event sequence
//! collected until a completion sentinel or the query deadline,
//! whichever comes first, so no query ever blocks the poll loop
//! indefinitely.
//!
//! Every query fails soft: timeouts and parse failures are logged and
//! yield an empty (or partial) result. Any I/O error drops the connection
//! and clears the logged-in flag, forcing the caller to reconnect before
//! the next cycle.

use std::collections::HashMap;
use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::action::Action;
use crate::block::{Block, BlockReader};
use crate::error::{Error, Result};
use crate::types::{
    extract_extension, parse_presence_dump, ChannelSnapshot, DeviceState, PresenceUpdate,
    QueueEvent,
};

/// Connection settings for the manager interface.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
    /// Bound on a single-block response read (and on connect).
    pub response_timeout: Duration,
    /// Overall deadline for an event-sequence query.
    pub query_deadline: Duration,
}

impl ManagerConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            secret: secret.into(),
            response_timeout: Duration::from_secs(3),
            query_deadline: Duration::from_secs(5),
        }
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_query_deadline(mut self, deadline: Duration) -> Self {
        self.query_deadline = deadline;
        self
    }
}

struct Connection {
    reader: BlockReader<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

/// Client for the manager interface's request/response traffic.
pub struct ManagerClient {
    config: ManagerConfig,
    conn: Option<Connection>,
    logged_in: bool,
}

impl ManagerClient {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            conn: None,
            logged_in: false,
        }
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in && self.conn.is_some()
    }

    /// Open the TCP connection. The greeting banner is consumed lazily by
    /// the block reader (it carries no key/value separator).
    pub async fn connect(&mut self) -> Result<()> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let stream = match timeout(self.config.response_timeout, TcpStream::connect(&addr)).await {
            Err(_) => return Err(Error::Timeout(self.config.response_timeout)),
            Ok(res) => res?,
        };
        let (read, write) = stream.into_split();
        self.conn = Some(Connection {
            reader: BlockReader::new(BufReader::new(read)),
            writer: write,
        });
        self.logged_in = false;
        debug!("connected to manager at {}", addr);
        Ok(())
    }

    /// Authenticate. Asynchronous events are switched off on this
    /// connection; the event listener runs its own.
    pub async fn login(&mut self) -> Result<()> {
        let action = Action::new("Login")
            .field("Username", self.config.username.clone())
            .field("Secret", self.config.secret.clone())
            .field("Events", "off");
        self.send_action(&action).await?;
        let response = self.read_response().await?;
        if !response.is_success() {
            let message = response.message().unwrap_or("login rejected").to_string();
            self.drop_connection();
            return Err(Error::Auth(message));
        }
        self.logged_in = true;
        info!(
            "logged in to manager at {}:{}",
            self.config.host, self.config.port
        );
        Ok(())
    }

    /// Re-enable asynchronous event delivery for the given event classes
    /// (used by the event-listener connection).
    pub async fn subscribe_events(&mut self, mask: &str) -> Result<()> {
        self.send_action(&Action::new("Events").field("EventMask", mask))
            .await?;
        let response = self.read_response().await?;
        if !response.is_success() {
            return Err(Error::Protocol(format!(
                "event subscription rejected: {}",
                response.message().unwrap_or("no message")
            )));
        }
        Ok(())
    }

    /// Send a best-effort logoff and drop the connection.
    pub async fn logoff(&mut self) {
        if self.conn.is_some() {
            let _ = self.send_action(&Action::new("Logoff")).await;
        }
        self.drop_connection();
    }

    /// Active channels via `CoreShowChannels`.
    pub async fn channels(&mut self) -> Vec<ChannelSnapshot> {
        match self
            .query_events(Action::new("CoreShowChannels"), "CoreShowChannelsComplete")
            .await
        {
            Ok(blocks) => blocks.iter().filter_map(ChannelSnapshot::from_block).collect(),
            Err(e) => {
                warn!("channel query failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Registration/device state per extension, merged from `SIPpeers` and
    /// `PJSIPShowEndpoints` (the endpoint listing wins on overlap).
    pub async fn registration_states(&mut self) -> HashMap<String, DeviceState> {
        let mut states = HashMap::new();
        match self
            .query_events(Action::new("SIPpeers"), "PeerlistComplete")
            .await
        {
            Ok(blocks) => {
                for block in &blocks {
                    if block.event() != Some("PeerEntry") {
                        continue;
                    }
                    if let Some(name) = block.get("ObjectName") {
                        states.insert(
                            name.to_string(),
                            DeviceState::from_peer_status(block.get("Status").unwrap_or_default()),
                        );
                    }
                }
            }
            Err(e) => warn!("SIP peer query failed: {}", e),
        }
        match self
            .query_events(Action::new("PJSIPShowEndpoints"), "EndpointListComplete")
            .await
        {
            Ok(blocks) => {
                for block in &blocks {
                    if block.event() != Some("EndpointList") {
                        continue;
                    }
                    if let Some(name) = block.get("ObjectName") {
                        states.insert(
                            name.to_string(),
                            DeviceState::from_desc(block.get("DeviceState").unwrap_or_default()),
                        );
                    }
                }
            }
            Err(e) => warn!("PJSIP endpoint query failed: {}", e),
        }
        states
    }

    /// Paused flag per extension across all queues (paused anywhere counts
    /// as paused).
    pub async fn paused_members(&mut self) -> HashMap<String, bool> {
        let mut paused = HashMap::new();
        match self
            .query_events(Action::new("QueueStatus"), "QueueStatusComplete")
            .await
        {
            Ok(blocks) => {
                for block in &blocks {
                    if block.event() != Some("QueueMember") {
                        continue;
                    }
                    let location = block
                        .get("Location")
                        .or_else(|| block.get("Interface"))
                        .unwrap_or_default();
                    if let Some(ext) = extract_extension(location) {
                        let flag = block.get("Paused") == Some("1");
                        *paused.entry(ext).or_insert(false) |= flag;
                    }
                }
            }
            Err(e) => warn!("queue member query failed: {}", e),
        }
        paused
    }

    /// Full presence dump from the internal database.
    pub async fn presence_dump(&mut self) -> Vec<PresenceUpdate> {
        let action = Action::new("Command").field("Command", "database show CustomPresence");
        if let Err(e) = self.send_action(&action).await {
            warn!("presence dump failed: {}", e);
            return Vec::new();
        }
        match self.read_response().await {
            Ok(block) => parse_presence_dump(&block),
            Err(e) => {
                warn!("presence dump failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Raw queue event stream from `QueueStatus`, in arrival order.
    pub async fn queue_status(&mut self) -> Vec<QueueEvent> {
        match self
            .query_events(Action::new("QueueStatus"), "QueueStatusComplete")
            .await
        {
            Ok(blocks) => blocks.iter().filter_map(QueueEvent::from_block).collect(),
            Err(e) => {
                warn!("queue status query failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Read one block with the given bound (used by the event listener,
    /// where a timeout means a quiet period rather than a failure).
    pub async fn next_block(&mut self, wait: Duration) -> Result<Block> {
        self.read_block(wait).await
    }

    async fn send_action(&mut self, action: &Action) -> Result<()> {
        let result = {
            let conn = self.conn.as_mut().ok_or_else(Error::not_connected)?;
            conn.writer.write_all(action.to_wire().as_bytes()).await
        };
        if let Err(e) = result {
            self.drop_connection();
            return Err(e.into());
        }
        Ok(())
    }

    async fn read_response(&mut self) -> Result<Block> {
        let wait = self.config.response_timeout;
        self.read_block(wait).await
    }

    async fn read_block(&mut self, wait: Duration) -> Result<Block> {
        let result = {
            let conn = self.conn.as_mut().ok_or_else(Error::not_connected)?;
            timeout(wait, conn.reader.read_block()).await
        };
        match result {
            Err(_) => Err(Error::Timeout(wait)),
            Ok(Err(e)) => {
                self.drop_connection();
                Err(e.into())
            }
            Ok(Ok(None)) => {
                self.drop_connection();
                Err(Error::Connection(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "manager closed the connection",
                )))
            }
            Ok(Ok(Some(block))) => Ok(block),
        }
    }

    async fn query_events(&mut self, action: Action, sentinel: &str) -> Result<Vec<Block>> {
        self.send_action(&action).await?;
        self.collect_events(sentinel).await
    }

    /// Collect event blocks until the completion sentinel appears or the
    /// query deadline elapses; whatever was accumulated is returned.
    async fn collect_events(&mut self, sentinel: &str) -> Result<Vec<Block>> {
        let deadline = tokio::time::Instant::now() + self.config.query_deadline;
        let mut blocks = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                debug!(
                    "deadline reached before {}; keeping {} blocks",
                    sentinel,
                    blocks.len()
                );
                return Ok(blocks);
            }
            match self.read_block(remaining).await {
                Ok(block) => {
                    if block.event().is_some_and(|e| e.eq_ignore_ascii_case(sentinel)) {
                        return Ok(blocks);
                    }
                    blocks.push(block);
                }
                Err(Error::Timeout(_)) => {
                    debug!(
                        "deadline reached before {}; keeping {} blocks",
                        sentinel,
                        blocks.len()
                    );
                    return Ok(blocks);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn drop_connection(&mut self) {
        self.conn = None;
        self.logged_in = false;
    }
}

//! Protocol-level snapshot types and extraction helpers
//!
//! These are the typed views of raw manager blocks: channel snapshots from
//! `CoreShowChannels`, device states from the peer/endpoint listings, queue
//! events from `QueueStatus`, and presence updates from user events and the
//! presence database dump. All of them are rebuilt from scratch every poll
//! cycle; none carry identity across cycles beyond string equality.

use crate::block::Block;

/// Channel state as reported by `ChannelStateDesc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Down,
    Reserved,
    OffHook,
    Dialing,
    Ring,
    Ringing,
    Up,
    Busy,
    Unknown,
}

impl ChannelState {
    pub fn from_desc(desc: &str) -> Self {
        match desc.to_ascii_lowercase().as_str() {
            "down" => ChannelState::Down,
            "rsrvd" | "reserved" => ChannelState::Reserved,
            "offhook" | "off hook" => ChannelState::OffHook,
            "dialing" | "dialing offhook" | "pre-ring" => ChannelState::Dialing,
            "ring" => ChannelState::Ring,
            "ringing" => ChannelState::Ringing,
            "up" => ChannelState::Up,
            "busy" => ChannelState::Busy,
            _ => ChannelState::Unknown,
        }
    }

    pub fn as_desc(&self) -> &'static str {
        match self {
            ChannelState::Down => "Down",
            ChannelState::Reserved => "Rsrvd",
            ChannelState::OffHook => "OffHook",
            ChannelState::Dialing => "Dialing",
            ChannelState::Ring => "Ring",
            ChannelState::Ringing => "Ringing",
            ChannelState::Up => "Up",
            ChannelState::Busy => "Busy",
            ChannelState::Unknown => "Unknown",
        }
    }

    /// A channel in the `Up` state carries an answered conversation.
    pub fn is_answered(&self) -> bool {
        matches!(self, ChannelState::Up)
    }

    pub fn is_ringing(&self) -> bool {
        matches!(self, ChannelState::Ring | ChannelState::Ringing)
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_desc())
    }
}

/// One live channel as reported by a `CoreShowChannel` event.
#[derive(Debug, Clone)]
pub struct ChannelSnapshot {
    pub channel: String,
    pub caller_id_num: String,
    pub caller_id_name: String,
    pub extension: String,
    pub context: String,
    pub state: ChannelState,
    /// Elapsed seconds, parsed from `HH:MM:SS` or a bare count.
    pub duration: u64,
    pub bridged: Option<String>,
    pub application: String,
}

impl ChannelSnapshot {
    pub fn from_block(block: &Block) -> Option<Self> {
        if block.event() != Some("CoreShowChannel") {
            return None;
        }
        Some(Self {
            channel: block.get("Channel")?.to_string(),
            caller_id_num: block.get("CallerIDNum").unwrap_or_default().to_string(),
            caller_id_name: block.get("CallerIDName").unwrap_or_default().to_string(),
            extension: block.get("Exten").unwrap_or_default().to_string(),
            context: block.get("Context").unwrap_or_default().to_string(),
            state: ChannelState::from_desc(block.get("ChannelStateDesc").unwrap_or_default()),
            duration: parse_duration(block.get("Duration").unwrap_or("0")),
            bridged: block
                .get("BridgedChannel")
                .filter(|v| !v.is_empty())
                .map(str::to_string),
            application: block.get("Application").unwrap_or_default().to_string(),
        })
    }

    /// SIP-family channels (`SIP/...`, `PJSIP/...`) are the only ones the
    /// correlation engine looks at.
    pub fn is_sip(&self) -> bool {
        self.channel.contains("SIP/")
    }
}

/// Device state for an extension, merged from `SIPpeers` and
/// `PJSIPShowEndpoints`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    NotInUse,
    InUse,
    Busy,
    Ringing,
    RingInUse,
    OnHold,
    Unavailable,
    Invalid,
    Unknown,
}

impl DeviceState {
    /// Parse a `DeviceState` field from `PJSIPShowEndpoints`.
    pub fn from_desc(desc: &str) -> Self {
        match desc.to_ascii_lowercase().as_str() {
            "not in use" | "not_inuse" => DeviceState::NotInUse,
            "in use" | "inuse" => DeviceState::InUse,
            "busy" => DeviceState::Busy,
            "ringing" => DeviceState::Ringing,
            "ring+inuse" | "ringinuse" => DeviceState::RingInUse,
            "on hold" | "onhold" => DeviceState::OnHold,
            "unavailable" => DeviceState::Unavailable,
            "invalid" => DeviceState::Invalid,
            _ => DeviceState::Unknown,
        }
    }

    /// Parse a chan_sip `Status` field from a `PeerEntry` event, which only
    /// distinguishes reachable (`OK (12 ms)`) from everything else.
    pub fn from_peer_status(status: &str) -> Self {
        if status.starts_with("OK") {
            DeviceState::NotInUse
        } else if status.eq_ignore_ascii_case("unmonitored") {
            DeviceState::Unknown
        } else {
            DeviceState::Unavailable
        }
    }

    pub fn as_desc(&self) -> &'static str {
        match self {
            DeviceState::NotInUse => "not_in_use",
            DeviceState::InUse => "in_use",
            DeviceState::Busy => "busy",
            DeviceState::Ringing => "ringing",
            DeviceState::RingInUse => "ring_in_use",
            DeviceState::OnHold => "on_hold",
            DeviceState::Unavailable => "unavailable",
            DeviceState::Invalid => "invalid",
            DeviceState::Unknown => "unknown",
        }
    }

    pub fn is_registered(&self) -> bool {
        !matches!(
            self,
            DeviceState::Unavailable | DeviceState::Invalid | DeviceState::Unknown
        )
    }

    pub fn is_in_call(&self) -> bool {
        matches!(
            self,
            DeviceState::InUse | DeviceState::Busy | DeviceState::RingInUse
        )
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_desc())
    }
}

/// Queue parameters from a `QueueParams` event.
#[derive(Debug, Clone, Default)]
pub struct QueueParams {
    pub queue: String,
    pub max: u32,
    pub strategy: String,
    pub calls: u32,
    pub hold_time: u64,
    pub talk_time: u64,
    pub completed: u64,
    pub abandoned: u64,
    pub service_level: u64,
    pub service_level_perf: f64,
}

/// Queue membership from a `QueueMember` event.
#[derive(Debug, Clone, Default)]
pub struct QueueMember {
    pub queue: String,
    pub name: String,
    pub interface: String,
    pub membership: String,
    pub penalty: u32,
    pub calls_taken: u64,
    pub last_call: u64,
    pub status: u32,
    pub paused: bool,
    pub in_call: bool,
}

/// A waiting caller from a `QueueEntry` event.
#[derive(Debug, Clone, Default)]
pub struct QueueEntry {
    pub queue: String,
    pub position: u32,
    pub channel: String,
    pub caller_id_num: String,
    pub caller_id_name: String,
    pub wait: u64,
}

/// One event of a `QueueStatus` response, in stream order.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Params(QueueParams),
    Member(QueueMember),
    Entry(QueueEntry),
}

impl QueueEvent {
    pub fn from_block(block: &Block) -> Option<Self> {
        let get = |key: &str| block.get(key).unwrap_or_default().to_string();
        let num = |key: &str| block.get(key).and_then(|v| v.parse().ok()).unwrap_or(0);
        match block.event()? {
            "QueueParams" => Some(QueueEvent::Params(QueueParams {
                queue: get("Queue"),
                max: num("Max") as u32,
                strategy: get("Strategy"),
                calls: num("Calls") as u32,
                hold_time: num("Holdtime"),
                talk_time: num("TalkTime"),
                completed: num("Completed"),
                abandoned: num("Abandoned"),
                service_level: num("ServiceLevel"),
                service_level_perf: block
                    .get("ServicelevelPerf")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(0.0),
            })),
            "QueueMember" => Some(QueueEvent::Member(QueueMember {
                queue: get("Queue"),
                name: get("Name"),
                interface: block
                    .get("Location")
                    .or_else(|| block.get("Interface"))
                    .unwrap_or_default()
                    .to_string(),
                membership: get("Membership"),
                penalty: num("Penalty") as u32,
                calls_taken: num("CallsTaken"),
                last_call: num("LastCall"),
                status: num("Status") as u32,
                paused: block.get("Paused") == Some("1"),
                in_call: block.get("InCall") == Some("1"),
            })),
            "QueueEntry" => Some(QueueEvent::Entry(QueueEntry {
                queue: get("Queue"),
                position: num("Position") as u32,
                channel: get("Channel"),
                caller_id_num: get("CallerIDNum"),
                caller_id_name: get("CallerIDName"),
                wait: num("Wait"),
            })),
            _ => None,
        }
    }
}

/// A presence change for one extension: a raw label whose only meaning is
/// the effect it has on the presence ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub extension: String,
    pub label: String,
}

impl PresenceUpdate {
    /// Extract a presence change from an asynchronous `UserEvent` block.
    pub fn from_block(block: &Block) -> Option<Self> {
        if block.event()? != "UserEvent" {
            return None;
        }
        if !block.get("UserEvent")?.eq_ignore_ascii_case("CustomPresence") {
            return None;
        }
        let key = block.get("Key")?;
        let extension = key.rsplit('/').next().unwrap_or(key).trim();
        if extension.is_empty() {
            return None;
        }
        Some(Self {
            extension: extension.to_string(),
            label: block.get("Value").unwrap_or_default().trim().to_string(),
        })
    }
}

/// Parse the payload of `Command: database show CustomPresence`.
///
/// Recent manager versions wrap each payload line in an `Output` field
/// (`Output: /CustomPresence/101 : lunch`); older ones send the raw
/// lines, which the block parser then records with the database path as
/// the key. Both shapes are accepted; trailer lines such as
/// `3 results found.` carry no match and are skipped.
pub fn parse_presence_dump(block: &Block) -> Vec<PresenceUpdate> {
    let mut entries = Vec::new();
    for (key, value) in block.fields() {
        let (path, label) = if key.eq_ignore_ascii_case("Output") {
            match value.split_once(':') {
                Some((path, label)) => (path, label),
                None => continue,
            }
        } else {
            (key, value)
        };
        let path = path.trim().trim_end_matches('/');
        if !path.contains("CustomPresence") {
            continue;
        }
        let Some((_, extension)) = path.rsplit_once('/') else {
            continue;
        };
        let extension = extension.trim();
        if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        entries.push(PresenceUpdate {
            extension: extension.to_string(),
            label: label.trim().to_string(),
        });
    }
    entries
}

/// Convert a `HH:MM:SS`, `MM:SS`, or bare-seconds duration to seconds.
pub fn parse_duration(raw: &str) -> u64 {
    let raw = raw.trim();
    if raw.contains(':') {
        let parts: Vec<u64> = raw
            .split(':')
            .map(|p| p.parse().unwrap_or(0))
            .collect();
        match parts.as_slice() {
            [h, m, s] => h * 3600 + m * 60 + s,
            [m, s] => m * 60 + s,
            _ => 0,
        }
    } else {
        raw.parse().unwrap_or(0)
    }
}

/// Pull the station number out of a SIP-family channel name, e.g.
/// `PJSIP/101-00000abc` yields `101`. Trunk legs with alphabetic account
/// names yield `None`.
pub fn extract_extension(channel: &str) -> Option<String> {
    let (_, rest) = channel.split_once("SIP/")?;
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

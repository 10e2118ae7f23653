//! Asterisk Manager Interface (AMI) transport and typed client
//!
//! This crate implements the manager-protocol side of amimon: framed-block
//! parsing over a TCP connection, action serialization, a typed client for
//! the queries the monitor issues every poll cycle, and a second persistent
//! connection that listens for asynchronous user events.
//!
//! Every query degrades gracefully: timeouts and malformed blocks yield
//! best-effort partial results, and any I/O error flips the client back to
//! the not-logged-in state so the caller reconnects before the next cycle.

pub mod action;
pub mod block;
pub mod client;
pub mod error;
pub mod events;
pub mod types;

pub use action::Action;
pub use block::{Block, BlockReader};
pub use client::{ManagerClient, ManagerConfig};
pub use error::{Error, Result};
pub use events::EventListener;
pub use types::{
    parse_duration, parse_presence_dump, extract_extension,
    ChannelSnapshot, ChannelState, DeviceState, PresenceUpdate, QueueEntry, QueueEvent,
    QueueMember, QueueParams,
};

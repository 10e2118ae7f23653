//! Leg correlation
//!
//! Builds logical call records out of the per-channel snapshots returned
//! by one poll cycle. Two legs of one physical call show almost equal
//! elapsed time, so channels are grouped into 3-second duration buckets
//! and merged within each bucket: a trunk leg paired with a station leg
//! becomes one inbound or outbound call depending on the station leg's
//! dialplan context; unpaired trunk legs are inbound traffic still in
//! IVR/queue/ringing, unpaired station legs are internal calls.
//!
//! The transform is pure: identical input yields an identical record set,
//! and no channel id ever lands in more than one record.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use amimon_ami_core::{extract_extension, ChannelSnapshot};

/// Dialplan context fragments that mark a station leg as the originator
/// of an outbound trunk call.
const OUTBOUND_CONTEXTS: [&str; 3] = ["macro-dialout", "outbound", "dialout-trunk"];

/// Duration tolerance for grouping legs of one call.
const BUCKET_SECONDS: u64 = 3;

/// Key granularity for the deduplication pass.
const DEDUP_BUCKET_SECONDS: u64 = 5;

/// Direction of a logical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
    Internal,
}

/// One logical call derived from one or two channel legs. Valid only
/// within the cycle that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dstchannel: Option<String>,
    pub callerid: String,
    pub extension: String,
    pub destination: String,
    pub context: String,
    pub status: String,
    pub duration: u64,
    pub direction: Direction,
}

/// Live activity seen for one extension during the cycle.
#[derive(Debug, Clone, Default)]
pub struct LiveCounts {
    pub active: u32,
    pub inbound: u32,
    pub outbound: u32,
    pub internal: u32,
    pub ringing: bool,
    pub caller_name: String,
}

/// Correlation output for one cycle.
#[derive(Debug, Default)]
pub struct Correlation {
    pub calls: Vec<CallRecord>,
    pub active_calls: u32,
    pub extensions: HashMap<String, LiveCounts>,
}

fn is_gateway_leg(channel: &ChannelSnapshot, gateways: &[String]) -> bool {
    let name = channel.channel.to_ascii_lowercase();
    gateways.iter().any(|g| name.contains(g.as_str()))
}

fn is_outbound_context(context: &str) -> bool {
    let context = context.to_ascii_lowercase();
    OUTBOUND_CONTEXTS.iter().any(|p| context.contains(p))
}

fn caller_id(channel: &ChannelSnapshot) -> String {
    format!("{} <{}>", channel.caller_id_name, channel.caller_id_num)
}

/// Correlate one cycle's channel snapshots into call records and live
/// per-extension counters. `gateways` must already be normalized
/// (lowercase, no technology prefix).
pub fn correlate(channels: &[ChannelSnapshot], gateways: &[String]) -> Correlation {
    let mut result = Correlation::default();

    // Tolerant grouping: legs of one call land in the same bucket.
    let mut buckets: BTreeMap<u64, Vec<&ChannelSnapshot>> = BTreeMap::new();
    for channel in channels.iter().filter(|c| c.is_sip()) {
        let bucket = (channel.duration / BUCKET_SECONDS) * BUCKET_SECONDS;
        buckets.entry(bucket).or_default().push(channel);
    }

    for (bucket, group) in &buckets {
        let (gateway_legs, extension_legs): (Vec<&ChannelSnapshot>, Vec<&ChannelSnapshot>) =
            group.iter().copied().partition(|c| is_gateway_leg(c, gateways));

        if let (Some(gateway_leg), Some(extension_leg)) =
            (gateway_legs.first(), extension_legs.first())
        {
            let outbound = is_outbound_context(&extension_leg.context);
            let (primary, counterpart) = if outbound {
                (*extension_leg, *gateway_leg)
            } else {
                (*gateway_leg, *extension_leg)
            };
            // Outbound: the trunk leg carries the dialed number; inbound:
            // the station leg carries the target extension. Either way the
            // counterpart's Exten field is the destination.
            let destination = counterpart.extension.clone();
            debug!(
                "merged {} call {} -> {} (bucket {})",
                if outbound { "outbound" } else { "inbound" },
                primary.channel,
                counterpart.channel,
                bucket
            );
            result.calls.push(CallRecord {
                channel: primary.channel.clone(),
                dstchannel: Some(counterpart.channel.clone()),
                callerid: caller_id(primary),
                extension: primary.extension.clone(),
                destination,
                context: primary.context.clone(),
                status: primary.state.as_desc().to_string(),
                duration: primary.duration,
                direction: if outbound {
                    Direction::Outbound
                } else {
                    Direction::Inbound
                },
            });

            if let Some(ext) = extract_extension(&extension_leg.channel) {
                let counts = result.extensions.entry(ext).or_default();
                if counts.caller_name.is_empty() {
                    counts.caller_name = extension_leg.caller_id_name.clone();
                }
                if outbound {
                    counts.outbound += 1;
                } else {
                    counts.inbound += 1;
                }
                if extension_leg.state.is_answered() {
                    counts.active += 1;
                }
                if extension_leg.state.is_ringing() {
                    counts.ringing = true;
                }
            }
        } else if !gateway_legs.is_empty() {
            // Trunk traffic not yet bridged to a station: IVR, queue, or
            // still ringing. One inbound record per leg.
            for leg in &gateway_legs {
                result.calls.push(CallRecord {
                    channel: leg.channel.clone(),
                    dstchannel: None,
                    callerid: caller_id(leg),
                    extension: leg.extension.clone(),
                    destination: leg.extension.clone(),
                    context: leg.context.clone(),
                    status: leg.state.as_desc().to_string(),
                    duration: leg.duration,
                    direction: Direction::Inbound,
                });
            }
        } else {
            // Station-to-station traffic.
            for leg in &extension_legs {
                result.calls.push(CallRecord {
                    channel: leg.channel.clone(),
                    dstchannel: None,
                    callerid: caller_id(leg),
                    extension: leg.extension.clone(),
                    destination: leg.extension.clone(),
                    context: leg.context.clone(),
                    status: leg.state.as_desc().to_string(),
                    duration: leg.duration,
                    direction: Direction::Internal,
                });
                if let Some(ext) = extract_extension(&leg.channel) {
                    let counts = result.extensions.entry(ext).or_default();
                    if counts.caller_name.is_empty() {
                        counts.caller_name = leg.caller_id_name.clone();
                    }
                    counts.internal += 1;
                    if leg.state.is_answered() {
                        counts.active += 1;
                    }
                    if leg.state.is_ringing() {
                        counts.ringing = true;
                    }
                }
            }
        }
    }

    result.calls = dedup(result.calls, gateways);
    result.active_calls = result
        .calls
        .iter()
        .filter(|c| c.status == "Up")
        .count() as u32;
    result
}

/// Drop near-duplicate records mapped to the same caller/extension within
/// a 5-second window, preferring a trunk-tagged record over a plain one.
fn dedup(calls: Vec<CallRecord>, gateways: &[String]) -> Vec<CallRecord> {
    let mut index: HashMap<(String, String, u64), usize> = HashMap::new();
    let mut kept: Vec<CallRecord> = Vec::with_capacity(calls.len());

    for call in calls {
        let key = (
            call.callerid.clone(),
            call.extension.clone(),
            (call.duration / DEDUP_BUCKET_SECONDS) * DEDUP_BUCKET_SECONDS,
        );
        let tagged = {
            let name = call.channel.to_ascii_lowercase();
            gateways.iter().any(|g| name.contains(g.as_str()))
        };
        match index.get(&key) {
            None => {
                index.insert(key, kept.len());
                kept.push(call);
            }
            Some(&at) => {
                let existing_tagged = {
                    let name = kept[at].channel.to_ascii_lowercase();
                    gateways.iter().any(|g| name.contains(g.as_str()))
                };
                if tagged && !existing_tagged {
                    debug!("dedup: preferring trunk record {}", call.channel);
                    kept[at] = call;
                }
            }
        }
    }
    kept
}

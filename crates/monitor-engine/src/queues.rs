//! Queue-status aggregation
//!
//! Folds the ordered `QueueStatus` event stream into one summary per
//! queue. A `QueueParams` event establishes the current queue; member and
//! entry events that follow attach to it until the next `QueueParams`.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use amimon_ami_core::QueueEvent;

/// One queue member in the published snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct MemberSnapshot {
    pub name: String,
    pub interface: String,
    pub membership: String,
    pub penalty: u32,
    pub calls_taken: u64,
    pub last_call: u64,
    pub paused: bool,
    pub in_call: bool,
    pub status: u32,
}

/// One waiting caller in the published snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct WaitingCall {
    pub position: u32,
    pub channel: String,
    pub caller_id: String,
    pub caller_name: String,
    pub wait: u64,
}

/// Per-queue summary, rebuilt every cycle.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueSnapshot {
    pub name: String,
    pub max: u32,
    pub strategy: String,
    pub calls_waiting: u32,
    pub hold_time: u64,
    pub talk_time: u64,
    pub completed: u64,
    pub abandoned: u64,
    pub service_level: u64,
    pub service_level_perf: f64,
    pub total_members: u32,
    pub available_members: u32,
    pub paused_members: u32,
    pub busy_members: u32,
    pub longest_wait: u64,
    pub members: Vec<MemberSnapshot>,
    pub waiting_calls: Vec<WaitingCall>,
}

/// Fold one cycle's queue events into per-queue summaries, sorted by
/// queue name.
pub fn aggregate_queues(events: &[QueueEvent]) -> Vec<QueueSnapshot> {
    let mut queues: BTreeMap<String, QueueSnapshot> = BTreeMap::new();
    let mut current: Option<String> = None;

    for event in events {
        match event {
            QueueEvent::Params(params) => {
                current = Some(params.queue.clone());
                let snapshot = queues.entry(params.queue.clone()).or_default();
                snapshot.name = params.queue.clone();
                snapshot.max = params.max;
                snapshot.strategy = params.strategy.clone();
                snapshot.calls_waiting = params.calls;
                snapshot.hold_time = params.hold_time;
                snapshot.talk_time = params.talk_time;
                snapshot.completed = params.completed;
                snapshot.abandoned = params.abandoned;
                snapshot.service_level = params.service_level;
                snapshot.service_level_perf = params.service_level_perf;
            }
            QueueEvent::Member(member) => {
                let Some(queue) = &current else {
                    debug!("queue member before any queue params; skipped");
                    continue;
                };
                let snapshot = queues.entry(queue.clone()).or_default();
                snapshot.members.push(MemberSnapshot {
                    name: member.name.clone(),
                    interface: member.interface.clone(),
                    membership: member.membership.clone(),
                    penalty: member.penalty,
                    calls_taken: member.calls_taken,
                    last_call: member.last_call,
                    paused: member.paused,
                    in_call: member.in_call,
                    status: member.status,
                });
            }
            QueueEvent::Entry(entry) => {
                let Some(queue) = &current else {
                    debug!("queue entry before any queue params; skipped");
                    continue;
                };
                let snapshot = queues.entry(queue.clone()).or_default();
                snapshot.waiting_calls.push(WaitingCall {
                    position: entry.position,
                    channel: entry.channel.clone(),
                    caller_id: entry.caller_id_num.clone(),
                    caller_name: entry.caller_id_name.clone(),
                    wait: entry.wait,
                });
            }
        }
    }

    for snapshot in queues.values_mut() {
        snapshot.total_members = snapshot.members.len() as u32;
        snapshot.paused_members = snapshot.members.iter().filter(|m| m.paused).count() as u32;
        snapshot.busy_members = snapshot.members.iter().filter(|m| m.in_call).count() as u32;
        snapshot.available_members = snapshot
            .members
            .iter()
            .filter(|m| !m.paused && !m.in_call)
            .count() as u32;
        snapshot.longest_wait = snapshot
            .waiting_calls
            .iter()
            .map(|e| e.wait)
            .max()
            .unwrap_or(0);
    }

    queues.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use amimon_ami_core::{QueueEntry, QueueMember, QueueParams};
    use pretty_assertions::assert_eq;

    fn params(queue: &str, max: u32, calls: u32) -> QueueEvent {
        QueueEvent::Params(QueueParams {
            queue: queue.to_string(),
            max,
            calls,
            ..Default::default()
        })
    }

    fn member(name: &str, paused: bool, in_call: bool) -> QueueEvent {
        QueueEvent::Member(QueueMember {
            name: name.to_string(),
            paused,
            in_call,
            ..Default::default()
        })
    }

    fn entry(position: u32, wait: u64) -> QueueEvent {
        QueueEvent::Entry(QueueEntry {
            position,
            wait,
            ..Default::default()
        })
    }

    #[test]
    fn params_members_and_entries_make_one_snapshot() {
        let events = vec![
            params("support", 5, 2),
            member("Alice", false, false),
            member("Bob", false, true),
            entry(1, 45),
        ];
        let queues = aggregate_queues(&events);

        assert_eq!(queues.len(), 1);
        let q = &queues[0];
        assert_eq!(q.name, "support");
        assert_eq!(q.max, 5);
        assert_eq!(q.calls_waiting, 2);
        assert_eq!(q.total_members, 2);
        assert_eq!(q.available_members, 1);
        assert_eq!(q.busy_members, 1);
        assert_eq!(q.longest_wait, 45);
    }

    #[test]
    fn context_switches_on_each_params_event() {
        let events = vec![
            params("support", 5, 0),
            member("Alice", false, false),
            params("sales", 3, 1),
            member("Bob", true, false),
            entry(1, 10),
        ];
        let queues = aggregate_queues(&events);

        assert_eq!(queues.len(), 2);
        // Sorted by name: sales first.
        assert_eq!(queues[0].name, "sales");
        assert_eq!(queues[0].paused_members, 1);
        assert_eq!(queues[0].longest_wait, 10);
        assert_eq!(queues[1].name, "support");
        assert_eq!(queues[1].total_members, 1);
        assert_eq!(queues[1].longest_wait, 0);
    }

    #[test]
    fn orphan_events_before_params_are_skipped() {
        let events = vec![member("Ghost", false, false), params("support", 5, 0)];
        let queues = aggregate_queues(&events);
        assert_eq!(queues.len(), 1);
        assert_eq!(queues[0].total_members, 0);
    }

    #[test]
    fn no_entries_means_zero_longest_wait() {
        let queues = aggregate_queues(&[params("support", 5, 0)]);
        assert_eq!(queues[0].longest_wait, 0);
        assert!(queues[0].waiting_calls.is_empty());
    }
}

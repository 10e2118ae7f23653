//! Presence ledger
//!
//! Tracks the declared availability of every extension and keeps a
//! same-day history of break intervals. The ledger is mutated only by the
//! event loop; the poll loop reads whole-record clones, so a reader never
//! observes a half-applied transition. Entries from prior days are pruned
//! lazily when a record is read, never eagerly.

use chrono::{DateTime, NaiveDate, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

const DND_TOKENS: [&str; 4] = ["dnd", "do-not-disturb", "donotdisturb", "do_not_disturb"];

const AWAY_TOKENS: [&str; 10] = [
    "break",
    "lunch",
    "meeting",
    "training",
    "away",
    "extended-away",
    "extendedaway",
    "xa",
    "out",
    "unavailable",
];

/// Presence state derived from a raw label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceState {
    Available,
    Away,
    Dnd,
}

impl PresenceState {
    /// Away and dnd both interrupt availability; the distinction only
    /// matters for reporting, not for interval accounting.
    pub fn is_away_like(&self) -> bool {
        !matches!(self, PresenceState::Available)
    }
}

/// Map a raw presence label to (state, subtype, note).
///
/// The head token (up to the first comma) selects the state and becomes
/// the subtype; any remainder is kept as a free-text note. Unrecognized
/// tokens mean available.
pub fn classify_label(raw: &str) -> (PresenceState, Option<String>, Option<String>) {
    let (token, note) = match raw.split_once(',') {
        Some((head, tail)) => (head, Some(tail.trim())),
        None => (raw, None),
    };
    let token = token.trim().to_ascii_lowercase();
    let note = note.filter(|n| !n.is_empty()).map(str::to_string);

    if DND_TOKENS.contains(&token.as_str()) {
        (PresenceState::Dnd, Some(token), note)
    } else if AWAY_TOKENS.contains(&token.as_str()) {
        (PresenceState::Away, Some(token), note)
    } else {
        (PresenceState::Available, None, note)
    }
}

/// One away period for an extension. Append-only within a day; at most
/// one interval per extension is ever open.
#[derive(Debug, Clone, Serialize)]
pub struct BreakInterval {
    pub date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub subtype: Option<String>,
    pub note: Option<String>,
    pub duration: Option<u64>,
}

/// Current presence and today's break history for one extension.
#[derive(Debug, Clone, Serialize)]
pub struct PresenceRecord {
    pub extension: String,
    pub state: PresenceState,
    pub subtype: Option<String>,
    pub note: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub intervals: Vec<BreakInterval>,
}

impl PresenceRecord {
    fn new(extension: &str, now: DateTime<Utc>) -> Self {
        Self {
            extension: extension.to_string(),
            state: PresenceState::Available,
            subtype: None,
            note: None,
            updated_at: now,
            intervals: Vec::new(),
        }
    }

    /// Count and total seconds of today's closed intervals.
    pub fn break_totals(&self) -> (u32, u64) {
        let count = self.intervals.len() as u32;
        let seconds = self.intervals.iter().filter_map(|i| i.duration).sum();
        (count, seconds)
    }
}

/// The ledger. Sole mutator is the event loop; see the module docs.
pub struct PresenceLedger {
    records: DashMap<String, PresenceRecord>,
}

impl PresenceLedger {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    /// Apply a live presence transition.
    pub fn apply(&self, extension: &str, raw_label: &str) {
        self.apply_at(extension, raw_label, Utc::now());
    }

    /// Apply a transition at an explicit instant (exposed for tests).
    pub fn apply_at(&self, extension: &str, raw_label: &str, now: DateTime<Utc>) {
        let (state, subtype, note) = classify_label(raw_label);
        let mut entry = self
            .records
            .entry(extension.to_string())
            .or_insert_with(|| PresenceRecord::new(extension, now));
        let record = entry.value_mut();

        let was_away = record.state.is_away_like();
        match (was_away, state.is_away_like()) {
            (false, true) => {
                debug!("{}: opening break interval ({:?})", extension, subtype);
                record.intervals.push(BreakInterval {
                    date: now.date_naive(),
                    start: now,
                    end: None,
                    subtype: subtype.clone(),
                    note: note.clone(),
                    duration: None,
                });
            }
            (true, false) => {
                if let Some(open) = record.intervals.iter_mut().rev().find(|i| i.end.is_none()) {
                    let seconds = (now - open.start).num_seconds().max(0) as u64;
                    open.end = Some(now);
                    open.duration = Some(seconds);
                    debug!("{}: closed break interval after {}s", extension, seconds);
                }
            }
            // Away-to-away (e.g. break to lunch, away to dnd) and
            // available-to-available only refresh the live state.
            _ => {}
        }

        record.state = state;
        record.subtype = subtype;
        record.note = note;
        record.updated_at = now;
    }

    /// Initialize an extension from the one-shot presence dump. Known
    /// extensions are left alone and no interval is ever created: only
    /// live transitions build break history.
    pub fn seed(&self, extension: &str, raw_label: &str) {
        if self.records.contains_key(extension) {
            return;
        }
        let now = Utc::now();
        let (state, subtype, note) = classify_label(raw_label);
        self.records.entry(extension.to_string()).or_insert_with(|| {
            let mut record = PresenceRecord::new(extension, now);
            record.state = state;
            record.subtype = subtype;
            record.note = note;
            record
        });
    }

    /// Read one extension's record, pruning intervals from prior days.
    pub fn get(&self, extension: &str) -> Option<PresenceRecord> {
        self.get_at(extension, Utc::now().date_naive())
    }

    pub fn get_at(&self, extension: &str, today: NaiveDate) -> Option<PresenceRecord> {
        let mut entry = self.records.get_mut(extension)?;
        let record = entry.value_mut();
        record.intervals.retain(|i| i.date == today);
        Some(record.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for PresenceLedger {
    fn default() -> Self {
        Self::new()
    }
}

use std::collections::HashMap;

use crate::types::{ChannelKey, Message};

/// Two messages from the same sender with the same content closer together than
/// this many milliseconds are treated as one message.
pub const DEDUP_WINDOW_MS: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackfillOutcome {
    /// History was installed; `live_kept` messages that arrived before it were
    /// preserved after the backfilled prefix.
    Installed { backfilled: usize, live_kept: usize },
    AlreadyPopulated,
}

#[derive(Debug, Default)]
struct ChannelEntry {
    messages: Vec<Message>,
    backfilled: bool,
}

#[derive(Debug, Default)]
pub struct ChannelStateStore {
    channels: HashMap<ChannelKey, ChannelEntry>,
}

pub fn is_duplicate(existing: &Message, candidate: &Message) -> bool {
    existing.sender == candidate.sender
        && existing.content == candidate.content
        && (existing.timestamp - candidate.timestamp)
            .num_milliseconds()
            .abs()
            < DEDUP_WINDOW_MS
}

fn contains_duplicate(messages: &[Message], candidate: &Message) -> bool {
    messages
        .iter()
        .any(|existing| is_duplicate(existing, candidate))
}

impl ChannelStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the initial history for `key` once. Later calls leave the
    /// channel untouched.
    pub fn backfill(&mut self, key: ChannelKey, messages: Vec<Message>) -> BackfillOutcome {
        let entry = self.channels.entry(key).or_default();
        if entry.backfilled {
            return BackfillOutcome::AlreadyPopulated;
        }

        let live = std::mem::replace(&mut entry.messages, messages);
        let backfilled = entry.messages.len();
        let mut live_kept = 0;
        for message in live {
            if !contains_duplicate(&entry.messages, &message) {
                entry.messages.push(message);
                live_kept += 1;
            }
        }
        entry.backfilled = true;

        BackfillOutcome::Installed {
            backfilled,
            live_kept,
        }
    }

    /// Appends `message` unless an equivalent one is already present. Returns
    /// whether it was appended.
    pub fn append(&mut self, key: ChannelKey, message: Message) -> bool {
        let entry = self.channels.entry(key).or_default();
        if contains_duplicate(&entry.messages, &message) {
            return false;
        }
        entry.messages.push(message);
        true
    }

    pub fn read(&self, key: &ChannelKey) -> &[Message] {
        self.channels
            .get(key)
            .map(|entry| entry.messages.as_slice())
            .unwrap_or_default()
    }

    pub fn is_backfilled(&self, key: &ChannelKey) -> bool {
        self.channels
            .get(key)
            .map(|entry| entry.backfilled)
            .unwrap_or(false)
    }

    pub fn channels(&self) -> impl Iterator<Item = &ChannelKey> {
        self.channels.keys()
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;

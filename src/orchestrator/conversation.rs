//! Per-channel conversation state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::providers::ChatMessage;

use super::plan::ProfileUpdate;

/// State of one channel: its turn history and at most one pending update.
#[derive(Debug, Default)]
pub struct ChannelState {
    pub history: Vec<ChatMessage>,
    pub pending: Option<ProfileUpdate>,
}

impl ChannelState {
    /// Record an exchange and keep only the newest `cap` messages.
    pub fn push_exchange(&mut self, instruction: &str, response: &str, cap: usize) {
        self.history.push(ChatMessage::user(instruction));
        self.history.push(ChatMessage::assistant(response));
        if self.history.len() > cap {
            let excess = self.history.len() - cap;
            self.history.drain(..excess);
        }
    }

    /// The newest `turns` messages.
    pub fn recent(&self, turns: usize) -> &[ChatMessage] {
        let start = self.history.len().saturating_sub(turns);
        &self.history[start..]
    }
}

/// Number of tracked channels above which idle entries are pruned.
pub const PRUNE_THRESHOLD: usize = 1024;

/// Channel states behind one async lock each.
///
/// Holding a channel's guard serialises every read and write of that
/// channel's history and pending slot; other channels proceed independently.
///
/// Once more than [`PRUNE_THRESHOLD`] channels are tracked, entries that are
/// unlocked, unreferenced and hold neither history nor a pending update are
/// dropped. Channels with history are kept for the life of the store.
#[derive(Default)]
pub struct ConversationStore {
    channels: Mutex<HashMap<String, Arc<AsyncMutex<ChannelState>>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, channel: &str) -> Arc<AsyncMutex<ChannelState>> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if channels.len() >= PRUNE_THRESHOLD && !channels.contains_key(channel) {
            prune_idle(&mut channels);
        }
        Arc::clone(channels.entry(channel.to_string()).or_default())
    }

    /// Exclusive access to a channel, created on first use.
    pub async fn lock(&self, channel: &str) -> OwnedMutexGuard<ChannelState> {
        self.slot(channel).lock_owned().await
    }

    /// Copy of a channel's history.
    pub async fn history(&self, channel: &str) -> Vec<ChatMessage> {
        self.lock(channel).await.history.clone()
    }

    /// Copy of a channel's pending profile update.
    pub async fn pending(&self, channel: &str) -> Option<ProfileUpdate> {
        self.lock(channel).await.pending.clone()
    }

    /// Channels seen so far, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

fn prune_idle(channels: &mut HashMap<String, Arc<AsyncMutex<ChannelState>>>) {
    let before = channels.len();
    channels.retain(|_, slot| {
        if Arc::strong_count(slot) > 1 {
            return true;
        }
        match slot.try_lock() {
            Ok(state) => !state.history.is_empty() || state.pending.is_some(),
            Err(_) => true,
        }
    });
    debug!(before, after = channels.len(), "conversation.pruned");
}

use crate::{
    entities::{PendingTrial, Protocol},
    utils::random_hex_upper,
};
use ahash::AHashMap;
use chrono::NaiveDateTime;
use compact_str::{format_compact, CompactString};
use parking_lot::Mutex;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const TRIAL_PREFIX: &str = "WV-";

type TimerKey = (Protocol, CompactString);

struct Pending {
    token: CancellationToken,
    fires_at: NaiveDateTime,
    id: u64,
}

/// Cancellable expiry timers for trial accounts, one per (protocol, username).
#[derive(Clone, Default)]
pub struct TrialScheduler {
    pending: Arc<Mutex<AHashMap<TimerKey, Pending>>>,
    next_id: Arc<AtomicU64>,
}

impl TrialScheduler {
    /// `WV-` followed by an uppercase hex suffix.
    pub fn random_username(protocol: Protocol) -> CompactString {
        format_compact!(
            "{TRIAL_PREFIX}{}",
            random_hex_upper(protocol.trial_suffix_len())
        )
    }

    /// Arms `action` to run after `delay`, replacing any timer for the same account.
    pub fn schedule<F>(
        &self,
        protocol: Protocol,
        username: CompactString,
        fires_at: NaiveDateTime,
        delay: Duration,
        action: F,
    ) where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let key = (protocol, username);

        let previous = self.pending.lock().insert(
            key.clone(),
            Pending {
                token: token.clone(),
                fires_at,
                id,
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        let pending = self.pending.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(protocol = %key.0, username = %key.1, "trial timer cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    {
                        let mut pending = pending.lock();
                        if pending.get(&key).is_some_and(|entry| entry.id == id) {
                            pending.remove(&key);
                        }
                    }

                    debug!(protocol = %key.0, username = %key.1, "trial timer fired");
                    action.await;
                }
            }
        });
    }

    pub fn cancel(&self, protocol: Protocol, username: &str) -> bool {
        let removed = self
            .pending
            .lock()
            .remove(&(protocol, CompactString::from(username)));

        match removed {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, protocol: Protocol, username: &str) -> bool {
        self.pending
            .lock()
            .contains_key(&(protocol, CompactString::from(username)))
    }

    /// Armed timers, soonest first.
    pub fn pending(&self) -> Vec<PendingTrial> {
        let mut pending: Vec<PendingTrial> = self
            .pending
            .lock()
            .iter()
            .map(|((protocol, username), entry)| PendingTrial {
                protocol: *protocol,
                username: username.clone(),
                fires_at: entry.fires_at,
            })
            .collect();

        pending.sort_by(|a, b| a.fires_at.cmp(&b.fires_at).then(a.username.cmp(&b.username)));
        pending
    }
}

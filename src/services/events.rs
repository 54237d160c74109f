use crate::entities::Protocol;
use chrono::NaiveDateTime;
use compact_str::CompactString;
use serde::Serialize;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{info, warn};

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    TrialCreated,
    Renewed,
    Deleted,
    Expired,
}

/// Published after a mutation has been committed to the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct AccountEvent {
    pub kind: EventKind,
    pub protocol: Protocol,
    pub username: CompactString,
    pub at: NaiveDateTime,
}

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<AccountEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }
}

impl EventBus {
    /// Having no subscribers is fine.
    pub fn publish(&self, event: AccountEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AccountEvent> {
        self.sender.subscribe()
    }

    /// Logs every event; stands in for the notification relay.
    pub fn spawn_logger(&self) -> JoinHandle<()> {
        let mut receiver = self.subscribe();

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => info!(
                        kind = ?event.kind,
                        protocol = %event.protocol,
                        username = %event.username,
                        at = %event.at,
                        "account event"
                    ),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "event logger lagged"),
                    Err(RecvError::Closed) => return,
                }
            }
        })
    }
}

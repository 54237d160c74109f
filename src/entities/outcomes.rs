use chrono::NaiveDateTime;
use compact_str::CompactString;
use serde::Serialize;

use super::{Account, AccountStatus, ConnectionLink, Protocol};

/// Result of a successful `create` or `create_trial`.
#[derive(Debug, Clone, Serialize)]
pub struct Provisioned {
    #[serde(flatten)]
    pub account: Account,
    pub is_trial: bool,
    pub links: Vec<ConnectionLink>,
    pub config_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListedAccount {
    #[serde(flatten)]
    pub account: Account,
    pub is_trial: bool,
    pub status: AccountStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct Renewed {
    #[serde(flatten)]
    pub account: Account,
    pub previous_expiry: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProtocolSummary {
    pub protocol: Protocol,
    pub total_accounts: usize,
    pub active_accounts: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingTrial {
    pub protocol: Protocol,
    pub username: CompactString,
    pub fires_at: NaiveDateTime,
}

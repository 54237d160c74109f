use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use compact_str::CompactString;
use serde::{Serialize, Serializer};
use std::fmt;

use super::Protocol;

pub const DEFAULT_CIPHER: &str = "aes-128-gcm";

const DAY_FORMAT: &str = "%Y-%m-%d";
const MINUTE_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Account expiry as stored in the ledger.
///
/// Persistent accounts expire at the start of a calendar day, trial accounts
/// at a local timestamp truncated to the minute. A token that parses as
/// neither is kept verbatim so a bad row never aborts a listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expiry {
    Day(NaiveDate),
    Minute(NaiveDateTime),
    Unknown(CompactString),
}

impl Expiry {
    pub fn parse(token: &str) -> Self {
        if let Ok(at) = NaiveDateTime::parse_from_str(token, MINUTE_FORMAT) {
            return Expiry::Minute(at);
        }

        match NaiveDate::parse_from_str(token, DAY_FORMAT) {
            Ok(day) => Expiry::Day(day),
            Err(_) => Expiry::Unknown(CompactString::from(token)),
        }
    }

    /// `None` when the result falls outside the representable calendar.
    pub fn days_from(now: NaiveDateTime, days: u32) -> Option<Self> {
        now.date()
            .checked_add_signed(Duration::days(i64::from(days)))
            .map(Expiry::Day)
    }

    pub fn minutes_from(now: NaiveDateTime, minutes: u32) -> Option<Self> {
        truncate_to_minute(now)
            .checked_add_signed(Duration::minutes(i64::from(minutes)))
            .map(Expiry::Minute)
    }

    /// The instant the account stops being active.
    pub fn instant(&self) -> Option<NaiveDateTime> {
        match self {
            Expiry::Day(day) => day.and_hms_opt(0, 0, 0),
            Expiry::Minute(at) => Some(*at),
            Expiry::Unknown(_) => None,
        }
    }

    /// Calendar day handed to the OS account-expiry mechanism.
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            Expiry::Day(day) => Some(*day),
            Expiry::Minute(at) => Some(at.date()),
            Expiry::Unknown(_) => None,
        }
    }

    #[inline]
    pub fn is_minute_precision(&self) -> bool {
        matches!(self, Expiry::Minute(_))
    }

    /// Additive renewal: `max(current, now) + days`, keeping the granularity.
    ///
    /// The result is always strictly later than the current expiry as long as
    /// `days` is non-zero; `None` if it would overflow the calendar.
    pub fn extended(&self, now: NaiveDateTime, days: u32) -> Option<Self> {
        let days = Duration::days(i64::from(days));

        match self {
            Expiry::Day(day) => (*day).max(now.date()).checked_add_signed(days).map(Expiry::Day),
            Expiry::Minute(at) => (*at)
                .max(truncate_to_minute(now))
                .checked_add_signed(days)
                .map(Expiry::Minute),
            Expiry::Unknown(_) => now.date().checked_add_signed(days).map(Expiry::Day),
        }
    }

    pub fn status_at(&self, now: NaiveDateTime) -> AccountStatus {
        match self.instant() {
            Some(at) if now < at => AccountStatus::Active,
            Some(_) => AccountStatus::Expired,
            None => AccountStatus::Unknown,
        }
    }

    /// Human-readable form used in descriptor artifacts.
    pub fn display_long(&self) -> String {
        match self {
            Expiry::Day(day) => day.format("%d %b %Y").to_string(),
            Expiry::Minute(at) => at.format("%d %b %Y %H:%M").to_string(),
            Expiry::Unknown(raw) => raw.to_string(),
        }
    }
}

impl fmt::Display for Expiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expiry::Day(day) => write!(f, "{}", day.format(DAY_FORMAT)),
            Expiry::Minute(at) => write!(f, "{}", at.format(MINUTE_FORMAT)),
            Expiry::Unknown(raw) => f.write_str(raw),
        }
    }
}

impl Serialize for Expiry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

fn truncate_to_minute(at: NaiveDateTime) -> NaiveDateTime {
    at.with_second(0)
        .and_then(|at| at.with_nanosecond(0))
        .unwrap_or(at)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Expired,
    Unknown,
}

/// Per-account resource caps. Zero means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Limits {
    pub quota_gb: u64,
    pub ip_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub protocol: Protocol,
    pub username: CompactString,
    pub credential: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cipher: Option<String>,
    pub expiry: Expiry,
    #[serde(flatten)]
    pub limits: Limits,
}

impl Account {
    /// Trial accounts are the ones whose expiry carries a time of day.
    #[inline]
    pub fn is_trial(&self) -> bool {
        self.expiry.is_minute_precision()
    }

    pub fn cipher(&self) -> &str {
        self.cipher.as_deref().unwrap_or(DEFAULT_CIPHER)
    }
}

use super::{descriptors, AccountEvent, DaemonReloader, Directory, EventBus, EventKind, TrialScheduler};
use crate::{
    config::{MetadataFiles, Settings},
    entities::{
        Account, AccountStatus, CreateAccount, Expiry, Limits, ListedAccount, PendingTrial, Protocol, ProtocolSummary,
        Provisioned, RenewAccount, Renewed, ServerMetadata, TrialTarget, DEFAULT_CIPHER,
    },
    error::{AccountError, AppResult, DirectoryError},
    repositories::{ArtifactStore, Ledger, LimitStore, ProxyConfig},
    utils::{is_valid_username, random_password},
};
use ahash::AHashSet;
use chrono::{Local, NaiveDate, NaiveDateTime};
use compact_str::CompactString;
use futures::future::join_all;
use once_cell::sync::Lazy;
use std::{collections::BTreeMap, path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Produces candidate trial usernames.
pub type TrialNames = Arc<dyn Fn(Protocol) -> CompactString + Send + Sync>;

pub const DEFAULT_DAYS: u32 = 30;
pub const DEFAULT_TRIAL_MINUTES: u32 = 60;

const MAX_TRIAL_ATTEMPTS: usize = 8;
const TRIAL_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 64;

static SHADOWSOCKS_CIPHERS: Lazy<AHashSet<&'static str>> = Lazy::new(|| {
    [
        "aes-128-gcm",
        "aes-256-gcm",
        "chacha20-ietf-poly1305",
        "xchacha20-ietf-poly1305",
        "2022-blake3-aes-128-gcm",
        "2022-blake3-aes-256-gcm",
        "2022-blake3-chacha20-poly1305",
    ]
    .into_iter()
    .collect()
});

#[inline]
fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

fn validate_username(username: Option<&str>) -> AppResult<&str> {
    match username.map(str::trim) {
        None | Some("") => Err(AccountError::Validation("username is required".to_string())),
        Some(username) if is_valid_username(username) => Ok(username),
        Some(username) => Err(AccountError::Validation(format!(
            "invalid username '{username}': use 1-32 letters, digits, '_' or '-', not starting with '-'"
        ))),
    }
}

fn validate_password(password: &str) -> AppResult<()> {
    if password.is_empty() || password.len() > MAX_PASSWORD_LEN {
        return Err(AccountError::Validation(format!(
            "password must be 1-{MAX_PASSWORD_LEN} characters"
        )));
    }

    if password
        .chars()
        .any(|c| c == ':' || c.is_whitespace() || c.is_control())
    {
        return Err(AccountError::Validation(
            "password must not contain whitespace, control characters or ':'".to_string(),
        ));
    }

    Ok(())
}

fn validate_days(days: Option<u32>) -> AppResult<u32> {
    match days.unwrap_or(DEFAULT_DAYS) {
        0 => Err(AccountError::Validation("days must be at least 1".to_string())),
        days => Ok(days),
    }
}

fn validate_cipher(cipher: Option<&str>) -> AppResult<String> {
    let cipher = cipher.map(str::trim).unwrap_or(DEFAULT_CIPHER);

    if SHADOWSOCKS_CIPHERS.contains(cipher) {
        Ok(cipher.to_string())
    } else {
        Err(AccountError::Validation(format!("unsupported cipher '{cipher}'")))
    }
}

fn expiry_date(expiry: &Expiry) -> AppResult<NaiveDate> {
    expiry
        .date()
        .ok_or_else(|| AccountError::Validation(format!("unusable expiry '{expiry}'")))
}

fn out_of_range(what: &str, amount: u32) -> AccountError {
    AccountError::Validation(format!("{what} {amount} puts the expiry beyond the supported calendar"))
}

fn delay_until(fires_at: NaiveDateTime) -> Duration {
    (fires_at - now()).to_std().unwrap_or(Duration::ZERO)
}

/// One engine for every protocol: keeps the ledger, the proxy config or OS
/// directory, limit markers and descriptor artifacts in step.
///
/// Mutations on the same protocol are serialized by a per-protocol mutex; the
/// stores additionally take file locks so other processes see whole writes.
pub struct AccountEngine {
    data_root: PathBuf,
    locks: [Mutex<()>; 5],
    proxy: ProxyConfig,
    limits: LimitStore,
    artifacts: ArtifactStore,
    directory: Arc<dyn Directory>,
    trials: TrialScheduler,
    trial_names: TrialNames,
    events: EventBus,
    metadata: MetadataFiles,
}

impl AccountEngine {
    pub fn new(settings: &Settings, directory: Arc<dyn Directory>) -> Self {
        let reloader = DaemonReloader::new(settings.reload_command.clone(), settings.reload_timeout);

        Self {
            data_root: settings.data_root.clone(),
            locks: Default::default(),
            proxy: ProxyConfig::new(settings.proxy_config.clone(), reloader),
            limits: LimitStore::new(settings.data_root.clone(), settings.limits_root.clone()),
            artifacts: ArtifactStore::new(settings.web_root.clone(), settings.artifact_port),
            directory,
            trials: TrialScheduler::default(),
            trial_names: Arc::new(TrialScheduler::random_username),
            events: EventBus::default(),
            metadata: settings.metadata.clone(),
        }
    }

    /// Replaces the random `WV-` name source.
    pub fn with_trial_names(mut self, names: TrialNames) -> Self {
        self.trial_names = names;
        self
    }

    pub fn ledger(&self, protocol: Protocol) -> Ledger {
        Ledger::under(&self.data_root, protocol)
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn server_metadata(&self) -> ServerMetadata {
        ServerMetadata::load(&self.metadata).await
    }

    async fn lock(&self, protocol: Protocol) -> MutexGuard<'_, ()> {
        self.locks[protocol as usize].lock().await
    }

    pub async fn create(&self, protocol: Protocol, input: CreateAccount) -> AppResult<Provisioned> {
        let username = validate_username(input.username.as_deref())?;
        let days = validate_days(input.days)?;

        let credential = match protocol {
            Protocol::Ssh => {
                let password = input
                    .password
                    .as_deref()
                    .ok_or_else(|| AccountError::Validation("password is required".to_string()))?;
                validate_password(password)?;
                password.to_string()
            }
            _ => Uuid::new_v4().to_string(),
        };

        let cipher = match protocol {
            Protocol::Shadowsocks => Some(validate_cipher(input.cipher.as_deref())?),
            _ => None,
        };

        let account = Account {
            protocol,
            username: CompactString::from(username),
            credential,
            cipher,
            expiry: Expiry::days_from(now(), days).ok_or_else(|| out_of_range("days", days))?,
            limits: Limits {
                quota_gb: input.quota_gb.unwrap_or(0),
                ip_limit: input.ip_limit.unwrap_or(protocol.default_ip_limit()),
            },
        };

        let _guard = self.lock(protocol).await;

        self.ensure_available(protocol, username).await?;
        self.provision(&account).await?;
        info!(%protocol, username, expiry = %account.expiry, "account created");

        let provisioned = self.publish_descriptor(&account).await;
        self.publish(EventKind::Created, protocol, &account.username);

        Ok(provisioned)
    }

    pub async fn create_trial(
        self: &Arc<Self>,
        protocol: Protocol,
        minutes: Option<u32>,
    ) -> AppResult<Provisioned> {
        let minutes = minutes.unwrap_or(DEFAULT_TRIAL_MINUTES);
        if minutes == 0 {
            return Err(AccountError::Validation("minutes must be at least 1".to_string()));
        }

        let guard = self.lock(protocol).await;

        let mut username = None;
        for _ in 0..MAX_TRIAL_ATTEMPTS {
            let candidate = (self.trial_names)(protocol);
            match self.ensure_available(protocol, &candidate).await {
                Ok(()) => {
                    username = Some(candidate);
                    break;
                }
                Err(AccountError::Conflict(_)) => {
                    debug!(%protocol, %candidate, "trial username taken, retrying");
                }
                Err(e) => return Err(e),
            }
        }
        let Some(username) = username else {
            return Err(AccountError::Conflict(format!(
                "no free {protocol} trial username after {MAX_TRIAL_ATTEMPTS} attempts"
            )));
        };

        let (credential, cipher) = match protocol {
            Protocol::Ssh => (random_password(TRIAL_PASSWORD_LEN), None),
            Protocol::Shadowsocks => (Uuid::new_v4().to_string(), Some(DEFAULT_CIPHER.to_string())),
            _ => (Uuid::new_v4().to_string(), None),
        };

        let account = Account {
            protocol,
            username,
            credential,
            cipher,
            expiry: Expiry::minutes_from(now(), minutes).ok_or_else(|| out_of_range("minutes", minutes))?,
            limits: protocol.trial_limits(),
        };

        self.provision(&account).await?;
        info!(%protocol, username = %account.username, expiry = %account.expiry, "trial account created");

        let provisioned = self.publish_descriptor(&account).await;
        if let Some(fires_at) = account.expiry.instant() {
            self.arm_expiry(protocol, account.username.clone(), fires_at, delay_until(fires_at));
        }
        drop(guard);

        self.publish(EventKind::TrialCreated, protocol, &account.username);

        Ok(provisioned)
    }

    /// Creates one trial per targeted protocol; each protocol succeeds or fails on its own.
    pub async fn create_trials(
        self: &Arc<Self>,
        target: TrialTarget,
        minutes: Option<u32>,
    ) -> BTreeMap<Protocol, AppResult<Provisioned>> {
        let protocols = target.protocols();
        let results = join_all(
            protocols
                .iter()
                .map(|&protocol| self.create_trial(protocol, minutes)),
        )
        .await;

        protocols.into_iter().zip(results).collect()
    }

    /// Every ledger account with its status at the current time.
    pub async fn list(&self, protocol: Protocol) -> AppResult<Vec<ListedAccount>> {
        let now = now();
        let accounts = self.ledger(protocol).scan().await?;

        Ok(accounts
            .into_iter()
            .map(|account| ListedAccount {
                is_trial: account.is_trial(),
                status: account.expiry.status_at(now),
                account,
            })
            .collect())
    }

    /// Removes the account everywhere; returns whether anything was there.
    pub async fn delete(&self, protocol: Protocol, username: Option<&str>) -> AppResult<bool> {
        let username = validate_username(username)?;

        let _guard = self.lock(protocol).await;
        let existed = self.delete_locked(protocol, username).await?;

        if existed {
            info!(%protocol, username, "account deleted");
            self.publish(EventKind::Deleted, protocol, username);
        } else {
            debug!(%protocol, username, "delete of absent account");
        }

        Ok(existed)
    }

    pub async fn renew(self: &Arc<Self>, protocol: Protocol, input: RenewAccount) -> AppResult<Renewed> {
        let username = validate_username(input.username.as_deref())?;
        let days = validate_days(input.days)?;

        if let Some(password) = input.password.as_deref() {
            if protocol != Protocol::Ssh {
                return Err(AccountError::Validation(format!(
                    "password can only be changed on ssh accounts, not {protocol}"
                )));
            }
            validate_password(password)?;
        }

        let _guard = self.lock(protocol).await;
        let ledger = self.ledger(protocol);

        let Some(current) = ledger.find(username).await? else {
            return Err(AccountError::NotFound(format!("{protocol} account {username} not found")));
        };

        let mut renewed = current.clone();
        renewed.expiry = current
            .expiry
            .extended(now(), days)
            .ok_or_else(|| out_of_range("days", days))?;
        if let Some(quota_gb) = input.quota_gb {
            renewed.limits.quota_gb = quota_gb;
        }
        if let Some(ip_limit) = input.ip_limit {
            renewed.limits.ip_limit = ip_limit;
        }
        if let Some(password) = input.password.as_deref() {
            renewed.credential = password.to_string();
        }

        let password_changed = input.password.is_some();
        let limits_changed = input.quota_gb.is_some() || input.ip_limit.is_some();

        self.refresh_external(&renewed, password_changed).await?;

        let limits_applied = if limits_changed {
            self.limits.apply(protocol, username, &renewed.limits).await
        } else {
            Ok(())
        };
        let committed = match limits_applied {
            Ok(()) => {
                let renewed = renewed.clone();
                ledger.update(username, move |account| *account = renewed).await
            }
            Err(e) => Err(e),
        };

        let stored = match committed {
            Ok(stored) => stored,
            Err(e) => {
                error!(%protocol, username, error = %e, "renewal commit failed, restoring previous state");
                self.restore_external(&current, password_changed).await;
                if limits_changed {
                    if let Err(restore) = self.limits.apply(protocol, username, &current.limits).await {
                        warn!(%protocol, username, error = %restore, "failed to restore limit markers");
                    }
                }
                return Err(e.into());
            }
        };
        if stored.is_none() {
            return Err(AccountError::NotFound(format!(
                "{protocol} account {username} disappeared during renewal"
            )));
        }

        info!(%protocol, username, from = %current.expiry, to = %renewed.expiry, "account renewed");

        self.publish_descriptor(&renewed).await;
        if renewed.is_trial() {
            if let Some(fires_at) = renewed.expiry.instant() {
                self.arm_expiry(protocol, renewed.username.clone(), fires_at, delay_until(fires_at));
            }
        }
        self.publish(EventKind::Renewed, protocol, username);

        Ok(Renewed {
            account: renewed,
            previous_expiry: current.expiry.to_string(),
        })
    }

    /// Per-protocol totals; a protocol whose ledger cannot be read fails the whole call.
    pub async fn summary(&self) -> AppResult<Vec<ProtocolSummary>> {
        let now = now();
        let mut summary = Vec::with_capacity(Protocol::ALL.len());

        for protocol in Protocol::ALL {
            let accounts = self.ledger(protocol).scan().await?;
            summary.push(ProtocolSummary {
                protocol,
                total_accounts: accounts.len(),
                active_accounts: accounts
                    .iter()
                    .filter(|account| account.expiry.status_at(now) == AccountStatus::Active)
                    .count(),
            });
        }

        Ok(summary)
    }

    pub fn pending_trials(&self) -> Vec<PendingTrial> {
        self.trials.pending()
    }

    /// Arms a timer that expires the trial at `fires_at`, replacing any earlier one.
    ///
    /// The timer only deletes the account if its ledger expiry still equals
    /// `fires_at` when it fires, so a renewal in between wins.
    pub fn arm_expiry(
        self: &Arc<Self>,
        protocol: Protocol,
        username: CompactString,
        fires_at: NaiveDateTime,
        delay: Duration,
    ) {
        let engine = Arc::downgrade(self);
        let name = username.clone();

        self.trials.schedule(protocol, username, fires_at, delay, async move {
            let Some(engine) = engine.upgrade() else {
                return;
            };

            if let Err(e) = engine.expire(protocol, &name, fires_at).await {
                error!(%protocol, username = %name, error = %e, "failed to expire trial account");
            }
        });
    }

    /// Re-arms timers for trial accounts found in the ledgers; deletes the ones already due.
    pub async fn rearm_trials(self: &Arc<Self>) -> AppResult<usize> {
        let now = now();
        let mut armed = 0;

        for protocol in Protocol::ALL {
            for account in self.ledger(protocol).scan().await? {
                if !account.is_trial() {
                    continue;
                }
                let Some(fires_at) = account.expiry.instant() else {
                    continue;
                };

                if fires_at <= now {
                    self.expire(protocol, &account.username, fires_at).await?;
                } else {
                    self.arm_expiry(protocol, account.username.clone(), fires_at, delay_until(fires_at));
                    armed += 1;
                }
            }
        }

        info!(armed, "trial timers re-armed");
        Ok(armed)
    }

    async fn expire(&self, protocol: Protocol, username: &str, fires_at: NaiveDateTime) -> AppResult<()> {
        let _guard = self.lock(protocol).await;

        if let Some(account) = self.ledger(protocol).find(username).await? {
            if account.expiry.instant() != Some(fires_at) {
                debug!(%protocol, username, expiry = %account.expiry, "trial was renewed, keeping it");
                return Ok(());
            }
        }

        if self.delete_locked(protocol, username).await? {
            info!(%protocol, username, "trial account expired");
            self.publish(EventKind::Expired, protocol, username);
        }

        Ok(())
    }

    async fn ensure_available(&self, protocol: Protocol, username: &str) -> AppResult<()> {
        let taken = |store: &str| {
            Err(AccountError::Conflict(format!(
                "{protocol} account {username} already exists in the {store}"
            )))
        };

        if self.ledger(protocol).find(username).await?.is_some() {
            return taken("ledger");
        }

        if protocol.uses_directory() {
            if self.directory.exists(username).await? {
                return taken("user directory");
            }
        } else if self.proxy.client_exists(protocol, username).await? {
            return taken("proxy config");
        }

        Ok(())
    }

    /// External store first, ledger row last; undoes the external side if the commit fails.
    async fn provision(&self, account: &Account) -> AppResult<()> {
        let protocol = account.protocol;
        let username = account.username.as_str();

        if protocol.uses_directory() {
            self.directory
                .create_principal(username, &account.credential, expiry_date(&account.expiry)?)
                .await?;
        } else {
            self.proxy.upsert_client(account).await?;
        }

        let committed = match self.limits.apply(protocol, username, &account.limits).await {
            Ok(()) => self.ledger(protocol).add(account).await,
            Err(e) => Err(e),
        };

        let Err(e) = committed else {
            return Ok(());
        };

        error!(%protocol, username, error = %e, "commit failed, rolling back");

        let rolled_back = if protocol.uses_directory() {
            self.directory
                .delete_principal(username)
                .await
                .map_err(AccountError::from)
        } else {
            self.proxy
                .remove_client(protocol, username)
                .await
                .map(|_| ())
                .map_err(AccountError::from)
        };
        if let Err(rollback) = rolled_back {
            warn!(%protocol, username, error = %rollback, "rollback of external store failed");
        }
        if let Err(rollback) = self.limits.clear_limits(protocol, username).await {
            warn!(%protocol, username, error = %rollback, "rollback of limit markers failed");
        }

        Err(e.into())
    }

    /// Recreates a missing principal or proxy client and pushes the new expiry or password.
    async fn refresh_external(&self, account: &Account, password_changed: bool) -> AppResult<()> {
        let protocol = account.protocol;
        let username = account.username.as_str();

        if protocol.uses_directory() {
            let expires_on = expiry_date(&account.expiry)?;

            if self.directory.exists(username).await? {
                self.directory.set_expiry(username, expires_on).await?;
                if password_changed {
                    self.directory.set_password(username, &account.credential).await?;
                }
            } else {
                warn!(%protocol, username, "principal missing, recreating");
                self.directory
                    .create_principal(username, &account.credential, expires_on)
                    .await?;
            }
        } else if !self.proxy.client_exists(protocol, username).await? {
            warn!(%protocol, username, "proxy client missing, recreating");
            self.proxy.upsert_client(account).await?;
        }

        Ok(())
    }

    /// Puts the principal's expiry and password back after a failed renewal commit.
    async fn restore_external(&self, previous: &Account, password_changed: bool) {
        if !previous.protocol.uses_directory() {
            return;
        }

        let username = previous.username.as_str();
        let restored = async {
            if let Some(expires_on) = previous.expiry.date() {
                self.directory.set_expiry(username, expires_on).await?;
            }
            if password_changed {
                self.directory.set_password(username, &previous.credential).await?;
            }
            Ok::<_, DirectoryError>(())
        }
        .await;

        if let Err(e) = restored {
            warn!(protocol = %previous.protocol, username, error = %e, "failed to restore principal after renewal");
        }
    }

    async fn delete_locked(&self, protocol: Protocol, username: &str) -> AppResult<bool> {
        self.trials.cancel(protocol, username);

        let ledger = self.ledger(protocol);
        let owned = ledger.find(username).await?.is_some();

        // principals and files are only touched for names this panel manages
        let detached = if protocol.uses_directory() {
            if owned {
                self.directory.delete_principal(username).await?;
            }
            owned
        } else {
            self.proxy.remove_client(protocol, username).await?
        };

        if !owned && !detached {
            return Ok(false);
        }

        ledger.remove(username).await?;
        self.limits.clear_limits(protocol, username).await?;
        self.artifacts.remove(protocol, username).await?;

        Ok(true)
    }

    async fn publish_descriptor(&self, account: &Account) -> Provisioned {
        let protocol = account.protocol;
        let server = self.server_metadata().await;
        let descriptor = descriptors::render(account, &server);

        if let Err(e) = self
            .artifacts
            .write(protocol, &account.username, &descriptor.text)
            .await
        {
            warn!(%protocol, username = %account.username, error = %e, "failed to write descriptor artifact");
        }

        Provisioned {
            account: account.clone(),
            is_trial: account.is_trial(),
            links: descriptor.links,
            config_url: self.artifacts.public_url(&server.domain, protocol, &account.username),
        }
    }

    fn publish(&self, kind: EventKind, protocol: Protocol, username: &str) {
        self.events.publish(AccountEvent {
            kind,
            protocol,
            username: CompactString::from(username),
            at: now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_usernames() {
        assert!(validate_username(None).is_err());
        assert!(validate_username(Some("  ")).is_err());
        assert!(validate_username(Some("-rf")).is_err());
        assert_eq!(validate_username(Some(" alice ")).unwrap(), "alice");
    }

    #[test]
    fn passwords_are_safe_for_chpasswd() {
        assert!(validate_password("hunter2").is_ok());
        for bad in ["", "a b", "a:b", "a\nb"] {
            assert!(validate_password(bad).is_err(), "{bad:?}");
        }
    }

    #[test]
    fn cipher_defaults_and_validation() {
        assert_eq!(validate_cipher(None).unwrap(), DEFAULT_CIPHER);
        assert_eq!(
            validate_cipher(Some("chacha20-ietf-poly1305")).unwrap(),
            "chacha20-ietf-poly1305"
        );
        assert!(matches!(
            validate_cipher(Some("rc4-md5")),
            Err(AccountError::Validation(_))
        ));
    }

    #[test]
    fn zero_days_is_invalid() {
        assert_eq!(validate_days(None).unwrap(), DEFAULT_DAYS);
        assert!(validate_days(Some(0)).is_err());
    }
}

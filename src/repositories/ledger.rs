use super::{read_if_exists, write_atomic, FileLock};
use crate::{
    entities::{Account, Expiry, Limits, Protocol},
    error::StoreError,
};
use compact_str::CompactString;
use std::path::{Path, PathBuf};
use tracing::debug;

const SENTINEL: &str = "###";

/// Per-protocol, line-oriented account ledger.
///
/// Data lines start with `###`; any other line is carried through rewrites
/// untouched. Field layout is per protocol:
///
/// | protocol                | fields                                               |
/// |-------------------------|------------------------------------------------------|
/// | ssh                     | `user password ip_limit expiry [quota_gb]`           |
/// | vmess / vless / trojan  | `user expiry credential quota_gb [ip_limit]`         |
/// | shadowsocks             | `user expiry password [quota_gb] [ip_limit] [cipher]`|
#[derive(Debug, Clone)]
pub struct Ledger {
    protocol: Protocol,
    path: PathBuf,
}

impl Ledger {
    pub fn new(protocol: Protocol, path: impl Into<PathBuf>) -> Self {
        Self {
            protocol,
            path: path.into(),
        }
    }

    /// `<data_root>/<protocol>/.<protocol>.db`
    pub fn under(data_root: &Path, protocol: Protocol) -> Self {
        let path = data_root
            .join(protocol.as_str())
            .join(format!(".{}.db", protocol.as_str()));

        Self::new(protocol, path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn scan(&self) -> Result<Vec<Account>, StoreError> {
        let contents = read_if_exists(&self.path).await?.unwrap_or_default();

        Ok(contents
            .lines()
            .filter(|line| is_data_line(line))
            .filter_map(|line| {
                let parsed = parse_line(self.protocol, line);
                if parsed.is_none() {
                    debug!(ledger = %self.path.display(), line, "skipping malformed ledger line");
                }
                parsed
            })
            .collect())
    }

    pub async fn find(&self, username: &str) -> Result<Option<Account>, StoreError> {
        Ok(self
            .scan()
            .await?
            .into_iter()
            .find(|account| account.username == username))
    }

    /// Inserts `account`, replacing any row with the same username.
    pub async fn add(&self, account: &Account) -> Result<(), StoreError> {
        let line = format_line(account);
        let username = account.username.clone();

        self.rewrite(move |lines| {
            lines.retain(|existing| row_username(existing) != Some(username.as_str()));
            lines.push(line);
        })
        .await
        .map(|_| ())
    }

    /// Removes the row for `username`; returns whether one existed.
    pub async fn remove(&self, username: &str) -> Result<bool, StoreError> {
        let mut removed = false;

        self.rewrite(|lines| {
            let before = lines.len();
            lines.retain(|existing| row_username(existing) != Some(username));
            removed = lines.len() != before;
        })
        .await?;

        Ok(removed)
    }

    pub async fn update_expiry(
        &self,
        username: &str,
        expiry: Expiry,
    ) -> Result<Option<Account>, StoreError> {
        self.update(username, move |account| account.expiry = expiry)
            .await
    }

    /// Applies `change` to the row for `username` in place.
    pub async fn update<F>(&self, username: &str, change: F) -> Result<Option<Account>, StoreError>
    where
        F: FnOnce(&mut Account),
    {
        let protocol = self.protocol;
        let mut change = Some(change);
        let mut updated = None;

        self.rewrite(|lines| {
            for line in lines.iter_mut() {
                if row_username(line) != Some(username) {
                    continue;
                }

                let Some(mut account) = parse_line(protocol, line) else {
                    continue;
                };

                if let Some(change) = change.take() {
                    change(&mut account);
                    *line = format_line(&account);
                    updated = Some(account);
                }
            }
        })
        .await?;

        Ok(updated)
    }

    /// Locked read → transform → atomic replace. Skips the write when nothing changed.
    async fn rewrite<F>(&self, transform: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut Vec<String>),
    {
        let _lock = FileLock::acquire(&self.path).await?;

        let original = read_if_exists(&self.path).await?.unwrap_or_default();
        let mut lines: Vec<String> = original.lines().map(str::to_string).collect();
        let before = lines.clone();

        transform(&mut lines);

        if lines == before {
            return Ok(false);
        }

        let mut contents = lines.join("\n");
        if !contents.is_empty() {
            contents.push('\n');
        }

        write_atomic(&self.path, contents.as_bytes()).await?;
        Ok(true)
    }
}

#[inline]
fn is_data_line(line: &str) -> bool {
    line.split_whitespace().next() == Some(SENTINEL)
}

fn row_username(line: &str) -> Option<&str> {
    let mut fields = line.split_whitespace();
    match fields.next() {
        Some(SENTINEL) => fields.next(),
        _ => None,
    }
}

pub fn parse_line(protocol: Protocol, line: &str) -> Option<Account> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.first() != Some(&SENTINEL) {
        return None;
    }

    let fields = &fields[1..];
    let number = |index: usize| -> Option<u64> {
        match fields.get(index) {
            Some(value) => value.parse().ok(),
            None => Some(0),
        }
    };

    let (username, credential, expiry, limits, cipher) = match protocol {
        Protocol::Ssh => {
            if fields.len() < 4 {
                return None;
            }
            let limits = Limits {
                ip_limit: fields[2].parse().ok()?,
                quota_gb: number(4)?,
            };
            (fields[0], fields[1], fields[3], limits, None)
        }
        Protocol::Vmess | Protocol::Vless | Protocol::Trojan => {
            if fields.len() < 4 {
                return None;
            }
            let limits = Limits {
                quota_gb: fields[3].parse().ok()?,
                ip_limit: u32::try_from(number(4)?).ok()?,
            };
            (fields[0], fields[2], fields[1], limits, None)
        }
        Protocol::Shadowsocks => {
            if fields.len() < 3 {
                return None;
            }
            let limits = Limits {
                quota_gb: number(3)?,
                ip_limit: u32::try_from(number(4)?).ok()?,
            };
            let cipher = fields.get(5).map(|cipher| cipher.to_string());
            (fields[0], fields[2], fields[1], limits, cipher)
        }
    };

    Some(Account {
        protocol,
        username: CompactString::from(username),
        credential: credential.to_string(),
        cipher,
        expiry: Expiry::parse(expiry),
        limits,
    })
}

pub fn format_line(account: &Account) -> String {
    let Account {
        username,
        credential,
        expiry,
        limits,
        ..
    } = account;

    match account.protocol {
        Protocol::Ssh => format!(
            "{SENTINEL} {username} {credential} {} {expiry} {}",
            limits.ip_limit, limits.quota_gb
        ),
        Protocol::Vmess | Protocol::Vless | Protocol::Trojan => format!(
            "{SENTINEL} {username} {expiry} {credential} {} {}",
            limits.quota_gb, limits.ip_limit
        ),
        Protocol::Shadowsocks => format!(
            "{SENTINEL} {username} {expiry} {credential} {} {} {}",
            limits.quota_gb,
            limits.ip_limit,
            account.cipher()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::DEFAULT_CIPHER;

    fn account(protocol: Protocol, username: &str) -> Account {
        Account {
            protocol,
            username: CompactString::from(username),
            credential: "secret".to_string(),
            cipher: None,
            expiry: Expiry::parse("2026-10-23"),
            limits: Limits {
                quota_gb: 5,
                ip_limit: 2,
            },
        }
    }

    #[test]
    fn reads_legacy_rows() {
        let ssh = parse_line(Protocol::Ssh, "### bob hunter2 1 2026-11-01").unwrap();
        assert_eq!(ssh.credential, "hunter2");
        assert_eq!(ssh.limits, Limits { quota_gb: 0, ip_limit: 1 });
        assert_eq!(ssh.expiry.to_string(), "2026-11-01");

        let vless = parse_line(Protocol::Vless, "### amy 2026-11-01 uuid-1 5").unwrap();
        assert_eq!(vless.credential, "uuid-1");
        assert_eq!(vless.limits, Limits { quota_gb: 5, ip_limit: 0 });

        let ss = parse_line(Protocol::Shadowsocks, "### sam 2026-11-01 pw").unwrap();
        assert_eq!(ss.cipher(), DEFAULT_CIPHER);
        assert_eq!(ss.limits, Limits::default());
    }

    #[test]
    fn rejects_short_or_non_numeric_rows() {
        assert!(parse_line(Protocol::Ssh, "### bob hunter2").is_none());
        assert!(parse_line(Protocol::Vmess, "### amy 2026-11-01 id lots 1").is_none());
        assert!(parse_line(Protocol::Trojan, "#& amy 2026-11-01").is_none());
    }

    #[test]
    fn formatted_rows_parse_back() {
        for protocol in Protocol::ALL {
            let account = account(protocol, "alice");
            let parsed = parse_line(protocol, &format_line(&account)).unwrap();
            assert_eq!(parsed.username, "alice");
            assert_eq!(parsed.limits, account.limits);
            assert_eq!(parsed.expiry, account.expiry);
        }
    }

    #[tokio::test]
    async fn add_replaces_existing_rows_and_keeps_foreign_lines() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::under(dir.path(), Protocol::Vless);
        tokio::fs::create_dir_all(ledger.path().parent().unwrap())
            .await
            .unwrap();
        tokio::fs::write(ledger.path(), "# managed by panel\n### broken\n")
            .await
            .unwrap();

        ledger.add(&account(Protocol::Vless, "alice")).await.unwrap();
        let mut renewed = account(Protocol::Vless, "alice");
        renewed.limits.quota_gb = 9;
        ledger.add(&renewed).await.unwrap();

        let accounts = ledger.scan().await.unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].limits.quota_gb, 9);

        let raw = tokio::fs::read_to_string(ledger.path()).await.unwrap();
        assert!(raw.starts_with("# managed by panel\n### broken\n"));
    }

    #[tokio::test]
    async fn remove_only_matches_whole_usernames() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::under(dir.path(), Protocol::Trojan);
        ledger.add(&account(Protocol::Trojan, "al")).await.unwrap();
        ledger.add(&account(Protocol::Trojan, "alice")).await.unwrap();

        assert!(ledger.remove("al").await.unwrap());
        assert!(!ledger.remove("al").await.unwrap());

        let remaining = ledger.scan().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].username, "alice");
    }

    #[tokio::test]
    async fn update_expiry_rewrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::under(dir.path(), Protocol::Ssh);
        ledger.add(&account(Protocol::Ssh, "bob")).await.unwrap();
        ledger.add(&account(Protocol::Ssh, "carol")).await.unwrap();

        let updated = ledger
            .update_expiry("bob", Expiry::parse("2027-01-01"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.expiry.to_string(), "2027-01-01");

        let accounts = ledger.scan().await.unwrap();
        assert_eq!(accounts[0].username, "bob");
        assert_eq!(accounts[0].expiry.to_string(), "2027-01-01");
        assert!(ledger
            .update_expiry("nobody", Expiry::parse("2027-01-01"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn missing_ledger_scans_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Ledger::under(dir.path(), Protocol::Shadowsocks);
        assert!(ledger.scan().await.unwrap().is_empty());
        assert!(ledger.find("anyone").await.unwrap().is_none());
    }
}

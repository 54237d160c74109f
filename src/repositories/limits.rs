use super::{read_if_exists, remove_if_exists, write_atomic};
use crate::{
    entities::{Limits, Protocol},
    error::StoreError,
    utils::gb_to_bytes,
};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    /// Transfer quota, stored in bytes.
    Quota,
    /// Concurrent source addresses.
    IpLimit,
}

/// Marker files read by the external enforcement agent.
#[derive(Debug, Clone)]
pub struct LimitStore {
    data_root: PathBuf,
    limits_root: PathBuf,
}

impl LimitStore {
    pub fn new(data_root: impl Into<PathBuf>, limits_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            limits_root: limits_root.into(),
        }
    }

    pub fn marker_path(&self, protocol: Protocol, username: &str, kind: LimitKind) -> PathBuf {
        match kind {
            LimitKind::Quota => self.data_root.join(protocol.as_str()).join(username),
            LimitKind::IpLimit => self
                .limits_root
                .join(protocol.as_str())
                .join("ip")
                .join(username),
        }
    }

    /// Writes the marker; zero removes it instead.
    pub async fn set_limit(
        &self,
        protocol: Protocol,
        username: &str,
        kind: LimitKind,
        value: u64,
    ) -> Result<(), StoreError> {
        let path = self.marker_path(protocol, username, kind);

        if value == 0 {
            remove_if_exists(&path).await?;
            return Ok(());
        }

        let contents = match kind {
            LimitKind::Quota => gb_to_bytes(value).to_string(),
            LimitKind::IpLimit => value.to_string(),
        };

        write_atomic(&path, contents.as_bytes()).await
    }

    pub async fn apply(&self, protocol: Protocol, username: &str, limits: &Limits) -> Result<(), StoreError> {
        self.set_limit(protocol, username, LimitKind::Quota, limits.quota_gb)
            .await?;
        self.set_limit(protocol, username, LimitKind::IpLimit, u64::from(limits.ip_limit))
            .await
    }

    pub async fn clear_limits(&self, protocol: Protocol, username: &str) -> Result<(), StoreError> {
        for kind in [LimitKind::Quota, LimitKind::IpLimit] {
            remove_if_exists(&self.marker_path(protocol, username, kind)).await?;
        }

        Ok(())
    }

    /// Raw marker value, `None` when no marker exists.
    pub async fn read_limit(
        &self,
        protocol: Protocol,
        username: &str,
        kind: LimitKind,
    ) -> Result<Option<u64>, StoreError> {
        let path = self.marker_path(protocol, username, kind);

        match read_if_exists(&path).await? {
            Some(raw) => raw.trim().parse().map(Some).map_err(|_| StoreError::Corrupt {
                path: path.clone(),
                reason: format!("limit marker holds {:?}", raw.trim()),
            }),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_and_clears_markers() {
        let dir = tempfile::tempdir().unwrap();
        let store = LimitStore::new(dir.path().join("etc"), dir.path().join("limit"));

        let limits = Limits {
            quota_gb: 5,
            ip_limit: 2,
        };
        store.apply(Protocol::Vless, "alice", &limits).await.unwrap();

        assert_eq!(
            store.read_limit(Protocol::Vless, "alice", LimitKind::Quota).await.unwrap(),
            Some(5 * 1024 * 1024 * 1024)
        );
        assert_eq!(
            store.read_limit(Protocol::Vless, "alice", LimitKind::IpLimit).await.unwrap(),
            Some(2)
        );
        assert!(dir.path().join("limit/vless/ip/alice").exists());

        store.clear_limits(Protocol::Vless, "alice").await.unwrap();
        store.clear_limits(Protocol::Vless, "alice").await.unwrap();
        assert_eq!(
            store.read_limit(Protocol::Vless, "alice", LimitKind::Quota).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn zero_removes_the_marker() {
        let dir = tempfile::tempdir().unwrap();
        let store = LimitStore::new(dir.path(), dir.path().join("limit"));

        store
            .set_limit(Protocol::Trojan, "tom", LimitKind::IpLimit, 3)
            .await
            .unwrap();
        store
            .set_limit(Protocol::Trojan, "tom", LimitKind::IpLimit, 0)
            .await
            .unwrap();

        assert!(!store
            .marker_path(Protocol::Trojan, "tom", LimitKind::IpLimit)
            .exists());
    }
}

use super::{remove_if_exists, write_atomic};
use crate::{entities::Protocol, error::StoreError};
use std::path::PathBuf;

/// Prefixes older installs used for shadowsocks artifacts; cleaned up on delete.
const LEGACY_SHADOWSOCKS_PREFIXES: [&str; 2] = ["oc-sodosokws", "sodosokgrpc"];

/// Descriptor text files published under the web root.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    web_root: PathBuf,
    port: u16,
}

impl ArtifactStore {
    pub fn new(web_root: impl Into<PathBuf>, port: u16) -> Self {
        Self {
            web_root: web_root.into(),
            port,
        }
    }

    pub fn file_name(protocol: Protocol, username: &str) -> String {
        format!("{}-{username}.txt", protocol.artifact_prefix())
    }

    pub fn path(&self, protocol: Protocol, username: &str) -> PathBuf {
        self.web_root.join(Self::file_name(protocol, username))
    }

    pub fn public_url(&self, domain: &str, protocol: Protocol, username: &str) -> String {
        format!(
            "https://{domain}:{}/{}",
            self.port,
            Self::file_name(protocol, username)
        )
    }

    pub async fn write(&self, protocol: Protocol, username: &str, text: &str) -> Result<(), StoreError> {
        write_atomic(&self.path(protocol, username), text.as_bytes()).await
    }

    /// Removes the artifact and, for shadowsocks, any legacy-named siblings.
    pub async fn remove(&self, protocol: Protocol, username: &str) -> Result<(), StoreError> {
        remove_if_exists(&self.path(protocol, username)).await?;

        if protocol == Protocol::Shadowsocks {
            for prefix in LEGACY_SHADOWSOCKS_PREFIXES {
                remove_if_exists(&self.web_root.join(format!("{prefix}-{username}.txt"))).await?;
            }
        }

        Ok(())
    }
}

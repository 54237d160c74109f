use super::{read_if_exists, write_atomic, FileLock};
use crate::{
    entities::{Account, Protocol},
    error::StoreError,
    services::DaemonReloader,
};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// The JSON document shared with the proxy daemon.
///
/// Clients are keyed by their `email` field, which holds the username.
#[derive(Clone)]
pub struct ProxyConfig {
    path: PathBuf,
    reloader: DaemonReloader,
}

enum Loaded {
    Missing,
    Parsed(Value),
    Corrupt(String),
}

impl ProxyConfig {
    pub fn new(path: impl Into<PathBuf>, reloader: DaemonReloader) -> Self {
        Self {
            path: path.into(),
            reloader,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the account's client entry into every inbound of its protocol,
    /// replacing an entry with the same email.
    pub async fn upsert_client(&self, account: &Account) -> Result<(), StoreError> {
        let client = client_entry(account);
        let protocol = account.protocol;

        {
            let _lock = FileLock::acquire(&self.path).await?;

            let document = match self.load().await? {
                Loaded::Missing => {
                    info!(path = %self.path.display(), "creating proxy config");
                    minimal_document(protocol, client)
                }
                Loaded::Parsed(mut document) => {
                    upsert_into(&mut document, protocol, &account.username, client);
                    document
                }
                Loaded::Corrupt(reason) => {
                    let backup = self.backup(&reason).await?;
                    warn!(
                        path = %self.path.display(),
                        backup = %backup.display(),
                        reason,
                        "proxy config was corrupt, replaced with a fresh document"
                    );
                    minimal_document(protocol, client)
                }
            };

            self.store(&document).await?;
        }

        info!(%protocol, username = %account.username, "proxy client upserted");
        self.reloader.trigger();

        Ok(())
    }

    /// Drops the client from every inbound of `protocol`; returns whether any entry existed.
    pub async fn remove_client(&self, protocol: Protocol, username: &str) -> Result<bool, StoreError> {
        let removed = {
            let _lock = FileLock::acquire(&self.path).await?;

            let mut document = match self.load().await? {
                Loaded::Parsed(document) => document,
                Loaded::Missing => return Ok(false),
                Loaded::Corrupt(reason) => {
                    warn!(path = %self.path.display(), reason, "proxy config unreadable, nothing to remove");
                    return Ok(false);
                }
            };

            let removed = remove_from(&mut document, protocol, username);
            if removed {
                self.store(&document).await?;
            }
            removed
        };

        if removed {
            info!(%protocol, username, "proxy client removed");
            self.reloader.trigger();
        }

        Ok(removed)
    }

    pub async fn client_exists(&self, protocol: Protocol, username: &str) -> Result<bool, StoreError> {
        let _lock = FileLock::acquire(&self.path).await?;

        match self.load().await? {
            Loaded::Parsed(document) => {
                let found = clients(&document, protocol)
                    .any(|client| client.get("email").and_then(Value::as_str) == Some(username));
                Ok(found)
            }
            Loaded::Missing => Ok(false),
            Loaded::Corrupt(reason) => {
                warn!(path = %self.path.display(), reason, "proxy config unreadable, treating client as absent");
                Ok(false)
            }
        }
    }

    async fn load(&self) -> Result<Loaded, StoreError> {
        let Some(raw) = read_if_exists(&self.path).await? else {
            return Ok(Loaded::Missing);
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(document) if document.is_object() => Ok(Loaded::Parsed(document)),
            Ok(_) => Ok(Loaded::Corrupt("document root is not an object".to_string())),
            Err(e) => Ok(Loaded::Corrupt(e.to_string())),
        }
    }

    async fn store(&self, document: &Value) -> Result<(), StoreError> {
        let mut encoded = serde_json::to_vec_pretty(document)?;
        encoded.push(b'\n');
        write_atomic(&self.path, &encoded).await
    }

    async fn backup(&self, reason: &str) -> Result<PathBuf, StoreError> {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".backup.{}", Utc::now().timestamp()));
        let backup = self.path.with_file_name(name);

        tokio::fs::copy(&self.path, &backup)
            .await
            .map_err(|e| StoreError::Corrupt {
                path: self.path.clone(),
                reason: format!("{reason}; backup failed: {e}"),
            })?;

        Ok(backup)
    }
}

/// Client object in the shape the daemon expects for each protocol.
pub fn client_entry(account: &Account) -> Value {
    let email = account.username.as_str();
    let credential = account.credential.as_str();

    match account.protocol {
        Protocol::Vmess => json!({ "id": credential, "alterId": 0, "email": email, "level": 0 }),
        Protocol::Vless => json!({ "id": credential, "email": email }),
        Protocol::Shadowsocks => {
            json!({ "password": credential, "method": account.cipher(), "email": email })
        }
        Protocol::Trojan | Protocol::Ssh => json!({ "password": credential, "email": email }),
    }
}

fn default_inbound(protocol: Protocol, clients: Vec<Value>) -> Value {
    let mut settings = Map::new();
    settings.insert("clients".to_string(), Value::Array(clients));
    if protocol == Protocol::Vless {
        settings.insert("decryption".to_string(), json!("none"));
    }

    json!({
        "port": 443,
        "protocol": protocol.as_str(),
        "settings": settings,
        "streamSettings": {
            "network": "ws",
            "wsSettings": { "path": protocol.ws_path() }
        }
    })
}

fn minimal_document(protocol: Protocol, client: Value) -> Value {
    json!({
        "inbounds": [default_inbound(protocol, vec![client])],
        "outbounds": [{ "protocol": "freedom" }]
    })
}

fn is_inbound_for(inbound: &Value, protocol: Protocol) -> bool {
    inbound.get("protocol").and_then(Value::as_str) == Some(protocol.as_str())
}

fn clients(document: &Value, protocol: Protocol) -> impl Iterator<Item = &Value> {
    document
        .get("inbounds")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(move |inbound| is_inbound_for(inbound, protocol))
        .filter_map(|inbound| inbound.pointer("/settings/clients").and_then(Value::as_array))
        .flatten()
}

fn upsert_into(document: &mut Value, protocol: Protocol, username: &str, client: Value) {
    let Some(root) = document.as_object_mut() else {
        return;
    };

    let inbounds = root
        .entry("inbounds")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !inbounds.is_array() {
        *inbounds = Value::Array(Vec::new());
    }
    let Some(inbounds) = inbounds.as_array_mut() else {
        return;
    };

    let mut matched = false;
    for inbound in inbounds.iter_mut().filter(|inbound| is_inbound_for(inbound, protocol)) {
        let Some(inbound) = inbound.as_object_mut() else {
            continue;
        };

        let settings = inbound
            .entry("settings")
            .or_insert_with(|| Value::Object(Map::new()));
        if !settings.is_object() {
            *settings = Value::Object(Map::new());
        }
        let Some(settings) = settings.as_object_mut() else {
            continue;
        };

        let clients = settings
            .entry("clients")
            .or_insert_with(|| Value::Array(Vec::new()));
        if !clients.is_array() {
            *clients = Value::Array(Vec::new());
        }
        let Some(clients) = clients.as_array_mut() else {
            continue;
        };

        clients.retain(|existing| existing.get("email").and_then(Value::as_str) != Some(username));
        clients.push(client.clone());
        matched = true;
    }

    if !matched {
        inbounds.push(default_inbound(protocol, vec![client]));
    }
}

fn remove_from(document: &mut Value, protocol: Protocol, username: &str) -> bool {
    let Some(inbounds) = document.get_mut("inbounds").and_then(Value::as_array_mut) else {
        return false;
    };

    let mut removed = false;
    for inbound in inbounds.iter_mut().filter(|inbound| is_inbound_for(inbound, protocol)) {
        if let Some(clients) = inbound
            .pointer_mut("/settings/clients")
            .and_then(Value::as_array_mut)
        {
            let before = clients.len();
            clients.retain(|client| client.get("email").and_then(Value::as_str) != Some(username));
            removed |= clients.len() != before;
        }
    }

    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{Expiry, Limits};
    use compact_str::CompactString;

    fn account(protocol: Protocol, username: &str) -> Account {
        Account {
            protocol,
            username: CompactString::from(username),
            credential: "0b6c1d7e-9a41-4bb2-a3a6-5f1b0c7d2e11".to_string(),
            cipher: None,
            expiry: Expiry::parse("2026-10-23"),
            limits: Limits::default(),
        }
    }

    fn config(dir: &Path) -> ProxyConfig {
        ProxyConfig::new(dir.join("xray").join("config.json"), DaemonReloader::disabled())
    }

    async fn document(config: &ProxyConfig) -> Value {
        let raw = tokio::fs::read_to_string(config.path()).await.unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn creates_missing_document() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        config.upsert_client(&account(Protocol::Vless, "alice")).await.unwrap();

        let document = document(&config).await;
        assert_eq!(document["inbounds"][0]["protocol"], "vless");
        assert_eq!(document["inbounds"][0]["settings"]["clients"][0]["email"], "alice");
        assert_eq!(document["outbounds"][0]["protocol"], "freedom");
        assert!(config.client_exists(Protocol::Vless, "alice").await.unwrap());
        assert!(!config.client_exists(Protocol::Vmess, "alice").await.unwrap());
    }

    #[tokio::test]
    async fn upsert_touches_every_matching_inbound_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let seeded = json!({
            "log": { "loglevel": "warning" },
            "inbounds": [
                { "tag": "vmess-ws", "protocol": "vmess", "settings": { "clients": [] } },
                { "tag": "vmess-grpc", "protocol": "vmess", "settings": {} },
                { "tag": "trojan-ws", "protocol": "trojan", "settings": { "clients": [] } }
            ]
        });
        write_atomic(config.path(), seeded.to_string().as_bytes()).await.unwrap();

        let alice = account(Protocol::Vmess, "alice");
        config.upsert_client(&alice).await.unwrap();
        config.upsert_client(&alice).await.unwrap();

        let document = document(&config).await;
        assert_eq!(document["log"]["loglevel"], "warning");
        for index in 0..2 {
            let clients = document["inbounds"][index]["settings"]["clients"].as_array().unwrap();
            assert_eq!(clients.len(), 1);
            assert_eq!(clients[0]["alterId"], 0);
        }
        assert!(document["inbounds"][2]["settings"]["clients"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn appends_inbound_when_protocol_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        write_atomic(config.path(), br#"{"inbounds": []}"#).await.unwrap();

        let mut sam = account(Protocol::Shadowsocks, "sam");
        sam.cipher = Some("chacha20-ietf-poly1305".to_string());
        config.upsert_client(&sam).await.unwrap();

        let document = document(&config).await;
        let inbound = &document["inbounds"][0];
        assert_eq!(inbound["protocol"], "shadowsocks");
        assert_eq!(inbound["streamSettings"]["wsSettings"]["path"], "/ss-ws");
        assert_eq!(inbound["settings"]["clients"][0]["method"], "chacha20-ietf-poly1305");
    }

    #[tokio::test]
    async fn heals_forward_from_corrupt_json() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        write_atomic(config.path(), b"{ \"inbounds\": [ oops").await.unwrap();

        assert!(!config.client_exists(Protocol::Trojan, "tom").await.unwrap());
        config.upsert_client(&account(Protocol::Trojan, "tom")).await.unwrap();

        let document = document(&config).await;
        let clients = document["inbounds"][0]["settings"]["clients"].as_array().unwrap();
        assert_eq!(clients.len(), 1);
        assert_eq!(clients[0]["email"], "tom");

        let mut backups = tokio::fs::read_dir(config.path().parent().unwrap()).await.unwrap();
        let mut found = false;
        while let Some(entry) = backups.next_entry().await.unwrap() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("config.json.backup.") {
                let contents = tokio::fs::read_to_string(entry.path()).await.unwrap();
                assert!(contents.contains("oops"));
                found = true;
            }
        }
        assert!(found);
    }

    #[tokio::test]
    async fn corrupt_document_is_left_alone_when_backup_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        write_atomic(config.path(), b"not json").await.unwrap();

        // occupy every backup name the next minute could produce
        let now = Utc::now().timestamp();
        for stamp in now - 5..now + 60 {
            let blocker = config.path().with_file_name(format!("config.json.backup.{stamp}"));
            tokio::fs::create_dir_all(blocker).await.unwrap();
        }

        let failed = config.upsert_client(&account(Protocol::Vless, "alice")).await;
        assert!(matches!(failed, Err(StoreError::Corrupt { .. })));

        let raw = tokio::fs::read_to_string(config.path()).await.unwrap();
        assert_eq!(raw, "not json");
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        assert!(!config.remove_client(Protocol::Vless, "alice").await.unwrap());

        config.upsert_client(&account(Protocol::Vless, "alice")).await.unwrap();
        config.upsert_client(&account(Protocol::Vless, "bob")).await.unwrap();

        assert!(config.remove_client(Protocol::Vless, "alice").await.unwrap());
        assert!(!config.remove_client(Protocol::Vless, "alice").await.unwrap());
        assert!(config.client_exists(Protocol::Vless, "bob").await.unwrap());
    }
}

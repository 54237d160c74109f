use crate::error::ConfigError;
use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryBackend {
    System,
    Memory,
}

/// Files the server metadata is read from.
#[derive(Debug, Clone)]
pub struct MetadataFiles {
    pub domain: PathBuf,
    pub isp: PathBuf,
    pub city: PathBuf,
    pub ns: PathBuf,
    pub pubkey: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind: SocketAddr,
    pub api_key: Option<String>,
    pub data_root: PathBuf,
    pub limits_root: PathBuf,
    pub proxy_config: PathBuf,
    pub web_root: PathBuf,
    pub artifact_port: u16,
    pub metadata: MetadataFiles,
    pub reload_command: Vec<String>,
    pub reload_timeout: Duration,
    pub directory: DirectoryBackend,
    pub tool_timeout: Duration,
}

impl Settings {
    /// Reads `PANEL_*` variables from the process environment (and `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| dotenvy::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let path = |key: &str, default: &str| PathBuf::from(get(key, default));

        let auth_enabled: bool = parse(&lookup, "PANEL_AUTH_ENABLED", true)?;
        let api_key = lookup("PANEL_API_KEY")
            .filter(|key| auth_enabled && !key.trim().is_empty());

        let directory = match get("PANEL_DIRECTORY", "system").as_str() {
            "system" => DirectoryBackend::System,
            "memory" => DirectoryBackend::Memory,
            other => {
                return Err(ConfigError::Invalid {
                    key: "PANEL_DIRECTORY",
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            bind: parse(&lookup, "PANEL_BIND", SocketAddr::from(([0, 0, 0, 0], 5000)))?,
            api_key,
            data_root: path("PANEL_DATA_ROOT", "/etc"),
            limits_root: path("PANEL_LIMITS_ROOT", "/etc/kyt/limit"),
            proxy_config: path("PANEL_PROXY_CONFIG", "/etc/xray/config.json"),
            web_root: path("PANEL_WEB_ROOT", "/var/www/html"),
            artifact_port: parse(&lookup, "PANEL_ARTIFACT_PORT", 81)?,
            metadata: MetadataFiles {
                domain: path("PANEL_DOMAIN_FILE", "/etc/xray/domain"),
                isp: path("PANEL_ISP_FILE", "/etc/xray/isp"),
                city: path("PANEL_CITY_FILE", "/etc/xray/city"),
                ns: path("PANEL_NS_FILE", "/root/nsdomain"),
                pubkey: path("PANEL_PUBKEY_FILE", "/etc/slowdns/server.pub"),
            },
            reload_command: get("PANEL_RELOAD_COMMAND", "systemctl restart xray")
                .split_whitespace()
                .map(str::to_string)
                .collect(),
            reload_timeout: Duration::from_secs(parse(&lookup, "PANEL_RELOAD_TIMEOUT_SECS", 10)?),
            directory,
            tool_timeout: Duration::from_secs(parse(&lookup, "PANEL_TOOL_TIMEOUT_SECS", 15)?),
        })
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ahash::AHashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let vars: AHashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_follow_the_stock_layout() {
        let settings = settings(&[]).unwrap();
        assert_eq!(settings.proxy_config, PathBuf::from("/etc/xray/config.json"));
        assert_eq!(settings.reload_command, vec!["systemctl", "restart", "xray"]);
        assert_eq!(settings.directory, DirectoryBackend::System);
        assert_eq!(settings.artifact_port, 81);
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn empty_reload_command_disables_reload() {
        let settings = settings(&[("PANEL_RELOAD_COMMAND", "")]).unwrap();
        assert!(settings.reload_command.is_empty());
    }

    #[test]
    fn api_key_is_dropped_when_auth_disabled() {
        let settings = settings(&[("PANEL_API_KEY", "s3cret"), ("PANEL_AUTH_ENABLED", "false")]).unwrap();
        assert!(settings.api_key.is_none());
    }

    #[test]
    fn rejects_bad_numbers() {
        let error = settings(&[("PANEL_ARTIFACT_PORT", "eighty")]).unwrap_err();
        assert!(error.to_string().contains("PANEL_ARTIFACT_PORT"));
        assert!(settings(&[("PANEL_DIRECTORY", "ldap")]).is_err());
    }
}

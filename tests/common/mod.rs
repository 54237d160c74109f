#![allow(dead_code)]

use ahash::AHashMap;
use panel_api::{
    config::Settings,
    services::{AccountEngine, Directory, MemoryDirectory, TrialNames},
    states::GlobalState,
};
use std::{path::PathBuf, sync::Arc};
use tempfile::TempDir;

pub const DOMAIN: &str = "vpn.example.com";

pub struct Harness {
    pub dir: TempDir,
    pub directory: Arc<MemoryDirectory>,
    pub state: GlobalState,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_api_key(None)
    }

    pub fn with_api_key(api_key: Option<&str>) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        std::fs::create_dir_all(root.join("meta")).unwrap();
        std::fs::write(root.join("meta").join("domain"), format!("{DOMAIN}\n")).unwrap();

        let mut vars: AHashMap<&str, String> = AHashMap::new();
        let path = |p: &str| root.join(p).to_string_lossy().to_string();
        vars.insert("PANEL_DATA_ROOT", path("etc"));
        vars.insert("PANEL_LIMITS_ROOT", path("limit"));
        vars.insert("PANEL_PROXY_CONFIG", path("xray/config.json"));
        vars.insert("PANEL_WEB_ROOT", path("www"));
        vars.insert("PANEL_DOMAIN_FILE", path("meta/domain"));
        vars.insert("PANEL_ISP_FILE", path("meta/isp"));
        vars.insert("PANEL_CITY_FILE", path("meta/city"));
        vars.insert("PANEL_NS_FILE", path("meta/ns"));
        vars.insert("PANEL_PUBKEY_FILE", path("meta/pub"));
        vars.insert("PANEL_RELOAD_COMMAND", String::new());
        vars.insert("PANEL_DIRECTORY", "memory".to_string());
        if let Some(key) = api_key {
            vars.insert("PANEL_API_KEY", key.to_string());
        }

        let settings = Settings::from_lookup(|key| vars.get(key).cloned()).unwrap();
        let directory = Arc::new(MemoryDirectory::default());
        let state = GlobalState::with_directory(settings, directory.clone() as Arc<dyn Directory>);

        Self {
            dir,
            directory,
            state,
        }
    }

    pub fn engine(&self) -> &Arc<AccountEngine> {
        &self.state.engine
    }

    /// A second engine over the same stores whose trial names come from `names`.
    pub fn engine_with_trial_names(&self, names: TrialNames) -> Arc<AccountEngine> {
        let directory = self.directory.clone() as Arc<dyn Directory>;
        Arc::new(AccountEngine::new(&self.state.settings, directory).with_trial_names(names))
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn proxy_config(&self) -> serde_json::Value {
        let raw = std::fs::read_to_string(self.path("xray/config.json")).unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    /// Client entries carrying `email`, across every inbound.
    pub fn proxy_clients(&self, email: &str) -> usize {
        let Ok(raw) = std::fs::read_to_string(self.path("xray/config.json")) else {
            return 0;
        };
        let document: serde_json::Value = serde_json::from_str(&raw).unwrap();

        document["inbounds"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|inbound| inbound["settings"]["clients"].as_array())
            .flatten()
            .filter(|client| client["email"] == email)
            .count()
    }
}

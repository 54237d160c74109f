use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CreateAccount {
    pub username: Option<String>,
    pub password: Option<String>,
    pub days: Option<u32>,
    pub quota_gb: Option<u64>,
    pub ip_limit: Option<u32>,
    pub cipher: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RenewAccount {
    pub username: Option<String>,
    pub days: Option<u32>,
    pub quota_gb: Option<u64>,
    pub ip_limit: Option<u32>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeleteAccount {
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TrialRequest {
    pub minutes: Option<u32>,
}

/// Body of the combined trial endpoints; `service` is a protocol name or `all`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TrialBatchRequest {
    pub service: Option<String>,
    pub minutes: Option<u32>,
    pub username: Option<String>,
}

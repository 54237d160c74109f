use serde::Serialize;

/// Host facts rendered into connection descriptors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerMetadata {
    pub domain: String,
    pub isp: String,
    pub city: String,
    pub ns: String,
    pub pubkey: String,
}

impl Default for ServerMetadata {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            isp: "Unknown".to_string(),
            city: "Unknown".to_string(),
            ns: "Unknown".to_string(),
            pubkey: "Unknown".to_string(),
        }
    }
}

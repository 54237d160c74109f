use super::MetadataFiles;
use crate::entities::ServerMetadata;
use std::path::Path;

impl ServerMetadata {
    /// Reads each fact from its file; missing or empty files keep the default.
    pub async fn load(files: &MetadataFiles) -> Self {
        let fallback = ServerMetadata::default();

        Self {
            domain: read_or(&files.domain, fallback.domain).await,
            isp: read_or(&files.isp, fallback.isp).await,
            city: read_or(&files.city, fallback.city).await,
            ns: read_or(&files.ns, fallback.ns).await,
            pubkey: read_or(&files.pubkey, fallback.pubkey).await,
        }
    }
}

async fn read_or(path: &Path, fallback: String) -> String {
    match tokio::fs::read_to_string(path).await {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => fallback,
    }
}

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("principal {0} already exists")]
    AlreadyExists(String),
    #[error("{tool} failed: {detail}")]
    Tool { tool: &'static str, detail: String },
    #[error("{0} timed out")]
    Timeout(&'static str),
}

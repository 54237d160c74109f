mod account;
mod auth;
mod config;
mod directory;
mod store;

pub use account::*;
pub use auth::*;
pub use config::*;
pub use directory::*;
pub use store::*;

pub type AppResult<T> = Result<T, AccountError>;

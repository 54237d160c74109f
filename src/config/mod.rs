mod metadata;
mod settings;
mod tracing;

pub use self::tracing::*;
pub use settings::*;

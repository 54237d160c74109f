mod accounts;
pub mod descriptors;
mod directory;
mod events;
mod reload;
mod trials;

pub use accounts::*;
pub use directory::*;
pub use events::*;
pub use reload::*;
pub use trials::*;

mod error;
mod success;

pub use error::*;
pub use success::*;

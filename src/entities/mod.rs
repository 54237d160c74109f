mod account;
mod descriptor;
mod outcomes;
mod protocol;
mod requests;
mod server;

pub use account::*;
pub use descriptor::*;
pub use outcomes::*;
pub use protocol::*;
pub use requests::*;
pub use server::*;

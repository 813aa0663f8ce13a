pub mod base;
pub mod logging;
pub mod mixer;
pub mod server;

pub use base::*;
pub use logging::*;
pub use mixer::*;
pub use server::*;

pub mod config;
pub mod config_loader;
pub mod error;
pub mod session;
pub mod traits;

pub use config::*;
pub use config_loader::*;
pub use error::*;
pub use session::Session;
pub use traits::*;

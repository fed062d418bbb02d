pub mod command_executor;
pub mod credentials;

pub use command_executor::{CommandError, SafeCommandExecutor, combined_output};
pub use credentials::{RegistryCredentials, mask_secret};

pub mod backends;
pub mod core;
pub mod fakes;
pub mod orchestration;
pub mod security;

pub use self::core::*;
pub use orchestration::{
    ImageBuilder, PublishOrchestrator, PublishReport, PublishRequest, RegistryTarget,
    VulnerabilityScanner,
};
pub use security::{CommandError, RegistryCredentials, SafeCommandExecutor};

//! Orchestration layer for the image pipeline
//!
//! This module composes the build, scan and publish steps.

pub mod image_builder;
pub mod publish_orchestrator;
pub mod registry_target;
pub mod vulnerability_scanner;

// Re-export main types for convenience
pub use image_builder::ImageBuilder;
pub use publish_orchestrator::{PublishOrchestrator, PublishReport, PublishRequest};
pub use registry_target::{DEFAULT_REGISTRY, RegistryTarget};
pub use vulnerability_scanner::VulnerabilityScanner;

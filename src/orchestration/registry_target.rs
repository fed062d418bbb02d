//! Registry reference resolution
//!
//! The default registry is an anonymous, short-lived one: pushes there get a
//! random name suffix and never carry credentials. Any other registry gets a
//! `{registry}/{username}/{name}:{version}` reference plus credentials.

use crate::security::RegistryCredentials;
use rand::Rng;
use secrecy::SecretString;

/// Default ephemeral registry host
pub const DEFAULT_REGISTRY: &str = "ttl.sh";

/// Exclusive upper bound of the ephemeral name suffix
pub const EPHEMERAL_SUFFIX_BOUND: u32 = 10_000_000;

/// Where a publish goes and with which credentials
#[derive(Debug)]
pub enum RegistryTarget {
    Ephemeral {
        reference: String,
    },
    Authenticated {
        reference: String,
        credentials: RegistryCredentials,
    },
}

impl RegistryTarget {
    /// Resolve the target for `name`, drawing a fresh suffix for the ephemeral registry
    pub fn resolve(
        registry: &str,
        name: &str,
        version: &str,
        username: &str,
        password: SecretString,
    ) -> Self {
        let suffix = rand::rng().random_range(0..EPHEMERAL_SUFFIX_BOUND);
        Self::resolve_with_suffix(registry, name, version, username, password, suffix)
    }

    /// Deterministic form of [`resolve`](Self::resolve)
    pub fn resolve_with_suffix(
        registry: &str,
        name: &str,
        version: &str,
        username: &str,
        password: SecretString,
        suffix: u32,
    ) -> Self {
        if registry == DEFAULT_REGISTRY {
            return Self::Ephemeral {
                reference: format!("{}/{}-{}", registry, name, suffix),
            };
        }

        Self::Authenticated {
            reference: format!("{}/{}/{}:{}", registry, username, name, version),
            credentials: RegistryCredentials::new(username, password),
        }
    }

    pub fn reference(&self) -> &str {
        match self {
            Self::Ephemeral { reference } | Self::Authenticated { reference, .. } => reference,
        }
    }

    pub fn credentials(&self) -> Option<&RegistryCredentials> {
        match self {
            Self::Ephemeral { .. } => None,
            Self::Authenticated { credentials, .. } => Some(credentials),
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Self::Ephemeral { .. })
    }
}

/// Split a reference into repository and optional tag
///
/// A colon only denotes a tag when it appears after the last `/`, so
/// `localhost:5000/app` has no tag.
pub fn split_reference(reference: &str) -> (&str, Option<&str>) {
    let name_start = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    match reference[name_start..].rfind(':') {
        Some(i) => {
            let colon = name_start + i;
            (&reference[..colon], Some(&reference[colon + 1..]))
        }
        None => (reference, None),
    }
}

/// Registry host part of a reference
pub fn registry_host(reference: &str) -> &str {
    reference.split('/').next().unwrap_or(reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value)
    }

    #[test]
    fn test_ephemeral_reference_shape() {
        let target = RegistryTarget::resolve("ttl.sh", "app", "v1.0.0", "u", secret("pw"));

        assert!(target.is_ephemeral());
        assert!(target.credentials().is_none());

        let suffix = target
            .reference()
            .strip_prefix("ttl.sh/app-")
            .expect("ephemeral prefix");
        let value: u32 = suffix.parse().expect("numeric suffix");
        assert!(value < EPHEMERAL_SUFFIX_BOUND);
        assert!(!target.reference().contains("v1.0.0"));
        assert!(!target.reference().contains("/u/"));
    }

    #[test]
    fn test_ephemeral_suffix_is_not_padded() {
        let target = RegistryTarget::resolve_with_suffix("ttl.sh", "app", "latest", "", secret(""), 42);
        assert_eq!(target.reference(), "ttl.sh/app-42");
    }

    #[test]
    fn test_authenticated_reference() {
        let target = RegistryTarget::resolve(
            "myregistry.example",
            "app",
            "v1.0.0",
            "u",
            secret("hunter2"),
        );

        assert_eq!(target.reference(), "myregistry.example/u/app:v1.0.0");
        let credentials = target.credentials().expect("credentials attached");
        assert_eq!(credentials.username(), "u");
        assert_eq!(credentials.password().expose_secret(), "hunter2");
    }

    #[test]
    fn test_split_reference() {
        assert_eq!(
            split_reference("myregistry.example/u/app:v1.0.0"),
            ("myregistry.example/u/app", Some("v1.0.0"))
        );
        assert_eq!(split_reference("ttl.sh/app-123"), ("ttl.sh/app-123", None));
        assert_eq!(
            split_reference("localhost:5000/app"),
            ("localhost:5000/app", None)
        );
    }

    #[test]
    fn test_registry_host() {
        assert_eq!(registry_host("myregistry.example/u/app:v1"), "myregistry.example");
        assert_eq!(registry_host("ttl.sh/app-1"), "ttl.sh");
    }
}

//! Registry credentials with memory-safe handling and masking capabilities
//!
//! Passwords are held in `secrecy::SecretString` so they never show up in
//! `Debug` output, and any collaborator output that may echo them is masked
//! before it is logged or embedded in an error.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

/// Username and password attached to a registry push
pub struct RegistryCredentials {
    username: String,
    password: SecretString,
}

impl RegistryCredentials {
    pub fn new(username: impl Into<String>, password: SecretString) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &SecretString {
        &self.password
    }

    /// Replace every occurrence of the password in `text` with its masked form
    ///
    /// # Examples
    ///
    /// ```
    /// use image_publisher::security::RegistryCredentials;
    /// use secrecy::SecretString;
    ///
    /// let credentials = RegistryCredentials::new("u", SecretString::from("s3cr3t-password"));
    /// assert_eq!(
    ///     credentials.mask_in("login with s3cr3t-password failed"),
    ///     "login with s3c...ord failed"
    /// );
    /// ```
    pub fn mask_in(&self, text: &str) -> String {
        let secret = self.password.expose_secret();
        if secret.is_empty() {
            return text.to_string();
        }

        text.replace(secret, &mask_secret(secret))
    }
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

/// Masks a secret for safe logging
///
/// Shows only the first 3 and last 3 characters for identification purposes.
/// Secrets shorter than 10 characters are fully masked as "****".
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() < 10 {
        return "****".to_string();
    }

    let prefix: String = chars[..3].iter().collect();
    let suffix: String = chars[chars.len() - 3..].iter().collect();
    format!("{}...{}", prefix, suffix)
}

//! Secure credential handling for LLM providers.
//!
//! API keys are wrapped in [`ApiCredential`] immediately on load. The wrapper:
//!
//! - **No accidental logging**: credentials cannot appear in Debug/Display output
//! - **Memory safety**: values are zeroed on drop via the `secrecy` crate
//! - **Explicit exposure**: the raw value only comes out through `.expose()`

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use super::ProviderError;

/// Where a credential was loaded from.
///
/// Useful for debugging configuration issues without exposing the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Loaded from environment variable
    Environment,
    /// Provided programmatically
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

/// A securely-stored API credential.
pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    /// Wrap a string value. After this point the value cannot be
    /// accidentally logged.
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Load credential from an environment variable.
    pub fn from_env(env_var: &str, name: &'static str) -> Result<Self, ProviderError> {
        std::env::var(env_var)
            .map(|v| Self::new(v, CredentialSource::Environment, name))
            .map_err(|_| {
                ProviderError::NotConfigured(format!(
                    "{} not set: configure '{}' environment variable",
                    name, env_var
                ))
            })
    }

    /// Expose the credential value for use in API calls.
    ///
    /// Only call at the point where the credential is actually needed,
    /// such as setting an HTTP header. Never store the exposed value.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    /// Check if the credential is empty.
    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    /// Get the source of this credential.
    pub fn source(&self) -> CredentialSource {
        self.source
    }

    /// Get the human-readable name of this credential.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}

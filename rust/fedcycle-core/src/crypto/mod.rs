//! Credential provider: signed authentication tokens.
//!
//! Workers authenticate with a compact JSON Web Signature (`header.claims.signature`, each part
//! base64url encoded without padding). The signing primitives are those of [sodiumoxide]:
//!
//! - `EdDSA`: `Ed25519` signatures
//! - `HS256` and `HS512`: HMAC with SHA-256 and SHA-512
//!
//! Other algorithm names are recognized but refused. Signing is a pure function: the same
//! claims, key and algorithm always produce the same token.
//!
//! # Examples
//! ```
//! # use fedcycle_core::crypto::{sign, Algorithm, Claims, SigningKey};
//! let key = SigningKey::hmac(b"a shared secret".to_vec());
//! let claims = Claims::new().subject("worker-1").with("job", "mnist");
//! let token = sign(&claims, &key, Algorithm::HS256).unwrap();
//! assert_eq!(token.as_str().split('.').count(), 3);
//! ```
//!
//! [sodiumoxide]: https://docs.rs/sodiumoxide/

mod key;
mod token;

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::{
    key::SigningKey,
    token::{sign, Claims},
};

#[derive(Debug, Error, PartialEq, Eq)]
/// Errors raised while producing an authentication token.
pub enum CredentialError {
    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("malformed key: {0}")]
    MalformedKey(String),
    #[error("failed to encode claims: {0}")]
    InvalidClaims(String),
    #[error("failed to initialize the crypto library")]
    Init,
}

/// JWS signing algorithms.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    EdDSA,
    HS256,
    HS512,
    /// Recognized, but not supported by this implementation.
    RS256,
    /// Recognized, but not supported by this implementation.
    ES256,
}

impl Algorithm {
    /// The `alg` header value.
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::EdDSA => "EdDSA",
            Algorithm::HS256 => "HS256",
            Algorithm::HS512 => "HS512",
            Algorithm::RS256 => "RS256",
            Algorithm::ES256 => "ES256",
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Algorithm::EdDSA | Algorithm::HS256 | Algorithm::HS512)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = CredentialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EdDSA" => Ok(Algorithm::EdDSA),
            "HS256" => Ok(Algorithm::HS256),
            "HS512" => Ok(Algorithm::HS512),
            "RS256" => Ok(Algorithm::RS256),
            "ES256" => Ok(Algorithm::ES256),
            other => Err(CredentialError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

/// Initialize the underlying crypto library. This is cheap and can be called any number of
/// times, from any thread.
pub fn init() -> Result<(), CredentialError> {
    sodiumoxide::init().map_err(|_| CredentialError::Init)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_names() {
        for alg in &[
            Algorithm::EdDSA,
            Algorithm::HS256,
            Algorithm::HS512,
            Algorithm::RS256,
            Algorithm::ES256,
        ] {
            assert_eq!(alg.name().parse::<Algorithm>().unwrap(), *alg);
        }
        assert_eq!(
            "none".parse::<Algorithm>().unwrap_err(),
            CredentialError::UnsupportedAlgorithm("none".to_string())
        );
    }

    #[test]
    fn test_supported_algorithms() {
        assert!(Algorithm::EdDSA.is_supported());
        assert!(Algorithm::HS256.is_supported());
        assert!(Algorithm::HS512.is_supported());
        assert!(!Algorithm::RS256.is_supported());
        assert!(!Algorithm::ES256.is_supported());
    }
}

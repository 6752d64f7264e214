use std::fmt;

use sodiumoxide::crypto::sign;

use super::{Algorithm, CredentialError};

/// Private key material used to sign authentication tokens.
///
/// The secret is never printed by the `Debug` implementation.
#[derive(Clone)]
pub enum SigningKey {
    /// An `Ed25519` secret key, for [`Algorithm::EdDSA`].
    Ed25519(sign::SecretKey),
    /// A shared secret, for the HMAC algorithms.
    Hmac(Vec<u8>),
}

impl SigningKey {
    /// Derive an `Ed25519` key from a 32 bytes seed.
    pub fn ed25519_from_seed(seed: &[u8]) -> Result<Self, CredentialError> {
        let seed = sign::Seed::from_slice(seed).ok_or_else(|| {
            CredentialError::MalformedKey(format!(
                "Ed25519 seed must be {} bytes, got {}",
                sign::SEEDBYTES,
                seed.len()
            ))
        })?;
        let (_, sk) = sign::keypair_from_seed(&seed);
        Ok(SigningKey::Ed25519(sk))
    }

    pub fn hmac(secret: Vec<u8>) -> Self {
        SigningKey::Hmac(secret)
    }

    /// Build a key for `algorithm` from raw bytes.
    ///
    /// `Ed25519` keys are accepted either as a 32 bytes seed or as a 64 bytes secret key. HMAC
    /// secrets can have any non-zero length.
    ///
    /// # Errors
    /// Fails if the bytes cannot be a key for `algorithm`, or if `algorithm` is not supported.
    pub fn from_bytes(algorithm: Algorithm, bytes: &[u8]) -> Result<Self, CredentialError> {
        match algorithm {
            Algorithm::EdDSA => match bytes.len() {
                sign::SEEDBYTES => Self::ed25519_from_seed(bytes),
                sign::SECRETKEYBYTES => sign::SecretKey::from_slice(bytes)
                    .map(SigningKey::Ed25519)
                    .ok_or_else(|| CredentialError::MalformedKey("invalid Ed25519 key".into())),
                len => Err(CredentialError::MalformedKey(format!(
                    "Ed25519 key must be {} or {} bytes, got {}",
                    sign::SEEDBYTES,
                    sign::SECRETKEYBYTES,
                    len
                ))),
            },
            Algorithm::HS256 | Algorithm::HS512 => {
                if bytes.is_empty() {
                    Err(CredentialError::MalformedKey("empty HMAC secret".into()))
                } else {
                    Ok(SigningKey::Hmac(bytes.to_vec()))
                }
            }
            unsupported => Err(CredentialError::UnsupportedAlgorithm(
                unsupported.name().to_string(),
            )),
        }
    }

    /// Build a key for `algorithm` from base64 (standard alphabet) encoded bytes.
    pub fn from_base64(algorithm: Algorithm, encoded: &str) -> Result<Self, CredentialError> {
        let bytes = base64::decode(encoded.trim())
            .map_err(|e| CredentialError::MalformedKey(format!("invalid base64: {}", e)))?;
        Self::from_bytes(algorithm, &bytes)
    }

    /// Check that the key can be used with `algorithm`.
    pub(crate) fn check(&self, algorithm: Algorithm) -> Result<(), CredentialError> {
        if !algorithm.is_supported() {
            return Err(CredentialError::UnsupportedAlgorithm(
                algorithm.name().to_string(),
            ));
        }
        match (self, algorithm) {
            (SigningKey::Ed25519(_), Algorithm::EdDSA) => Ok(()),
            (SigningKey::Hmac(secret), Algorithm::HS256)
            | (SigningKey::Hmac(secret), Algorithm::HS512) => {
                if secret.is_empty() {
                    Err(CredentialError::MalformedKey("empty HMAC secret".into()))
                } else {
                    Ok(())
                }
            }
            (key, algorithm) => Err(CredentialError::MalformedKey(format!(
                "{} key cannot be used with {}",
                key.kind(),
                algorithm
            ))),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            SigningKey::Ed25519(_) => "Ed25519",
            SigningKey::Hmac(_) => "HMAC",
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SigningKey").field(&self.kind()).finish()
    }
}

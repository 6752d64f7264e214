use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use sodiumoxide::crypto::{
    auth::{hmacsha256, hmacsha512},
    sign,
};

use super::{Algorithm, CredentialError, SigningKey};
use crate::AuthToken;

/// The claims carried by an authentication token. They are serialized in key order, which
/// keeps signing deterministic.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Claims(BTreeMap<String, Value>);

impl Claims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a claim, replacing any previous value.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn issuer(self, issuer: impl Into<String>) -> Self {
        self.with("iss", issuer.into())
    }

    pub fn subject(self, subject: impl Into<String>) -> Self {
        self.with("sub", subject.into())
    }

    /// Set the expiration time, in seconds since the Unix epoch.
    pub fn expires_at(self, timestamp: u64) -> Self {
        self.with("exp", timestamp)
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }
}

impl From<BTreeMap<String, Value>> for Claims {
    fn from(claims: BTreeMap<String, Value>) -> Self {
        Self(claims)
    }
}

#[derive(Serialize)]
struct Header {
    alg: &'static str,
    typ: &'static str,
}

fn encode_part(bytes: &[u8]) -> String {
    base64::encode_config(bytes, base64::URL_SAFE_NO_PAD)
}

fn encode_json<T: Serialize>(value: &T) -> Result<String, CredentialError> {
    serde_json::to_vec(value)
        .map(|json| encode_part(&json))
        .map_err(|e| CredentialError::InvalidClaims(e.to_string()))
}

/// Sign `claims` with `key` and return the resulting token.
///
/// # Errors
/// Fails if `algorithm` is not supported or if `key` cannot be used with it.
pub fn sign(
    claims: &Claims,
    key: &SigningKey,
    algorithm: Algorithm,
) -> Result<AuthToken, CredentialError> {
    key.check(algorithm)?;
    super::init()?;

    let header = Header {
        alg: algorithm.name(),
        typ: "JWT",
    };
    let signing_input = format!("{}.{}", encode_json(&header)?, encode_json(claims)?);
    let signature = match key {
        SigningKey::Ed25519(sk) => sign::sign_detached(signing_input.as_bytes(), sk)
            .as_ref()
            .to_vec(),
        SigningKey::Hmac(secret) => match algorithm {
            Algorithm::HS256 => {
                let mut state = hmacsha256::State::init(secret);
                state.update(signing_input.as_bytes());
                state.finalize().0.to_vec()
            }
            _ => {
                let mut state = hmacsha512::State::init(secret);
                state.update(signing_input.as_bytes());
                state.finalize().0.to_vec()
            }
        },
    };

    Ok(AuthToken::new(format!(
        "{}.{}",
        signing_input,
        encode_part(&signature)
    )))
}

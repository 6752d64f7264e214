use std::time::Duration;
#[cfg(feature = "tls")]
use std::{
    fs,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
#[cfg(feature = "tls")]
use reqwest::Certificate;
use reqwest::{ClientBuilder, Response, StatusCode};

use super::{ClientError, HttpClient};

impl ClientError {
    fn http_error(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Deserialize(format!("{}", e))
        } else if e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() {
            Self::Network(format!("{}", e))
        } else {
            Self::Http(format!("{}", e))
        }
    }

    fn from_status(status: StatusCode) -> Self {
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Self::Unavailable(status.as_u16())
        } else {
            Self::UnexpectedResponse(status.as_u16())
        }
    }
}

async fn read_body(resp: Response) -> Result<bytes::Bytes, ClientError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(ClientError::from_status(status));
    }
    resp.bytes().await.map_err(ClientError::http_error)
}

#[async_trait]
impl HttpClient for reqwest::Client {
    type Body = bytes::Bytes;

    async fn get(&self, url: &str) -> Result<Self::Body, ClientError> {
        let resp = reqwest::Client::get(self, url)
            .send()
            .await
            .map_err(ClientError::http_error)?;
        read_body(resp).await
    }

    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Self::Body, ClientError> {
        let resp = reqwest::Client::post(self, url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(ClientError::http_error)?;
        read_body(resp).await
    }
}

/// Creates a new [`reqwest::Client`], with an optional per-request `timeout`.
///
/// With the `tls` feature, the client only trusts the given root `certificates`, if any.
#[cfg(not(feature = "tls"))]
pub fn new_client(timeout: Option<Duration>) -> Result<reqwest::Client, ClientError> {
    let mut builder = ClientBuilder::new();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build().map_err(ClientError::http_error)
}

/// Creates a new [`reqwest::Client`], with an optional per-request `timeout`.
///
/// If `certificates` are given, they are used as trusted root certificates and must not be
/// empty.
#[cfg(feature = "tls")]
pub fn new_client(
    timeout: Option<Duration>,
    certificates: Option<Vec<Certificate>>,
) -> Result<reqwest::Client, ClientError> {
    let mut builder = ClientBuilder::new();
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(certificates) = certificates {
        if certificates.is_empty() {
            return Err(ClientError::NoCertificate);
        }
        builder = builder.use_rustls_tls().tls_built_in_root_certs(false);
        for certificate in certificates {
            builder = builder.add_root_certificate(certificate);
        }
    }
    builder.build().map_err(ClientError::http_error)
}

/// Reads DER and PEM certificates from given paths.
///
/// Requires the `tls` feature.
#[cfg(feature = "tls")]
pub fn certificates_from(paths: &[PathBuf]) -> Result<Vec<Certificate>, ClientError> {
    fn load_certificate(path: &Path) -> Result<Certificate, ClientError> {
        let encoding = fs::read(path)?;
        match path.extension().and_then(|extension| extension.to_str()) {
            Some("der") => Certificate::from_der(&encoding).map_err(ClientError::http_error),
            Some("pem") => Certificate::from_pem(&encoding).map_err(ClientError::http_error),
            _ => Err(ClientError::UnexpectedCertificate),
        }
    }

    if paths.is_empty() {
        Err(ClientError::NoCertificate)
    } else {
        paths.iter().map(|path| load_certificate(path)).collect()
    }
}

//! JSON messages of the `model-centric` API.

use std::{collections::BTreeMap, time::Duration};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use fedcycle_core::{
    AuthToken,
    ClientConfig,
    ConnectionStats,
    CycleAdmission,
    CycleId,
    CycleOffer,
    JobDescriptor,
    Model,
    ModelId,
    PlanId,
    Rejection,
    RequestKey,
    WorkerId,
};

use super::ClientError;

/// Decode a JSON response. A response carrying an `error` field is turned into
/// [`ClientError::Refused`], whatever its other fields.
pub(super) fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ClientError> {
    let value: Value = serde_json::from_slice(body)?;
    if let Some(error) = value.get("error") {
        let message = match error {
            Value::String(message) => message.clone(),
            other => other.to_string(),
        };
        return Err(ClientError::Refused(message));
    }
    Ok(serde_json::from_value(value)?)
}

#[derive(Serialize)]
pub(super) struct AuthenticateRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_token: Option<AuthToken>,
    model_name: &'a str,
    model_version: &'a str,
}

impl<'a> AuthenticateRequest<'a> {
    pub fn new(auth_token: Option<AuthToken>, job: &'a JobDescriptor) -> Self {
        Self {
            auth_token,
            model_name: &job.model_name,
            model_version: &job.model_version,
        }
    }
}

#[derive(Deserialize)]
pub(super) struct AuthenticateResponse {
    pub worker_id: WorkerId,
}

#[derive(Serialize)]
pub(super) struct CycleRequest<'a> {
    worker_id: &'a WorkerId,
    model: &'a str,
    version: &'a str,
    ping: f64,
    download: f64,
    upload: f64,
}

impl<'a> CycleRequest<'a> {
    pub fn new(worker_id: &'a WorkerId, job: &'a JobDescriptor, stats: &ConnectionStats) -> Self {
        Self {
            worker_id,
            model: &job.model_name,
            version: &job.model_version,
            ping: stats.ping_ms,
            download: stats.download_mbps,
            upload: stats.upload_mbps,
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub(super) enum CycleResponse {
    Accepted {
        cycle_id: CycleId,
        request_key: RequestKey,
        model_id: ModelId,
        #[serde(default)]
        plans: BTreeMap<String, PlanId>,
        #[serde(default)]
        client_config: ClientConfig,
    },
    Rejected {
        /// Seconds to wait before asking again. Absent or `null` when the job is over.
        #[serde(default)]
        timeout: Option<f64>,
    },
}

impl CycleResponse {
    pub fn into_admission(self) -> Result<CycleAdmission, ClientError> {
        match self {
            CycleResponse::Accepted {
                cycle_id,
                request_key,
                model_id,
                plans,
                client_config,
            } => Ok(CycleAdmission::Accepted(CycleOffer {
                cycle_id,
                request_key,
                client_config,
                plans,
                model_id,
            })),
            CycleResponse::Rejected { timeout: None } => {
                Ok(CycleAdmission::Rejected(Rejection::Final))
            }
            CycleResponse::Rejected {
                timeout: Some(secs),
            } => {
                let timeout = Duration::try_from_secs_f64(secs).map_err(|_| {
                    ClientError::Deserialize(format!("invalid rejection timeout: {}", secs))
                })?;
                Ok(CycleAdmission::Rejected(Rejection::RetryAfter(timeout)))
            }
        }
    }
}

#[derive(Serialize)]
pub(super) struct ReportRequest<'a> {
    worker_id: &'a WorkerId,
    request_key: &'a RequestKey,
    /// base64 encoded model difference
    diff: String,
}

impl<'a> ReportRequest<'a> {
    pub fn new(
        worker_id: &'a WorkerId,
        request_key: &'a RequestKey,
        diff: &Model,
    ) -> Result<Self, ClientError> {
        let diff = diff
            .to_bytes()
            .map_err(|e| ClientError::Http(format!("failed to encode model diff: {}", e)))?;
        Ok(Self {
            worker_id,
            request_key,
            diff: base64::encode(diff),
        })
    }
}

#[derive(Deserialize)]
pub(super) struct ReportResponse {}

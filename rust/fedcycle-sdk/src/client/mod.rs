//! HTTP(S) implementation of the [`CoordinatorClient`] trait.
//!
//! [`Client`] speaks the coordination service's `model-centric` API. It is generic over the
//! HTTP backend, so that any HTTP client can be used as long as it implements [`HttpClient`].
//! An implementation for [`reqwest::Client`] is available with the `reqwest-client` feature.
//!
//! [`reqwest::Client`]: https://docs.rs/reqwest/latest/reqwest/struct.Client.html

#[cfg(feature = "reqwest-client")]
#[cfg_attr(docsrs, doc(cfg(feature = "reqwest-client")))]
mod reqwest_client;
mod wire;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;
use url::Url;

use fedcycle_core::{
    AuthToken,
    ConnectionStats,
    CycleAdmission,
    JobDescriptor,
    Model,
    ModelId,
    PlanFormat,
    PlanId,
    RequestKey,
    WorkerId,
};

#[cfg(feature = "reqwest-client")]
pub use self::reqwest_client::new_client;
#[cfg(feature = "tls")]
pub use self::reqwest_client::certificates_from;
use crate::CoordinatorClient;

/// Error returned by a [`CoordinatorClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The service could not be reached, or the connection failed mid-request.
    #[error("network error: {0}")]
    Network(String),

    /// The service answered with a status that indicates a temporary condition (`5xx`, `429`).
    #[error("service unavailable (HTTP status {0})")]
    Unavailable(u16),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("unexpected response (HTTP status {0})")]
    UnexpectedResponse(u16),

    #[error("failed to deserialize data: {0}")]
    Deserialize(String),

    /// The service answered with an explicit error message.
    #[error("the coordinator refused the request: {0}")]
    Refused(String),

    #[error("reading from file failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected certificate extension")]
    UnexpectedCertificate,

    #[error("no certificate found")]
    NoCertificate,
}

impl ClientError {
    /// Whether the error is a transient network condition, worth retrying. Every other error
    /// means the client and the service disagree about the protocol.
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Network(_) | ClientError::Unavailable(_))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        Self::Deserialize(format!("{}", e))
    }
}

impl From<fedcycle_core::ModelError> for ClientError {
    fn from(e: fedcycle_core::ModelError) -> Self {
        Self::Deserialize(format!("{}", e))
    }
}

/// A basic HTTP interface that [`Client`] HTTP backends must implement.
///
/// Implementors map transport failures to [`ClientError::Network`], `5xx` and `429` statuses to
/// [`ClientError::Unavailable`] and any other non-success status to
/// [`ClientError::UnexpectedResponse`].
#[async_trait]
pub trait HttpClient {
    /// Response body type
    type Body: AsRef<[u8]> + Send;

    /// Perform an HTTP `GET` on the given URL and return the response body.
    async fn get(&self, url: &str) -> Result<Self::Body, ClientError>;

    /// Perform an HTTP `POST` of the given JSON body on the given URL and return the response
    /// body.
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Self::Body, ClientError>;
}

/// Error returned when trying to build a [`Client`] with an invalid address for the service.
#[derive(Debug, Error)]
#[error("invalid base URL: {}", .0)]
pub struct InvalidBaseUrl(String);

#[derive(Debug, Clone)]
/// A client that communicates with the coordination service's API via HTTP(S).
pub struct Client<C> {
    /// HTTP(S) client
    client: C,
    /// Service URL
    base_url: Url,
}

impl<C> Client<C>
where
    C: HttpClient,
{
    /// Create a new client.
    ///
    /// # Args
    ///
    /// - `client` is the HTTP client that will be used to perform the HTTP requests. Any HTTP
    ///   client can be used, as long as it implements the [`HttpClient`] trait.
    /// - `base_url` is the URL of the coordination service
    ///
    /// # Errors
    ///
    /// An error is returned if `base_url` is not a valid URL
    pub fn new(http_client: C, base_url: &str) -> Result<Self, InvalidBaseUrl> {
        let base_url = Url::parse(base_url).map_err(|e| InvalidBaseUrl(format!("{}", e)))?;
        if base_url.cannot_be_a_base() {
            return Err(InvalidBaseUrl(String::from("cannot be a base URL")));
        }
        Ok(Self {
            client: http_client,
            base_url,
        })
    }

    /// Append the given endpoint to the `model-centric` API path
    fn url(&self, endpoint: &str) -> Url {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            // UNWRAP_SAFE: checked in `Client::new()`
            .unwrap()
            .pop_if_empty()
            .extend(&["model-centric", endpoint]);
        url
    }

    async fn post_json<T>(&self, url: &Url, body: &T) -> Result<C::Body, ClientError>
    where
        T: serde::Serialize + Sync,
    {
        let body = serde_json::to_vec(body).map_err(|e| ClientError::Http(e.to_string()))?;
        self.client.post(url.as_str(), body).await
    }
}

#[async_trait]
impl<C> CoordinatorClient for Client<C>
where
    C: HttpClient + Send + Sync,
{
    async fn authenticate(
        &self,
        auth_token: Option<AuthToken>,
        job: &JobDescriptor,
    ) -> Result<WorkerId, ClientError> {
        let url = self.url("authenticate");
        let request = wire::AuthenticateRequest::new(auth_token, job);
        let body = self.post_json(&url, &request).await?;
        let response: wire::AuthenticateResponse = wire::decode(body.as_ref())?;
        Ok(response.worker_id)
    }

    async fn request_cycle(
        &self,
        worker_id: &WorkerId,
        job: &JobDescriptor,
        stats: &ConnectionStats,
    ) -> Result<CycleAdmission, ClientError> {
        let url = self.url("cycle-request");
        let request = wire::CycleRequest::new(worker_id, job, stats);
        let body = self.post_json(&url, &request).await?;
        let response: wire::CycleResponse = wire::decode(body.as_ref())?;
        response.into_admission()
    }

    async fn fetch_plan(
        &self,
        worker_id: &WorkerId,
        request_key: &RequestKey,
        plan_id: &PlanId,
        format: PlanFormat,
    ) -> Result<Vec<u8>, ClientError> {
        let mut url = self.url("get-plan");
        url.query_pairs_mut()
            .append_pair("worker_id", worker_id.as_str())
            .append_pair("request_key", request_key.as_str())
            .append_pair("plan_id", plan_id.as_str())
            .append_pair("receive_operations_as", &format.to_string());
        let body = self.client.get(url.as_str()).await?;
        debug!("downloaded plan {} ({} bytes)", plan_id, body.as_ref().len());
        Ok(body.as_ref().to_vec())
    }

    async fn fetch_model(
        &self,
        worker_id: &WorkerId,
        request_key: &RequestKey,
        model_id: &ModelId,
    ) -> Result<Model, ClientError> {
        let mut url = self.url("get-model");
        url.query_pairs_mut()
            .append_pair("worker_id", worker_id.as_str())
            .append_pair("request_key", request_key.as_str())
            .append_pair("model_id", model_id.as_str());
        let body = self.client.get(url.as_str()).await?;
        Ok(Model::from_bytes(body.as_ref())?)
    }

    async fn report_result(
        &self,
        worker_id: &WorkerId,
        request_key: &RequestKey,
        diff: &Model,
    ) -> Result<(), ClientError> {
        let url = self.url("report");
        let request = wire::ReportRequest::new(worker_id, request_key, diff)?;
        let body = self.post_json(&url, &request).await?;
        let _: wire::ReportResponse = wire::decode(body.as_ref())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex, time::Duration};

    use fedcycle_core::{testutils, Rejection};
    use serde_json::{json, Value};

    use super::*;

    /// An HTTP backend that answers with canned responses and records the requests.
    #[derive(Default)]
    struct FakeHttp {
        responses: HashMap<String, Result<Vec<u8>, u16>>,
        requests: Mutex<Vec<(String, Option<Value>)>>,
    }

    impl FakeHttp {
        fn respond(mut self, path: &str, body: impl Into<Vec<u8>>) -> Self {
            self.responses.insert(path.to_string(), Ok(body.into()));
            self
        }

        fn fail(mut self, path: &str, status: u16) -> Self {
            self.responses.insert(path.to_string(), Err(status));
            self
        }

        fn answer(&self, url: &str) -> Result<Vec<u8>, ClientError> {
            let path = Url::parse(url).unwrap().path().to_string();
            match self.responses.get(&path) {
                Some(Ok(body)) => Ok(body.clone()),
                Some(Err(status)) if *status >= 500 => Err(ClientError::Unavailable(*status)),
                Some(Err(status)) => Err(ClientError::UnexpectedResponse(*status)),
                None => Err(ClientError::Network("connection refused".into())),
            }
        }

        fn last_request(&self) -> (String, Option<Value>) {
            self.requests.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl HttpClient for FakeHttp {
        type Body = Vec<u8>;

        async fn get(&self, url: &str) -> Result<Vec<u8>, ClientError> {
            self.requests.lock().unwrap().push((url.to_string(), None));
            self.answer(url)
        }

        async fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, ClientError> {
            let json = serde_json::from_slice(&body).unwrap();
            self.requests
                .lock()
                .unwrap()
                .push((url.to_string(), Some(json)));
            self.answer(url)
        }
    }

    fn client(http: FakeHttp) -> Client<FakeHttp> {
        Client::new(http, "http://localhost:5000/").unwrap()
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(Client::new(FakeHttp::default(), "not a url").is_err());
        assert!(Client::new(FakeHttp::default(), "mailto:fl@example.com").is_err());
    }

    #[test]
    fn test_url() {
        let client = Client::new(FakeHttp::default(), "http://localhost:5000/api").unwrap();
        assert_eq!(
            client.url("report").as_str(),
            "http://localhost:5000/api/model-centric/report"
        );
    }

    #[tokio::test]
    async fn test_authenticate() {
        let http = FakeHttp::default().respond(
            "/model-centric/authenticate",
            r#"{"status": "success", "worker_id": "w-42"}"#,
        );
        let client = client(http);

        let worker_id = client
            .authenticate(Some(AuthToken::new("t0k3n")), &testutils::job())
            .await
            .unwrap();
        assert_eq!(worker_id, WorkerId::new("w-42"));

        let (url, body) = client.client.last_request();
        assert_eq!(url, "http://localhost:5000/model-centric/authenticate");
        assert_eq!(
            body.unwrap(),
            json!({"auth_token": "t0k3n", "model_name": "mnist", "model_version": "1.0.0"})
        );
    }

    #[tokio::test]
    async fn test_authenticate_without_token() {
        let http = FakeHttp::default()
            .respond("/model-centric/authenticate", r#"{"worker_id": "w-1"}"#);
        let client = client(http);
        client
            .authenticate(None, &testutils::job())
            .await
            .unwrap();
        let (_, body) = client.client.last_request();
        assert!(body.unwrap().get("auth_token").is_none());
    }

    #[tokio::test]
    async fn test_authenticate_refused() {
        let http = FakeHttp::default().respond(
            "/model-centric/authenticate",
            r#"{"error": "The 'auth_token' you sent is invalid."}"#,
        );
        let err = client(http)
            .authenticate(None, &testutils::job())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Refused(ref msg) if msg.contains("invalid")));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_request_cycle_accepted() {
        let http = FakeHttp::default().respond(
            "/model-centric/cycle-request",
            json!({
                "status": "accepted",
                "cycle_id": "c-1",
                "request_key": "rk",
                "model_id": "m-1",
                "plans": {"training_plan": "p-1", "eval_plan": "p-2"},
                "protocols": {},
                "client_config": {"batch_size": 64, "lr": 0.01, "max_updates": 10}
            })
            .to_string(),
        );
        let client = client(http);
        let stats = ConnectionStats {
            ping_ms: 8.0,
            download_mbps: 100.0,
            upload_mbps: 20.0,
        };
        let admission = client
            .request_cycle(&testutils::worker_id(), &testutils::job(), &stats)
            .await
            .unwrap();

        let offer = match admission {
            CycleAdmission::Accepted(offer) => offer,
            other => panic!("unexpected admission {:?}", other),
        };
        assert_eq!(offer.cycle_id.to_string(), "c-1");
        assert_eq!(offer.request_key.as_str(), "rk");
        assert_eq!(offer.model_id.as_str(), "m-1");
        assert_eq!(
            offer.plans.keys().collect::<Vec<_>>(),
            vec!["eval_plan", "training_plan"]
        );
        assert_eq!(offer.client_config.max_updates(), Some(10));

        let (_, body) = client.client.last_request();
        assert_eq!(
            body.unwrap(),
            json!({
                "worker_id": "worker-1",
                "model": "mnist",
                "version": "1.0.0",
                "ping": 8.0,
                "download": 100.0,
                "upload": 20.0
            })
        );
    }

    #[tokio::test]
    async fn test_request_cycle_rejected() {
        let with_timeout = FakeHttp::default().respond(
            "/model-centric/cycle-request",
            r#"{"status": "rejected", "timeout": 2.5}"#,
        );
        let admission = client(with_timeout)
            .request_cycle(
                &testutils::worker_id(),
                &testutils::job(),
                &ConnectionStats::default(),
            )
            .await
            .unwrap();
        assert_eq!(
            admission,
            CycleAdmission::Rejected(Rejection::RetryAfter(Duration::from_millis(2500)))
        );

        for body in &[
            r#"{"status": "rejected", "timeout": null}"#,
            r#"{"status": "rejected"}"#,
        ] {
            let http = FakeHttp::default().respond("/model-centric/cycle-request", *body);
            let admission = client(http)
                .request_cycle(
                    &testutils::worker_id(),
                    &testutils::job(),
                    &ConnectionStats::default(),
                )
                .await
                .unwrap();
            assert_eq!(admission, CycleAdmission::Rejected(Rejection::Final));
        }
    }

    #[tokio::test]
    async fn test_request_cycle_malformed() {
        for body in &[
            r#"{"status": "maybe"}"#,
            r#"{"status": "accepted", "request_key": "rk"}"#,
            r#"{"status": "rejected", "timeout": -1}"#,
            r#"{"status": "rejected", "timeout": 1e30}"#,
            "<html>gateway</html>",
        ] {
            let http = FakeHttp::default().respond("/model-centric/cycle-request", *body);
            let err = client(http)
                .request_cycle(
                    &testutils::worker_id(),
                    &testutils::job(),
                    &ConnectionStats::default(),
                )
                .await
                .unwrap_err();
            assert!(
                matches!(err, ClientError::Deserialize(_)),
                "{} gave {:?}",
                body,
                err
            );
            assert!(!err.is_transient());
        }
    }

    #[tokio::test]
    async fn test_fetch_plan() {
        let http = FakeHttp::default().respond("/model-centric/get-plan", vec![1, 2, 3]);
        let client = client(http);
        let plan = client
            .fetch_plan(
                &testutils::worker_id(),
                &RequestKey::new("rk"),
                &PlanId::new("p-1"),
                PlanFormat::Torchscript,
            )
            .await
            .unwrap();
        assert_eq!(plan, vec![1, 2, 3]);
        let (url, _) = client.client.last_request();
        assert_eq!(
            url,
            "http://localhost:5000/model-centric/get-plan?worker_id=worker-1&request_key=rk&plan_id=p-1&receive_operations_as=torchscript"
        );
    }

    #[tokio::test]
    async fn test_fetch_model() {
        let model = testutils::model(0.5);
        let http =
            FakeHttp::default().respond("/model-centric/get-model", model.to_bytes().unwrap());
        let fetched = client(http)
            .fetch_model(
                &testutils::worker_id(),
                &RequestKey::new("rk"),
                &ModelId::new("m-1"),
            )
            .await
            .unwrap();
        assert_eq!(fetched, model);

        let garbage = FakeHttp::default().respond("/model-centric/get-model", vec![0xff]);
        let err = client(garbage)
            .fetch_model(
                &testutils::worker_id(),
                &RequestKey::new("rk"),
                &ModelId::new("m-1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Deserialize(_)));

        // one tensor whose shape has more elements than a usize can count
        let mut overflowing = Vec::new();
        for n in &[1_u64, 2, u64::MAX, 2, 0] {
            overflowing.extend_from_slice(&n.to_le_bytes());
        }
        let http = FakeHttp::default().respond("/model-centric/get-model", overflowing);
        let err = client(http)
            .fetch_model(
                &testutils::worker_id(),
                &RequestKey::new("rk"),
                &ModelId::new("m-1"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Deserialize(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_report_result() {
        let http = FakeHttp::default()
            .respond("/model-centric/report", r#"{"status": "success"}"#);
        let client = client(http);
        let diff = testutils::model(0.25);
        client
            .report_result(&testutils::worker_id(), &RequestKey::new("rk"), &diff)
            .await
            .unwrap();

        let (_, body) = client.client.last_request();
        let body = body.unwrap();
        assert_eq!(body["worker_id"], "worker-1");
        assert_eq!(body["request_key"], "rk");
        let encoded = base64::decode(body["diff"].as_str().unwrap()).unwrap();
        assert_eq!(Model::from_bytes(&encoded).unwrap(), diff);
    }

    #[tokio::test]
    async fn test_error_classification() {
        let http = FakeHttp::default()
            .fail("/model-centric/report", 503)
            .fail("/model-centric/get-model", 404);
        let client = client(http);

        let err = client
            .report_result(
                &testutils::worker_id(),
                &RequestKey::new("rk"),
                &testutils::model(0.0),
            )
            .await
            .unwrap_err();
        assert!(err.is_transient());

        let err = client
            .fetch_model(
                &testutils::worker_id(),
                &RequestKey::new("rk"),
                &ModelId::new("m"),
            )
            .await
            .unwrap_err();
        assert!(!err.is_transient());

        // no canned response: connection refused
        let err = client
            .authenticate(None, &testutils::job())
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}

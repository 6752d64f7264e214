//! Identifiers and messages exchanged with the coordination service.

use std::{collections::BTreeMap, time::Duration};

use derive_more::{AsRef, Display, From, Into};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::Model;

/// An opaque signed credential, presented once per session to authenticate the worker.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, AsRef, From, Into)]
#[serde(transparent)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// Identifier assigned by the service to an authenticated worker.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// Identifier of a cycle, assigned by the service.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct CycleId(String);

impl CycleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// Key binding the downloads and the report of one admission to the worker that was admitted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct RequestKey(String);

impl RequestKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// Server-side identifier of a plan.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct PlanId(String);

impl PlanId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// Server-side identifier of a model checkpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Into)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

/// Identifies the federated task a worker wants to join.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display(fmt = "{}@{}", model_name, model_version)]
pub struct JobDescriptor {
    pub model_name: String,
    pub model_version: String,
}

impl JobDescriptor {
    pub fn new(model_name: impl Into<String>, model_version: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            model_version: model_version.into(),
        }
    }
}

/// Connection characteristics reported when asking for a cycle. The service may use them to
/// select workers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStats {
    /// Round trip time to the service, in milliseconds.
    pub ping_ms: f64,
    /// Download bandwidth, in Mbit/s.
    pub download_mbps: f64,
    /// Upload bandwidth, in Mbit/s.
    pub upload_mbps: f64,
}

/// The representation in which plans are downloaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum PlanFormat {
    #[display(fmt = "list")]
    List,
    #[display(fmt = "torchscript")]
    Torchscript,
    #[display(fmt = "tfjs")]
    Tfjs,
}

impl Default for PlanFormat {
    fn default() -> Self {
        PlanFormat::List
    }
}

/// Named hyperparameters the service hands out with a cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientConfig(BTreeMap<String, Value>);

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value, replacing any previous one.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Get the raw value stored under `key`.
    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Get the value stored under `key`, converted to `T`. Returns `None` if the key is absent
    /// or if the value cannot be converted.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.0
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn batch_size(&self) -> Option<usize> {
        self.get("batch_size")
    }

    pub fn learning_rate(&self) -> Option<f64> {
        self.get("lr")
    }

    /// Maximum number of local updates the worker should perform during the cycle.
    pub fn max_updates(&self) -> Option<usize> {
        self.get("max_updates")
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

/// The terms of an admission: everything the worker needs to download its cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CycleOffer {
    pub cycle_id: CycleId,
    pub request_key: RequestKey,
    pub client_config: ClientConfig,
    /// Plans to fetch, by name. Iteration follows name order.
    pub plans: BTreeMap<String, PlanId>,
    pub model_id: ModelId,
}

/// Why a cycle request was turned down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// No cycle is available right now. Ask again after the given delay.
    RetryAfter(Duration),
    /// The service will never offer another cycle to this worker.
    Final,
}

impl Rejection {
    /// The delay before the next request, `None` if the rejection is final.
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            Rejection::RetryAfter(timeout) => Some(*timeout),
            Rejection::Final => None,
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(self, Rejection::Final)
    }
}

/// An executable training procedure, downloaded as an opaque artifact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plan {
    pub name: String,
    pub id: PlanId,
    pub bytes: Vec<u8>,
}

/// A cycle the worker was admitted to, with its downloaded artifacts.
#[derive(Clone, Debug, PartialEq)]
pub struct Cycle {
    pub id: CycleId,
    pub client_config: ClientConfig,
    /// Plans in name order.
    pub plans: Vec<Plan>,
    /// The global model the worker starts training from.
    pub model: Model,
}

impl Cycle {
    pub fn plan(&self, name: &str) -> Option<&Plan> {
        self.plans.iter().find(|plan| plan.name == name)
    }
}

/// Answer of the service to a cycle request.
#[derive(Clone, Debug, PartialEq)]
pub enum CycleAdmission {
    Accepted(CycleOffer),
    Rejected(Rejection),
}

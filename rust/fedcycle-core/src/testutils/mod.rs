//! Helpers for building protocol values in tests.

use std::{collections::BTreeMap, time::Duration};

use crate::{
    ClientConfig,
    CycleAdmission,
    CycleId,
    CycleOffer,
    JobDescriptor,
    Model,
    ModelId,
    PlanId,
    Rejection,
    RequestKey,
    Tensor,
    WorkerId,
};

pub fn job() -> JobDescriptor {
    JobDescriptor::new("mnist", "1.0.0")
}

pub fn worker_id() -> WorkerId {
    WorkerId::new("worker-1")
}

/// A small model with a `2x2` weight matrix and a bias vector, filled with `value`.
pub fn model(value: f32) -> Model {
    Model::new(vec![
        Tensor::new(vec![2, 2], vec![value; 4]).unwrap(),
        Tensor::vector(vec![value; 2]),
    ])
}

/// An offer for cycle `n`, with a single `training_plan`.
pub fn offer(n: usize) -> CycleOffer {
    let mut plans = BTreeMap::new();
    plans.insert("training_plan".to_string(), PlanId::new(format!("plan-{}", n)));
    CycleOffer {
        cycle_id: CycleId::new(format!("cycle-{}", n)),
        request_key: RequestKey::new(format!("key-{}", n)),
        client_config: ClientConfig::new().with("batch_size", 64).with("lr", 0.01),
        plans,
        model_id: ModelId::new(format!("model-{}", n)),
    }
}

pub fn accepted(n: usize) -> CycleAdmission {
    CycleAdmission::Accepted(offer(n))
}

pub fn retry_after(secs: u64) -> CycleAdmission {
    CycleAdmission::Rejected(Rejection::RetryAfter(Duration::from_secs(secs)))
}

pub fn finished() -> CycleAdmission {
    CycleAdmission::Rejected(Rejection::Final)
}

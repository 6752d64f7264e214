use async_trait::async_trait;

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

use crate::client::ClientError;

/// A trait used by the [`StateMachine`] to communicate with the coordination service.
///
/// A single client is meant to be shared by all the jobs of a process, which is why the methods
/// take `&self` and implementors must be `Send + Sync`.
///
/// [`StateMachine`]: crate::StateMachine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CoordinatorClient: Send + Sync {
    /// Authenticate the worker for the given job. `auth_token` may be omitted if the service
    /// does not require authentication.
    async fn authenticate(
        &self,
        auth_token: Option<AuthToken>,
        job: &JobDescriptor,
    ) -> Result<WorkerId, ClientError>;

    /// Ask to take part in the next cycle of the job.
    async fn request_cycle(
        &self,
        worker_id: &WorkerId,
        job: &JobDescriptor,
        stats: &ConnectionStats,
    ) -> Result<CycleAdmission, ClientError>;

    /// Download a plan of the cycle the worker was admitted to.
    async fn fetch_plan(
        &self,
        worker_id: &WorkerId,
        request_key: &RequestKey,
        plan_id: &PlanId,
        format: PlanFormat,
    ) -> Result<Vec<u8>, ClientError>;

    /// Download the global model of the cycle the worker was admitted to.
    async fn fetch_model(
        &self,
        worker_id: &WorkerId,
        request_key: &RequestKey,
        model_id: &ModelId,
    ) -> Result<Model, ClientError>;

    /// Send the difference between the downloaded model and the locally trained one.
    async fn report_result(
        &self,
        worker_id: &WorkerId,
        request_key: &RequestKey,
        diff: &Model,
    ) -> Result<(), ClientError>;
}

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use fedcycle_core::{ConnectionStats, JobDescriptor, PlanFormat, WorkerId};

use super::{RequestingCycle, TransitionOutcome};
use crate::{
    error::{JobError, JobOutcome},
    events::{Event, Listeners},
    retry::{RetryError, RetryPolicy},
    settings::{Credentials, JobSettings},
    CoordinatorClient,
};

/// State of the state machine
#[derive(Debug)]
pub struct State<P> {
    /// data specific to the current phase
    pub private: Box<P>,
    /// data common to all the phases
    pub shared: Box<SharedState>,
}

impl<P> State<P> {
    /// Create a new state
    pub fn new(shared: Box<SharedState>, private: Box<P>) -> Self {
        Self { shared, private }
    }
}

/// Store for all the data that are common to all the phases
#[derive(Debug)]
pub struct SharedState {
    /// The job the worker takes part in
    pub job: JobDescriptor,
    /// Credentials used once, to authenticate
    pub credentials: Credentials,
    pub retry: RetryPolicy,
    pub connection: ConnectionStats,
    pub plan_format: PlanFormat,
    /// Number of cycles whose result was accepted by the service
    pub reported: u64,
}

impl SharedState {
    pub fn new(settings: JobSettings) -> Self {
        Self {
            job: settings.job,
            credentials: settings.credentials,
            retry: settings.retry,
            connection: settings.connection,
            plan_format: settings.plan_format,
            reported: 0,
        }
    }
}

/// Everything a phase needs to interact with the outside world: the coordination service, the
/// listeners and the owner of the job.
pub(crate) struct PhaseIo {
    pub(crate) client: Arc<dyn CoordinatorClient>,
    pub(crate) listeners: Listeners,
    pub(crate) cancel: CancellationToken,
}

impl PhaseIo {
    pub(crate) fn new(
        client: Arc<dyn CoordinatorClient>,
        listeners: Listeners,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            listeners,
            cancel,
        }
    }
}

/// Represent the state machine in a specific phase
pub struct Phase<P> {
    /// State of the phase.
    pub(super) state: State<P>,
    /// Client, listeners and cancellation token.
    pub(super) io: PhaseIo,
}

impl<P> fmt::Debug for Phase<P>
where
    P: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phase")
            .field("state", &self.state)
            .field("io", &"PhaseIo")
            .finish()
    }
}

/// A trait that each `Phase<P>` implements. When `Step::step` is called, the phase does its
/// work, which may involve calls to the coordination service and waiting.
#[async_trait]
pub trait Step {
    /// Run the phase. The state machine in its next phase is returned as
    /// `TransitionOutcome::Complete`. If the job is over, its outcome is returned as
    /// `TransitionOutcome::Finished`.
    async fn step(self) -> TransitionOutcome;
}

/// Trait for building [`Phase<P>`] from a [`State<P>`].
///
/// Note that we could just use [`Phase::new`] for this. However we want to be able to
/// customize the conversion for each phase. For instance, when entering the waiting phase, the
/// rejection is announced to the listeners.
pub(crate) trait IntoPhase<P> {
    /// Build the phase with the given `io` object
    fn into_phase(self, io: PhaseIo) -> Phase<P>;
}

impl<P> Phase<P> {
    /// Build a new phase with the given state and io object. This should not be called
    /// directly. Instead, use the [`IntoPhase`] trait to construct a phase.
    pub(crate) fn new(state: State<P>, io: PhaseIo) -> Self {
        Phase { state, io }
    }

    /// Dispatch an event to the listeners. Failing listeners are only logged.
    pub(super) fn notify(&mut self, event: Event) {
        notify(&mut self.io, event)
    }

    /// Transition to the cycle request phase
    pub(super) fn into_requesting(self, worker_id: WorkerId) -> Phase<RequestingCycle> {
        State::new(self.state.shared, Box::new(RequestingCycle { worker_id })).into_phase(self.io)
    }

    /// Stop the job on a fatal error, after announcing it to the listeners.
    pub(super) fn fail(mut self, error: JobError) -> TransitionOutcome {
        error!("job {} failed: {}", self.state.shared.job, error);
        let error = Arc::new(error);
        self.notify(Event::Error(error.clone()));
        TransitionOutcome::Finished(JobOutcome::Failed(error))
    }

    /// Stop the job on a failed call to the coordination service.
    pub(super) fn fail_call(self, operation: &'static str, error: RetryError) -> TransitionOutcome {
        match error {
            RetryError::Cancelled => self.cancelled(),
            RetryError::Exhausted { attempts, source } => self.fail(JobError::Network {
                operation,
                attempts,
                source,
            }),
            RetryError::Fatal(source) => self.fail(JobError::Protocol { operation, source }),
        }
    }

    /// Stop the job because it was cancelled. Nothing is announced.
    pub(super) fn cancelled(self) -> TransitionOutcome {
        info!("job {} cancelled", self.state.shared.job);
        TransitionOutcome::Finished(JobOutcome::Cancelled)
    }

    #[cfg(test)]
    pub(crate) fn with_client_mock<F>(&mut self, f: F)
    where
        F: FnOnce(&mut crate::traits::MockCoordinatorClient),
    {
        let mut mock = crate::traits::MockCoordinatorClient::new();
        f(&mut mock);
        self.io.client = Arc::new(mock);
    }

    #[cfg(test)]
    pub(crate) fn check_client_mock(&mut self) {
        // dropping the mock forces the checks to run. We replace it
        // by an empty one, so that we detect if a method is called
        // un-expectedly afterwards
        self.io.client = Arc::new(crate::traits::MockCoordinatorClient::new());
    }
}

pub(super) fn notify(io: &mut PhaseIo, event: Event) {
    let kind = event.kind();
    let failures = io.listeners.dispatch(&event);
    if failures > 0 {
        warn!("{} listener(s) failed to handle {:?} event", failures, kind);
    }
}

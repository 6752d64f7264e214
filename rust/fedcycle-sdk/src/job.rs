//! Running a job to completion.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::{
    error::JobOutcome,
    events::{EventKind, Listener, Listeners},
    settings::JobSettings,
    CoordinatorClient,
    StateMachine,
    TransitionOutcome,
};

/// A worker's participation in a federated training job.
///
/// A job authenticates once, then takes part in cycles until the service announces that no
/// more cycles will be offered, a fatal error occurs, or the job is cancelled. The caller
/// trains the models by listening to [`EventKind::Accepted`] events.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use fedcycle_core::JobDescriptor;
/// # use fedcycle_sdk::{CoordinatorClient, Event, EventKind, Job, JobSettings, ListenerError};
/// # async fn run(client: Arc<dyn CoordinatorClient>) {
/// let settings = JobSettings::new(JobDescriptor::new("mnist", "1.0.0"));
/// let outcome = Job::new(settings, client)
///     .on(EventKind::Accepted, |event: &Event| -> Result<(), ListenerError> {
///         if let Event::Accepted(task) = event {
///             // train `task.model()` according to `task.plans()`, then:
///             task.report(task.model().clone())
///                 .map_err(|e| ListenerError::new(e.to_string()))?;
///         }
///         Ok(())
///     })
///     .run()
///     .await;
/// # }
/// ```
pub struct Job {
    settings: JobSettings,
    client: Arc<dyn CoordinatorClient>,
    listeners: Listeners,
    cancel: CancellationToken,
}

impl Job {
    /// Create a job that talks to the service through `client`. A client can be shared by
    /// several jobs.
    pub fn new(settings: JobSettings, client: Arc<dyn CoordinatorClient>) -> Self {
        Self {
            settings,
            client,
            listeners: Listeners::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the listeners of the job.
    pub fn listeners(mut self, listeners: Listeners) -> Self {
        self.listeners = listeners;
        self
    }

    /// Register a listener for the given kind of events.
    pub fn on<L>(mut self, kind: EventKind, listener: L) -> Self
    where
        L: Listener + 'static,
    {
        self.listeners.register(kind, listener);
        self
    }

    /// Stop the job when `token` is cancelled. Cancelling a parent token cancels every job
    /// created with one of its child tokens.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// A token that cancels the job.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the job until it is over.
    ///
    /// A cancelled job stops at its next suspension point, without emitting any further
    /// event.
    pub async fn run(self) -> JobOutcome {
        let span = info_span!("job", job = %self.settings.job);
        self.drive().instrument(span).await
    }

    async fn drive(self) -> JobOutcome {
        info!("starting job");
        let cancel = self.cancel.clone();
        let mut state_machine =
            StateMachine::new(self.settings, self.client, self.listeners, self.cancel);

        loop {
            if cancel.is_cancelled() {
                info!("job cancelled");
                return JobOutcome::Cancelled;
            }
            debug!("entering phase {}", state_machine.phase_name());
            state_machine = match state_machine.transition().await {
                TransitionOutcome::Complete(state_machine) => state_machine,
                TransitionOutcome::Finished(outcome) => {
                    debug!("job over: {:?}", outcome);
                    return outcome;
                }
            };
        }
    }
}

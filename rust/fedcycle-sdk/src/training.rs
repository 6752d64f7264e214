//! Hand-off of the training step to the caller.
//!
//! When the worker is admitted to a cycle, the state machine emits an [`Event::Accepted`]
//! carrying a [`CycleTask`], then waits. The listener runs the training step, or arranges for it
//! to run elsewhere, and hands the outcome back through the task's [`Reporter`]. The state
//! machine resumes as soon as a result or an error is delivered. If every copy of the reporter
//! is dropped without delivering anything, the cycle fails with [`TrainingError::Abandoned`].
//!
//! [`Event::Accepted`]: crate::Event::Accepted

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::oneshot;

use fedcycle_core::{ClientConfig, Cycle, CycleId, Model, ModelError, Plan, TrainingResult};

/// Error raised by the training step of a cycle.
#[derive(Debug, Error)]
pub enum TrainingError {
    /// The training step reported a failure.
    #[error("training failed: {0}")]
    Failed(String),
    /// The training step gave up without delivering a result.
    #[error("the cycle task was dropped without a result")]
    Abandoned,
    /// The trained model does not have the shape of the model of the cycle.
    #[error("the trained model does not match the model of the cycle: {0}")]
    IncompatibleModel(#[from] ModelError),
}

/// Error returned when a result cannot be handed to the state machine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReportError {
    #[error("a result was already delivered for cycle {0}")]
    AlreadyReported(CycleId),
    #[error("the job stopped waiting for the result of cycle {0}")]
    Closed(CycleId),
}

pub(crate) type TrainingOutcome = Result<TrainingResult, TrainingError>;

/// Delivers the outcome of the training step to the state machine.
///
/// Clones share the same slot: the first delivered outcome wins, later ones are refused with
/// [`ReportError::AlreadyReported`].
#[derive(Debug, Clone)]
pub struct Reporter {
    cycle_id: CycleId,
    sender: Arc<Mutex<Option<oneshot::Sender<TrainingOutcome>>>>,
}

impl Reporter {
    pub(crate) fn new(cycle_id: CycleId) -> (Self, oneshot::Receiver<TrainingOutcome>) {
        let (tx, rx) = oneshot::channel();
        let reporter = Self {
            cycle_id,
            sender: Arc::new(Mutex::new(Some(tx))),
        };
        (reporter, rx)
    }

    pub fn cycle_id(&self) -> &CycleId {
        &self.cycle_id
    }

    /// Deliver the trained model.
    pub fn report(&self, result: impl Into<TrainingResult>) -> Result<(), ReportError> {
        self.deliver(Ok(result.into()))
    }

    /// Deliver a training failure. The job stops after an error event.
    pub fn fail(&self, reason: impl Into<String>) -> Result<(), ReportError> {
        self.deliver(Err(TrainingError::Failed(reason.into())))
    }

    fn deliver(&self, outcome: TrainingOutcome) -> Result<(), ReportError> {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        sender
            .ok_or_else(|| ReportError::AlreadyReported(self.cycle_id.clone()))?
            .send(outcome)
            .map_err(|_| ReportError::Closed(self.cycle_id.clone()))
    }
}

/// A cycle the worker was admitted to, ready for training.
#[derive(Debug, Clone)]
pub struct CycleTask {
    cycle: Arc<Cycle>,
    reporter: Reporter,
}

impl CycleTask {
    pub(crate) fn new(cycle: Cycle, reporter: Reporter) -> Self {
        Self {
            cycle: Arc::new(cycle),
            reporter,
        }
    }

    pub fn cycle_id(&self) -> &CycleId {
        &self.cycle.id
    }

    pub fn client_config(&self) -> &ClientConfig {
        &self.cycle.client_config
    }

    /// The plans of the cycle, in name order.
    pub fn plans(&self) -> &[Plan] {
        &self.cycle.plans
    }

    /// The global model to start training from.
    pub fn model(&self) -> &Model {
        &self.cycle.model
    }

    pub fn cycle(&self) -> &Cycle {
        &self.cycle
    }

    /// A handle for delivering the outcome of the training step, possibly from another task.
    pub fn reporter(&self) -> Reporter {
        self.reporter.clone()
    }

    /// Shortcut for `self.reporter().report(result)`.
    pub fn report(&self, result: impl Into<TrainingResult>) -> Result<(), ReportError> {
        self.reporter.report(result)
    }

    /// Shortcut for `self.reporter().fail(reason)`.
    pub fn fail(&self, reason: impl Into<String>) -> Result<(), ReportError> {
        self.reporter.fail(reason)
    }
}

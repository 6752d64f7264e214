use std::sync::Arc;

use derive_more::From;
use tokio_util::sync::CancellationToken;

use super::{
    Authenticating,
    Downloading,
    IntoPhase,
    Phase,
    PhaseIo,
    Reporting,
    RequestingCycle,
    SharedState,
    State,
    Step,
    Training,
    Waiting,
};
use crate::{error::JobOutcome, events::Listeners, settings::JobSettings, CoordinatorClient};

/// Outcome of a state machine transition.
#[derive(Debug)]
pub enum TransitionOutcome {
    /// Outcome when a transition occured and the state machine was updated.
    Complete(StateMachine),
    /// Outcome when the job is over.
    Finished(JobOutcome),
}

/// Cycle protocol state machine.
#[derive(From, Debug)]
pub enum StateMachine {
    /// State machine in the "authenticating" phase
    Authenticating(Phase<Authenticating>),
    /// State machine in the "requesting cycle" phase
    RequestingCycle(Phase<RequestingCycle>),
    /// State machine in the "waiting" phase
    Waiting(Phase<Waiting>),
    /// State machine in the "downloading" phase
    Downloading(Phase<Downloading>),
    /// State machine in the "training" phase
    Training(Phase<Training>),
    /// State machine in the "reporting" phase
    Reporting(Phase<Reporting>),
}

impl StateMachine {
    /// Instantiate a new state machine, in the "authenticating" phase.
    ///
    /// # Args
    ///
    /// - `settings`: the job and how to run it
    /// - `client`: a client for communicating with the coordination service
    /// - `listeners`: the listeners the state machine notifies as it makes progress
    /// - `cancel`: a token the owner of the job can trigger to stop it
    pub fn new(
        settings: JobSettings,
        client: Arc<dyn CoordinatorClient>,
        listeners: Listeners,
        cancel: CancellationToken,
    ) -> Self {
        let io = PhaseIo::new(client, listeners, cancel);
        let state = State::new(
            Box::new(SharedState::new(settings)),
            Box::new(Authenticating),
        );
        state.into_phase(io).into()
    }

    /// Make progress in the cycle protocol
    pub async fn transition(self) -> TransitionOutcome {
        match self {
            StateMachine::Authenticating(phase) => phase.step().await,
            StateMachine::RequestingCycle(phase) => phase.step().await,
            StateMachine::Waiting(phase) => phase.step().await,
            StateMachine::Downloading(phase) => phase.step().await,
            StateMachine::Training(phase) => phase.step().await,
            StateMachine::Reporting(phase) => phase.step().await,
        }
    }

    /// Name of the current phase, for logging.
    pub fn phase_name(&self) -> &'static str {
        match self {
            StateMachine::Authenticating(_) => "authenticating",
            StateMachine::RequestingCycle(_) => "requesting_cycle",
            StateMachine::Waiting(_) => "waiting",
            StateMachine::Downloading(_) => "downloading",
            StateMachine::Training(_) => "training",
            StateMachine::Reporting(_) => "reporting",
        }
    }

    /// Number of cycles whose result was accepted so far.
    pub fn reported(&self) -> u64 {
        match self {
            StateMachine::Authenticating(phase) => phase.state.shared.reported,
            StateMachine::RequestingCycle(phase) => phase.state.shared.reported,
            StateMachine::Waiting(phase) => phase.state.shared.reported,
            StateMachine::Downloading(phase) => phase.state.shared.reported,
            StateMachine::Training(phase) => phase.state.shared.reported,
            StateMachine::Reporting(phase) => phase.state.shared.reported,
        }
    }
}

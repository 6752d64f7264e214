use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio_util::sync::CancellationToken;

use fedcycle_core::testutils::job;

use crate::{
    events::{Event, EventKind, ListenerError, Listeners},
    retry::RetryPolicy,
    settings::{Credentials, JobSettings},
    state_machine::{IntoPhase, Phase, PhaseIo, SharedState, State},
    traits::MockCoordinatorClient,
};

#[macro_export]
macro_rules! unwrap_as {
    ($e:expr, $p:path) => {
        match $e {
            $p(s) => s,
            x => panic!("Not a {}: {:?}", stringify!($p), x),
        }
    };
}

#[macro_export]
macro_rules! unwrap_step {
    ($phase:expr, finished) => {
        $crate::unwrap_as!(
            $crate::state_machine::Step::step($phase).await,
            $crate::state_machine::TransitionOutcome::Finished
        )
    };
    ($phase:expr, complete, requesting_cycle) => {
        $crate::unwrap_step!($phase, $crate::state_machine::StateMachine::RequestingCycle)
    };
    ($phase:expr, complete, waiting) => {
        $crate::unwrap_step!($phase, $crate::state_machine::StateMachine::Waiting)
    };
    ($phase:expr, complete, downloading) => {
        $crate::unwrap_step!($phase, $crate::state_machine::StateMachine::Downloading)
    };
    ($phase:expr, complete, training) => {
        $crate::unwrap_step!($phase, $crate::state_machine::StateMachine::Training)
    };
    ($phase:expr, complete, reporting) => {
        $crate::unwrap_step!($phase, $crate::state_machine::StateMachine::Reporting)
    };
    ($phase:expr, $state_machine:path) => {{
        let x = $crate::unwrap_as!(
            $crate::state_machine::Step::step($phase).await,
            $crate::state_machine::TransitionOutcome::Complete
        );
        $crate::unwrap_as!(x, $state_machine)
    }};
}

/// Retry policy of the tests: three attempts, one second apart.
pub(crate) fn retry_policy() -> RetryPolicy {
    RetryPolicy::fixed(3, Duration::from_secs(1))
}

pub(crate) fn shared_state() -> SharedState {
    let settings = JobSettings::new(job())
        .with_credentials(Credentials::None)
        .with_retry(retry_policy());
    SharedState::new(settings)
}

/// Records every event a job emits.
#[derive(Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry in which the log listens to every kind of events.
    pub fn listeners(&self) -> Listeners {
        let mut listeners = Listeners::new();
        for kind in EventKind::ALL.iter() {
            let log = self.0.clone();
            listeners.register(*kind, move |event: &Event| -> Result<(), ListenerError> {
                log.lock().unwrap().push(event.clone());
                Ok(())
            });
        }
        listeners
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().iter().map(Event::kind).collect()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear()
    }
}

/// Instantiate a phase whose client is a mock without expectations. Use
/// [`Phase::with_client_mock`] to set up the calls the test expects.
pub(crate) fn make_phase<P>(
    private: P,
    listeners: Listeners,
    cancel: CancellationToken,
) -> Phase<P>
where
    State<P>: IntoPhase<P>,
{
    make_phase_with_state(shared_state(), private, listeners, cancel)
}

pub(crate) fn make_phase_with_state<P>(
    shared: SharedState,
    private: P,
    listeners: Listeners,
    cancel: CancellationToken,
) -> Phase<P>
where
    State<P>: IntoPhase<P>,
{
    let io = PhaseIo::new(Arc::new(MockCoordinatorClient::new()), listeners, cancel);
    State::new(Box::new(shared), Box::new(private)).into_phase(io)
}

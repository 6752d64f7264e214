use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use fedcycle_core::{Rejection, WorkerId};

use crate::{
    events::Event,
    state_machine::{phase::notify, IntoPhase, Phase, PhaseIo, State, Step, TransitionOutcome},
};

/// No cycle was available. The worker waits before asking again.
#[derive(Debug)]
pub struct Waiting {
    pub worker_id: WorkerId,
    /// How long to wait, as requested by the service.
    pub timeout: Duration,
}

impl IntoPhase<Waiting> for State<Waiting> {
    fn into_phase(self, mut io: PhaseIo) -> Phase<Waiting> {
        notify(
            &mut io,
            Event::Rejected(Rejection::RetryAfter(self.private.timeout)),
        );
        Phase::<_>::new(self, io)
    }
}

#[async_trait]
impl Step for Phase<Waiting> {
    async fn step(self) -> TransitionOutcome {
        let timeout = self.state.private.timeout;
        info!("no cycle available, asking again in {:?}", timeout);

        tokio::select! {
            biased;

            _ = self.io.cancel.cancelled() => return self.cancelled(),
            _ = tokio::time::sleep(timeout) => {}
        }

        let worker_id = self.state.private.worker_id.clone();
        TransitionOutcome::Complete(self.into_requesting(worker_id).into())
    }
}

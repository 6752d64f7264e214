use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use fedcycle_core::{CycleAdmission, CycleOffer, Rejection, WorkerId};

use crate::{
    error::JobOutcome,
    events::Event,
    retry::retry,
    state_machine::{
        Downloading,
        IntoPhase,
        Phase,
        PhaseIo,
        State,
        Step,
        TransitionOutcome,
        Waiting,
    },
};

/// The worker asks to take part in the next cycle of its job.
#[derive(Debug)]
pub struct RequestingCycle {
    pub worker_id: WorkerId,
}

impl IntoPhase<RequestingCycle> for State<RequestingCycle> {
    fn into_phase(self, io: PhaseIo) -> Phase<RequestingCycle> {
        Phase::<_>::new(self, io)
    }
}

#[async_trait]
impl Step for Phase<RequestingCycle> {
    async fn step(mut self) -> TransitionOutcome {
        debug!("requesting a cycle");
        let admission = {
            let client = &self.io.client;
            let shared = &self.state.shared;
            let worker_id = &self.state.private.worker_id;
            retry(&shared.retry, &self.io.cancel, "request_cycle", || {
                client.request_cycle(worker_id, &shared.job, &shared.connection)
            })
            .await
        };

        match admission {
            Ok(CycleAdmission::Accepted(offer)) => {
                info!("admitted to cycle {}", offer.cycle_id);
                TransitionOutcome::Complete(self.into_downloading(offer).into())
            }
            Ok(CycleAdmission::Rejected(Rejection::RetryAfter(timeout))) => {
                TransitionOutcome::Complete(self.into_waiting(timeout).into())
            }
            Ok(CycleAdmission::Rejected(Rejection::Final)) => {
                info!(
                    "no more cycles for job {}, {} result(s) reported",
                    self.state.shared.job, self.state.shared.reported
                );
                self.notify(Event::Rejected(Rejection::Final));
                TransitionOutcome::Finished(JobOutcome::Completed)
            }
            Err(e) => self.fail_call("request_cycle", e),
        }
    }
}

impl Phase<RequestingCycle> {
    fn into_downloading(self, offer: CycleOffer) -> Phase<Downloading> {
        let RequestingCycle { worker_id } = *self.state.private;
        State::new(
            self.state.shared,
            Box::new(Downloading { worker_id, offer }),
        )
        .into_phase(self.io)
    }

    fn into_waiting(self, timeout: Duration) -> Phase<Waiting> {
        let RequestingCycle { worker_id } = *self.state.private;
        State::new(self.state.shared, Box::new(Waiting { worker_id, timeout })).into_phase(self.io)
    }
}

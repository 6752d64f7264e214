use async_trait::async_trait;
use tracing::info;

use fedcycle_core::{CycleId, Model, RequestKey, WorkerId};

use crate::{
    events::Event,
    retry::retry,
    state_machine::{IntoPhase, Phase, PhaseIo, State, Step, TransitionOutcome},
};

/// The worker sends its update to the service.
#[derive(Debug)]
pub struct Reporting {
    pub worker_id: WorkerId,
    pub cycle_id: CycleId,
    pub request_key: RequestKey,
    /// Difference between the global model and the trained one.
    pub diff: Model,
}

impl IntoPhase<Reporting> for State<Reporting> {
    fn into_phase(self, io: PhaseIo) -> Phase<Reporting> {
        Phase::<_>::new(self, io)
    }
}

#[async_trait]
impl Step for Phase<Reporting> {
    async fn step(mut self) -> TransitionOutcome {
        info!("reporting the result of cycle {}", self.state.private.cycle_id);
        let reported = {
            let client = &self.io.client;
            let private = &self.state.private;
            retry(&self.state.shared.retry, &self.io.cancel, "report_result", || {
                client.report_result(&private.worker_id, &private.request_key, &private.diff)
            })
            .await
        };
        if let Err(e) = reported {
            return self.fail_call("report_result", e);
        }

        self.state.shared.reported += 1;
        let cycle_id = self.state.private.cycle_id.clone();
        info!("result of cycle {} accepted", cycle_id);
        self.notify(Event::Reported(cycle_id));

        let worker_id = self.state.private.worker_id.clone();
        TransitionOutcome::Complete(self.into_requesting(worker_id).into())
    }
}

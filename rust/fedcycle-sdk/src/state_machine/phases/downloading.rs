use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use fedcycle_core::{Cycle, CycleOffer, Plan, WorkerId};

use crate::{
    events::Event,
    retry::{retry, RetryError},
    state_machine::{
        IntoPhase,
        Phase,
        PhaseIo,
        SharedState,
        State,
        Step,
        Training,
        TransitionOutcome,
    },
    training::{CycleTask, Reporter},
    CoordinatorClient,
};

/// The worker was admitted to a cycle and downloads its plans and model.
#[derive(Debug)]
pub struct Downloading {
    pub worker_id: WorkerId,
    pub offer: CycleOffer,
}

impl IntoPhase<Downloading> for State<Downloading> {
    fn into_phase(self, io: PhaseIo) -> Phase<Downloading> {
        Phase::<_>::new(self, io)
    }
}

#[async_trait]
impl Step for Phase<Downloading> {
    async fn step(self) -> TransitionOutcome {
        info!(
            "downloading {} plan(s) and the model of cycle {}",
            self.state.private.offer.plans.len(),
            self.state.private.offer.cycle_id
        );
        let cycle = fetch_cycle(
            self.io.client.as_ref(),
            &self.state.shared,
            &self.io.cancel,
            &self.state.private.worker_id,
            &self.state.private.offer,
        )
        .await;

        match cycle {
            Ok(cycle) => self.into_training(cycle),
            Err((operation, e)) => self.fail_call(operation, e),
        }
    }
}

impl Phase<Downloading> {
    /// Hand the cycle over to the listeners, then wait for their result.
    fn into_training(mut self, cycle: Cycle) -> TransitionOutcome {
        let (reporter, result) = Reporter::new(cycle.id.clone());
        let model = cycle.model.clone();
        self.notify(Event::Accepted(CycleTask::new(cycle, reporter)));

        let Phase { state, io } = self;
        let Downloading { worker_id, offer } = *state.private;
        let training = Training {
            worker_id,
            cycle_id: offer.cycle_id,
            request_key: offer.request_key,
            model,
            result,
        };
        let phase = State::new(state.shared, Box::new(training)).into_phase(io);
        TransitionOutcome::Complete(phase.into())
    }
}

/// Download the plans, in name order, then the model of an offer.
async fn fetch_cycle(
    client: &dyn CoordinatorClient,
    shared: &SharedState,
    cancel: &CancellationToken,
    worker_id: &WorkerId,
    offer: &CycleOffer,
) -> Result<Cycle, (&'static str, RetryError)> {
    let mut plans = Vec::with_capacity(offer.plans.len());
    for (name, plan_id) in offer.plans.iter() {
        debug!("downloading plan {} ({})", name, plan_id);
        let bytes = retry(&shared.retry, cancel, "fetch_plan", || {
            client.fetch_plan(worker_id, &offer.request_key, plan_id, shared.plan_format)
        })
        .await
        .map_err(|e| ("fetch_plan", e))?;
        plans.push(Plan {
            name: name.clone(),
            id: plan_id.clone(),
            bytes,
        });
    }

    debug!("downloading model {}", offer.model_id);
    let model = retry(&shared.retry, cancel, "fetch_model", || {
        client.fetch_model(worker_id, &offer.request_key, &offer.model_id)
    })
    .await
    .map_err(|e| ("fetch_model", e))?;

    Ok(Cycle {
        id: offer.cycle_id.clone(),
        client_config: offer.client_config.clone(),
        plans,
        model,
    })
}

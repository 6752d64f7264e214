use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, info};

use fedcycle_core::{CycleId, Model, RequestKey, WorkerId};

use crate::{
    state_machine::{IntoPhase, Phase, PhaseIo, Reporting, State, Step, TransitionOutcome},
    training::{TrainingError, TrainingOutcome},
};

/// The listeners train the model of the cycle. The state machine waits for their result.
#[derive(Debug)]
pub struct Training {
    pub worker_id: WorkerId,
    pub cycle_id: CycleId,
    pub request_key: RequestKey,
    /// The global model of the cycle, which the update is computed against.
    pub model: Model,
    pub result: oneshot::Receiver<TrainingOutcome>,
}

impl IntoPhase<Training> for State<Training> {
    fn into_phase(self, io: PhaseIo) -> Phase<Training> {
        Phase::<_>::new(self, io)
    }
}

#[async_trait]
impl Step for Phase<Training> {
    async fn step(mut self) -> TransitionOutcome {
        info!("waiting for the training of cycle {}", self.state.private.cycle_id);

        let outcome = tokio::select! {
            biased;

            _ = self.io.cancel.cancelled() => return self.cancelled(),
            outcome = &mut self.state.private.result => outcome,
        };

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => return self.fail(e.into()),
            // every reporter was dropped without a result
            Err(_) => return self.fail(TrainingError::Abandoned.into()),
        };

        let diff = match self.state.private.model.diff(&result.parameters) {
            Ok(diff) => diff,
            Err(e) => return self.fail(TrainingError::from(e).into()),
        };
        debug!("computed update of {} parameter(s)", diff.num_parameters());

        let Phase { state, io } = self;
        let Training {
            worker_id,
            cycle_id,
            request_key,
            ..
        } = *state.private;
        let reporting = Reporting {
            worker_id,
            cycle_id,
            request_key,
            diff,
        };
        let phase = State::new(state.shared, Box::new(reporting)).into_phase(io);
        TransitionOutcome::Complete(phase.into())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use fedcycle_core::{
        testutils::{model, offer, worker_id},
        Model,
        Tensor,
    };

    use super::*;
    use crate::{
        error::{JobError, JobOutcome},
        events::EventKind,
        state_machine::testutils::{make_phase, EventLog},
        training::Reporter,
        unwrap_as,
        unwrap_step,
    };

    /// Instantiate a training phase for cycle 1, whose global model is filled with `1.0`.
    fn make_training(log: &EventLog, cancel: CancellationToken) -> (Phase<Training>, Reporter) {
        let offer = offer(1);
        let (reporter, result) = Reporter::new(offer.cycle_id.clone());
        let training = Training {
            worker_id: worker_id(),
            cycle_id: offer.cycle_id,
            request_key: offer.request_key,
            model: model(1.0),
            result,
        };
        let mut phase = make_phase(training, log.listeners(), cancel);
        phase.check_client_mock();
        (phase, reporter)
    }

    #[tokio::test]
    async fn test_result_is_diffed() {
        let log = EventLog::new();
        let (phase, reporter) = make_training(&log, CancellationToken::new());
        reporter.report(model(0.25)).unwrap();

        let phase = unwrap_step!(phase, complete, reporting);
        assert_eq!(phase.state.private.diff, model(0.75));
        assert_eq!(phase.state.private.cycle_id, offer(1).cycle_id);
        assert_eq!(phase.state.private.request_key, offer(1).request_key);
        assert!(log.events().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_for_the_result() {
        let log = EventLog::new();
        let (phase, reporter) = make_training(&log, CancellationToken::new());
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            reporter.report(model(1.0)).unwrap();
        });

        let phase = unwrap_step!(phase, complete, reporting);
        assert_eq!(phase.state.private.diff, model(0.0));
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_training_failure() {
        let log = EventLog::new();
        let (phase, reporter) = make_training(&log, CancellationToken::new());
        reporter.fail("out of memory").unwrap();

        let outcome = unwrap_step!(phase, finished);
        let error = unwrap_as!(outcome, JobOutcome::Failed);
        assert!(matches!(*error, JobError::Training(TrainingError::Failed(_))));
        assert_eq!(log.kinds(), vec![EventKind::Error]);
    }

    #[tokio::test]
    async fn test_abandoned() {
        let log = EventLog::new();
        let (phase, reporter) = make_training(&log, CancellationToken::new());
        drop(reporter);

        let outcome = unwrap_step!(phase, finished);
        let error = unwrap_as!(outcome, JobOutcome::Failed);
        assert!(matches!(*error, JobError::Training(TrainingError::Abandoned)));
        assert_eq!(log.kinds(), vec![EventKind::Error]);
    }

    #[tokio::test]
    async fn test_incompatible_result() {
        let log = EventLog::new();
        let (phase, reporter) = make_training(&log, CancellationToken::new());
        reporter
            .report(Model::new(vec![Tensor::vector(vec![1.0; 3])]))
            .unwrap();

        let outcome = unwrap_step!(phase, finished);
        let error = unwrap_as!(outcome, JobOutcome::Failed);
        assert!(matches!(
            *error,
            JobError::Training(TrainingError::IncompatibleModel(_))
        ));
        assert_eq!(log.kinds(), vec![EventKind::Error]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_while_training() {
        let log = EventLog::new();
        let cancel = CancellationToken::new();
        let (phase, reporter) = make_training(&log, cancel.clone());
        cancel.cancel();

        let outcome = unwrap_step!(phase, finished);
        assert!(outcome.is_cancelled());
        assert!(log.events().is_empty());
        // the late result is refused
        assert!(reporter.report(model(0.0)).is_err());
    }
}

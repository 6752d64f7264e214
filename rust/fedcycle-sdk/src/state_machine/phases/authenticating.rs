use async_trait::async_trait;
use tracing::{debug, info};

use crate::{
    error::JobError,
    state_machine::{IntoPhase, Phase, PhaseIo, State, Step, TransitionOutcome},
};

/// First phase of a job: the worker proves its identity and gets its worker id.
#[derive(Debug)]
pub struct Authenticating;

impl IntoPhase<Authenticating> for State<Authenticating> {
    fn into_phase(self, io: PhaseIo) -> Phase<Authenticating> {
        Phase::<_>::new(self, io)
    }
}

#[async_trait]
impl Step for Phase<Authenticating> {
    async fn step(self) -> TransitionOutcome {
        info!("authenticating for job {}", self.state.shared.job);

        let token = match self.state.shared.credentials.resolve() {
            Ok(token) => token,
            Err(e) => return self.fail(JobError::Credential(e)),
        };
        if token.is_none() {
            debug!("no credentials configured, authenticating anonymously");
        }

        // authentication is attempted once: a refused token will not become valid by retrying
        let result = self
            .io
            .client
            .authenticate(token, &self.state.shared.job)
            .await;
        if self.io.cancel.is_cancelled() {
            return self.cancelled();
        }

        match result {
            Ok(worker_id) => {
                info!("authenticated as worker {}", worker_id);
                TransitionOutcome::Complete(self.into_requesting(worker_id).into())
            }
            Err(e) => self.fail(JobError::Authentication(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use fedcycle_core::{
        crypto::{Algorithm, Claims, CredentialError, SigningKey},
        testutils::worker_id,
        AuthToken,
    };

    use super::*;
    use crate::{
        client::ClientError,
        error::JobOutcome,
        events::EventKind,
        settings::Credentials,
        state_machine::testutils::{make_phase, make_phase_with_state, shared_state, EventLog},
        unwrap_as,
        unwrap_step,
    };

    #[tokio::test]
    async fn test_authenticated() {
        let log = EventLog::new();
        let mut phase = make_phase(Authenticating, log.listeners(), CancellationToken::new());
        phase.with_client_mock(|mock| {
            mock.expect_authenticate()
                .withf(|token, job| token.is_none() && job.model_name == "mnist")
                .times(1)
                .returning(|_, _| Ok(worker_id()));
        });

        let phase = unwrap_step!(phase, complete, requesting_cycle);
        assert_eq!(phase.state.private.worker_id, worker_id());
        assert!(log.events().is_empty());
    }

    #[tokio::test]
    async fn test_token_is_sent() {
        let mut shared = shared_state();
        shared.credentials = Credentials::Token(AuthToken::new("secret-token"));
        let mut phase = make_phase_with_state(
            shared,
            Authenticating,
            EventLog::new().listeners(),
            CancellationToken::new(),
        );
        phase.with_client_mock(|mock| {
            mock.expect_authenticate()
                .withf(|token, _| matches!(token, Some(token) if token.as_str() == "secret-token"))
                .times(1)
                .returning(|_, _| Ok(worker_id()));
        });

        let _ = unwrap_step!(phase, complete, requesting_cycle);
    }

    #[tokio::test]
    async fn test_authentication_is_not_retried() {
        let log = EventLog::new();
        let mut phase = make_phase(Authenticating, log.listeners(), CancellationToken::new());
        phase.with_client_mock(|mock| {
            mock.expect_authenticate()
                .times(1)
                .returning(|_, _| Err(ClientError::Network("connection reset".into())));
        });

        let outcome = unwrap_step!(phase, finished);
        let error = unwrap_as!(outcome, JobOutcome::Failed);
        assert!(matches!(*error, JobError::Authentication(ClientError::Network(_))));
        assert_eq!(log.kinds(), vec![EventKind::Error]);
    }

    #[tokio::test]
    async fn test_credential_error() {
        let log = EventLog::new();
        let mut shared = shared_state();
        shared.credentials = Credentials::Signed {
            algorithm: Algorithm::EdDSA,
            key: SigningKey::Hmac(b"not an ed25519 key".to_vec()),
            claims: Claims::new(),
        };
        let mut phase = make_phase_with_state(
            shared,
            Authenticating,
            log.listeners(),
            CancellationToken::new(),
        );
        phase.with_client_mock(|mock| {
            mock.expect_authenticate().never();
        });

        let outcome = unwrap_step!(phase, finished);
        let error = unwrap_as!(outcome, JobOutcome::Failed);
        assert!(matches!(
            *error,
            JobError::Credential(CredentialError::MalformedKey(_))
        ));
        assert_eq!(log.kinds(), vec![EventKind::Error]);
    }

    #[tokio::test]
    async fn test_result_discarded_when_cancelled() {
        let log = EventLog::new();
        let cancel = CancellationToken::new();
        let mut phase = make_phase(Authenticating, log.listeners(), cancel.clone());
        let token = cancel.clone();
        phase.with_client_mock(move |mock| {
            mock.expect_authenticate().times(1).returning(move |_, _| {
                token.cancel();
                Ok(worker_id())
            });
        });

        let outcome = unwrap_step!(phase, finished);
        assert!(outcome.is_cancelled());
        assert!(log.events().is_empty());
    }
}

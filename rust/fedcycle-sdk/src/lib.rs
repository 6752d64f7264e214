#![cfg_attr(docsrs, feature(doc_cfg))]
//! This crate implements the worker side of the cycle protocol of a federated learning
//! coordination service.
//!
//! A worker takes part in a _job_: the federated training of a given model. The service
//! splits the job into cycles. For every cycle the worker:
//!
//! 1. asks to take part in the cycle. The service either admits it, asks it to come back
//!    later, or announces that the job is over for this worker
//! 2. once admitted, downloads the training plans and the global model of the cycle
//! 3. hands them over to the caller, which trains the model locally
//! 4. reports the difference between the global model and the trained one
//!
//! Before the first cycle, the worker authenticates once, with a token it may sign itself.
//!
//! # Running a job
//!
//! The protocol is implemented by a [`StateMachine`], which a [`Job`] drives until the job is
//! over. The caller interacts with the job through listeners, registered per [`EventKind`]:
//!
//! - [`Event::Accepted`]: the worker was admitted to a cycle. The event carries a
//!   [`CycleTask`], through which the caller reports the trained model
//! - [`Event::Rejected`]: no cycle was available, or the job is over
//! - [`Event::Reported`]: the service accepted the result of a cycle
//! - [`Event::Error`]: the job stops on a fatal error
//!
//! A job needs a client to talk with the service. This can be any type that implements the
//! [`CoordinatorClient`] trait. An HTTP implementation is available in [`client`], and a
//! [`reqwest`] based one when compiling with `--features reqwest-client`.
//!
//! Calls that fail on transient network errors are retried according to the job's
//! [`RetryPolicy`]. Authentication is never retried.
//!
//! [`reqwest`]: https://docs.rs/reqwest

pub mod client;
mod error;
pub mod events;
mod job;
pub mod retry;
pub mod settings;
mod state_machine;
mod traits;
pub mod training;

pub use self::{
    error::{JobError, JobOutcome},
    events::{ChannelListener, Event, EventKind, Listener, ListenerError, Listeners},
    job::Job,
    retry::RetryPolicy,
    settings::{Credentials, JobSettings},
    state_machine::{StateMachine, TransitionOutcome},
    traits::CoordinatorClient,
    training::{CycleTask, ReportError, Reporter, TrainingError},
};

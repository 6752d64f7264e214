#![cfg_attr(docsrs, feature(doc_cfg))]
//! Core types of the fedcycle federated learning worker.
//!
//! A worker takes part in a federated training job that a remote coordination service splits
//! into successive _cycles_. In every cycle the service admits some workers, hands them a set of
//! training plans and the current global model, and waits for them to report how their local
//! training changed the model.
//!
//! This crate provides the vocabulary shared by the rest of the workspace:
//!
//! - [`common`]: identifiers, job descriptors and the admission messages of the protocol
//! - [`model`]: the model parameters and the training results
//! - [`crypto`]: the credential provider, which signs the tokens workers authenticate with
//!
//! The protocol itself is implemented in the `fedcycle-sdk` crate.

pub mod common;
pub mod crypto;
pub mod model;
#[cfg(any(test, feature = "testutils"))]
#[cfg_attr(docsrs, doc(cfg(feature = "testutils")))]
pub mod testutils;

pub use self::{
    common::{
        AuthToken,
        ClientConfig,
        ConnectionStats,
        Cycle,
        CycleAdmission,
        CycleId,
        CycleOffer,
        JobDescriptor,
        ModelId,
        Plan,
        PlanFormat,
        PlanId,
        Rejection,
        RequestKey,
        WorkerId,
    },
    model::{Model, ModelError, Tensor, TrainingResult},
};

//! The client side of the cycle protocol, as a state machine.
//!
//! A job goes through the following phases:
//!
//! ```text
//! Authenticating -> RequestingCycle -> Downloading -> Training -> Reporting
//!                     ^    |    ^                                   |
//!                     |    v    |___________________________________|
//!                     Waiting
//! ```
//!
//! Every phase is a [`Phase<P>`] where `P` holds the data specific to the phase. The
//! [`StateMachine`] enum wraps them, so that the job can drive the protocol one
//! [`StateMachine::transition`] at a time, until a [`TransitionOutcome::Finished`] is returned.

mod phase;
mod phases;
#[allow(clippy::module_inception)]
mod state_machine;

#[cfg(test)]
pub(crate) mod testutils;

// It is useful to re-export everything within this module because
// there are lot of interdependencies between all the sub-modules
use self::{
    phase::{IntoPhase, Phase, PhaseIo, SharedState, State, Step},
    phases::{Authenticating, Downloading, Reporting, RequestingCycle, Training, Waiting},
};

pub use state_machine::{StateMachine, TransitionOutcome};

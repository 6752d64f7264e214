mod authenticating;
mod downloading;
mod reporting;
mod requesting;
mod training;
mod waiting;

pub use self::{
    authenticating::Authenticating,
    downloading::Downloading,
    reporting::Reporting,
    requesting::RequestingCycle,
    training::Training,
    waiting::Waiting,
};

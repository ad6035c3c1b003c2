//! Result persistence
//!
//! Finished sessions and participant status checkpoints leave through the
//! [`pipeline::SubmissionPipeline`], which retries against a
//! [`transport::SubmissionTransport`] and records saved keys in the
//! [`store::LocalState`].

pub mod pipeline;
pub mod store;
pub mod transport;

pub use pipeline::{RetryPolicy, SubmissionJob, SubmissionOutcome, SubmissionPipeline};
pub use store::LocalState;
pub use transport::{
    DataSubmission, HttpTransport, StatusUpdate, SubmissionRequest, SubmissionTransport,
};

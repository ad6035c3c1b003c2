//! Session timeline
//!
//! The [`orchestrator::Timeline`] runs trials one at a time and builds the
//! [`session::SessionRecord`] that is eventually submitted.

pub mod orchestrator;
pub mod session;

pub use orchestrator::{CompletionHook, StatusCheckpoints, Timeline};
pub use session::{ParticipantIdentity, Platform, SessionRecord, generate_completion_code};

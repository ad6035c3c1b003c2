//! Trial phase orchestration
//!
//! One trial is a small state machine composed from three leaf services:
//! a cancelable [`timer::TimerService`], a per-trial
//! [`listener::ListenerRegistry`] and a [`recorder::ResponseRecorder`].
//! The [`controller::TrialController`] ties them together and produces
//! exactly one [`outcome::TrialOutcome`].

pub mod controller;
pub mod listener;
pub mod outcome;
pub mod recorder;
pub mod state;
pub mod timer;

pub use controller::{InputDisposition, TrialController, TrialSignal};
pub use listener::{HeldKeys, InputMatcher, ListenerAction, ListenerRegistry, RawInput};
pub use outcome::{InputSource, ResponseEvent, Termination, TrialOutcome};
pub use recorder::{Recorded, ResponsePolicy, ResponseRecorder};
pub use state::Phase;
pub use timer::{TimerHandle, TimerService};

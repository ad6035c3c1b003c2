//! `trialkit` - timed multi-phase trial runner
//!
//! This library runs behavioral-experiment trials as small phase state
//! machines (display, gated response, open response) with cancelable
//! timers and input listeners, sequences them into a session, and saves
//! the results through a retrying, deduplicating submission pipeline.

pub mod cli;
pub mod config;
pub mod error;
pub mod input;
pub mod observability;
pub mod submission;
pub mod timeline;
pub mod trial;

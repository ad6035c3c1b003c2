//! Participant input sources.

pub mod stdio;

pub use stdio::{FeedItem, InputLine, MAX_LINE, parse_line, pump};

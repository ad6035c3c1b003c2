//! NDJSON input feed
//!
//! Participant input arrives as one JSON object per line, tagged by
//! `type`:
//!
//! ```text
//! {"type":"key_down","key":"f"}
//! {"type":"key_up","key":"f"}
//! {"type":"pointer","value":0.42}
//! {"type":"submit","value":{"age":31}}
//! {"type":"skip"}
//! {"type":"end"}
//! {"type":"wait","ms":350}
//! ```
//!
//! `wait` pauses the feed itself, which lets a recorded session be
//! replayed with its original spacing.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::InputError;
use crate::trial::controller::TrialSignal;
use crate::trial::listener::RawInput;

/// Default maximum size of one input line in bytes.
pub const MAX_LINE: usize = 64 * 1024;

/// One line of the input feed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum InputLine {
    /// Key pressed
    KeyDown {
        /// Key name
        key: String,
        /// Auto-repeat flag
        #[serde(default)]
        repeat: bool,
    },
    /// Key released
    KeyUp {
        /// Key name
        key: String,
    },
    /// Pointer interaction
    Pointer {
        /// Widget value
        value: Value,
    },
    /// Form submission
    Submit {
        /// Submitted fields
        #[serde(default)]
        value: Value,
    },
    /// Skip the display phase
    Skip,
    /// End the current trial
    End,
    /// Pause the feed
    Wait {
        /// Pause length in milliseconds
        ms: u64,
    },
}

/// What a parsed line asks the feed to do.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    /// Deliver a signal to the running trial
    Signal(TrialSignal),
    /// Sleep before reading the next line
    Wait(Duration),
}

impl From<InputLine> for FeedItem {
    fn from(line: InputLine) -> Self {
        let signal = match line {
            InputLine::KeyDown { key, repeat } => TrialSignal::Input(RawInput::KeyDown { key, repeat }),
            InputLine::KeyUp { key } => TrialSignal::Input(RawInput::KeyUp { key }),
            InputLine::Pointer { value } => TrialSignal::Input(RawInput::Pointer { value }),
            InputLine::Submit { value } => TrialSignal::Input(RawInput::Submit { value }),
            InputLine::Skip => TrialSignal::Skip,
            InputLine::End => TrialSignal::End,
            InputLine::Wait { ms } => return Self::Wait(Duration::from_millis(ms)),
        };
        Self::Signal(signal)
    }
}

/// Parses one feed line. Blank lines yield `None`.
///
/// # Errors
///
/// Returns [`InputError::Malformed`] if the line is not a known input object.
pub fn parse_line(line: &str) -> Result<Option<FeedItem>, InputError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str::<InputLine>(trimmed)
        .map(|parsed| Some(parsed.into()))
        .map_err(|e| InputError::Malformed(e.to_string()))
}

/// Reads the feed until EOF or cancellation, forwarding signals to `tx`.
///
/// Malformed and oversized lines are logged and skipped. At EOF the sender
/// is kept until `cancel` fires, so running trials can still time out;
/// cancellation drops it, which ends the session.
///
/// # Errors
///
/// Returns [`InputError::Io`] if the underlying reader fails.
pub async fn pump<R>(
    mut reader: R,
    tx: UnboundedSender<TrialSignal>,
    max_line: usize,
    cancel: CancellationToken,
) -> Result<(), InputError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(max_line.min(4096));
    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => {
                debug!("input feed cancelled");
                return Ok(());
            }
            line = read_bounded_line(&mut reader, max_line, &mut buf) => line?,
        };

        let Some(overflowed) = line else {
            debug!("input feed reached EOF");
            cancel.cancelled().await;
            return Ok(());
        };
        if overflowed {
            warn!(limit = max_line, "input line exceeds size limit, skipping");
            continue;
        }
        let Ok(text) = std::str::from_utf8(&buf) else {
            warn!("invalid UTF-8 in input line, skipping");
            continue;
        };

        match parse_line(text) {
            Ok(None) => {}
            Ok(Some(FeedItem::Wait(pause))) => {
                trace!(?pause, "feed pause");
                tokio::select! {
                    () = cancel.cancelled() => return Ok(()),
                    () = tokio::time::sleep(pause) => {}
                }
            }
            Ok(Some(FeedItem::Signal(signal))) => {
                if tx.send(signal).is_err() {
                    debug!("signal receiver dropped, stopping input feed");
                    return Ok(());
                }
            }
            Err(e) => {
                warn!(error = %e, line = %sanitize_for_log(text, 200), "skipping input line");
            }
        }
    }
}

/// Reads one line into `buf` without the newline, copying at most
/// `limit + 1` bytes.
///
/// Returns `None` at EOF and `Some(true)` if the line was longer than
/// `limit`; the remainder of an overlong line is consumed and discarded.
async fn read_bounded_line<R>(
    reader: &mut R,
    limit: usize,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<bool>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut overflowed = false;
    let mut saw_any = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            // A final line without '\n' still counts
            return Ok(saw_any.then_some(overflowed));
        }
        saw_any = true;

        let (chunk, found_newline) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (&available[..pos], true),
            None => (available, false),
        };
        if !overflowed {
            let room = (limit + 1).saturating_sub(buf.len());
            let take = chunk.len().min(room);
            buf.extend_from_slice(&chunk[..take]);
            overflowed = buf.len() > limit;
        }
        let consumed = chunk.len() + usize::from(found_newline);
        reader.consume(consumed);
        if found_newline {
            return Ok(Some(overflowed));
        }
    }
}

/// Truncates and strips control characters from untrusted input before logging.
fn sanitize_for_log(input: &str, max_len: usize) -> String {
    input
        .chars()
        .take(max_len)
        .map(|c| if c.is_control() && c != '\t' { '\u{FFFD}' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;
    use tokio::sync::mpsc;

    #[test]
    fn test_parse_key_lines() {
        assert_eq!(
            parse_line(r#"{"type":"key_down","key":"f"}"#).unwrap(),
            Some(FeedItem::Signal(TrialSignal::Input(RawInput::KeyDown {
                key: "f".into(),
                repeat: false,
            })))
        );
        assert_eq!(
            parse_line(r#"{"type":"key_up","key":"space"}"#).unwrap(),
            Some(FeedItem::Signal(TrialSignal::Input(RawInput::KeyUp { key: "space".into() })))
        );
    }

    #[test]
    fn test_parse_control_lines() {
        assert_eq!(parse_line(r#"{"type":"skip"}"#).unwrap(), Some(FeedItem::Signal(TrialSignal::Skip)));
        assert_eq!(parse_line(r#"{"type":"end"}"#).unwrap(), Some(FeedItem::Signal(TrialSignal::End)));
        assert_eq!(
            parse_line(r#"{"type":"wait","ms":250}"#).unwrap(),
            Some(FeedItem::Wait(Duration::from_millis(250)))
        );
    }

    #[test]
    fn test_parse_values() {
        let Some(FeedItem::Signal(TrialSignal::Input(RawInput::Submit { value }))) =
            parse_line(r#"{"type":"submit","value":{"age":31}}"#).unwrap()
        else {
            panic!("expected submit");
        };
        assert_eq!(value, json!({"age": 31}));
    }

    #[test]
    fn test_blank_and_malformed() {
        assert_eq!(parse_line("   ").unwrap(), None);
        assert!(matches!(parse_line("{not json"), Err(InputError::Malformed(_))));
        assert!(matches!(parse_line(r#"{"type":"teleport"}"#), Err(InputError::Malformed(_))));
        assert!(matches!(
            parse_line(r#"{"type":"key_down","key":"f","extra":1}"#),
            Err(InputError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_pump_skips_bad_lines_and_stops_on_cancel() {
        let feed = "{\"type\":\"key_down\",\"key\":\"f\"}\n\nnope\n{\"type\":\"end\"}";
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(pump(BufReader::new(feed.as_bytes()), tx, MAX_LINE, cancel.clone()));

        assert!(matches!(rx.recv().await, Some(TrialSignal::Input(RawInput::KeyDown { .. }))));
        assert_eq!(rx.recv().await, Some(TrialSignal::End));
        // Held open at EOF
        assert!(!rx.is_closed());

        cancel.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_pump_skips_oversized_line() {
        let long = format!("{{\"type\":\"key_down\",\"key\":\"{}\"}}\n", "x".repeat(200));
        let feed = format!("{long}{{\"type\":\"skip\"}}\n");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(pump(BufReader::new(std::io::Cursor::new(feed.into_bytes())), tx, 64, cancel.clone()));

        assert_eq!(rx.recv().await, Some(TrialSignal::Skip));
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_pump_wait_spaces_signals() {
        let feed = "{\"type\":\"wait\",\"ms\":350}\n{\"type\":\"skip\"}\n";
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let start = tokio::time::Instant::now();
        tokio::spawn(pump(BufReader::new(feed.as_bytes()), tx, MAX_LINE, cancel.clone()));

        assert_eq!(rx.recv().await, Some(TrialSignal::Skip));
        assert!(tokio::time::Instant::now() - start >= Duration::from_millis(350));
        cancel.cancel();
    }
}

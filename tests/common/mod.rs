//! Shared integration-test harness: fixture paths, a runner for the
//! `trialkit` binary, a scripted in-process transport and a local HTTP
//! result store.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{patch, post};
use serde_json::Value;

use trialkit::error::SubmissionError;
use trialkit::submission::{SubmissionRequest, SubmissionTransport};

/// Returns the path to a test fixture.
#[must_use]
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Runs the binary to completion with `stdin` piped in.
#[allow(clippy::missing_panics_doc)]
pub fn run_cli(args: &[&str], stdin: &str, envs: &[(&str, &str)]) -> Output {
    let bin = env!("CARGO_BIN_EXE_trialkit");
    let mut child = Command::new(bin)
        .args(args)
        .envs(envs.iter().copied())
        .env_remove("TRIALKIT_LOG_LEVEL")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("failed to spawn trialkit");

    child
        .stdin
        .take()
        .expect("stdin not captured")
        .write_all(stdin.as_bytes())
        .expect("failed to write stdin");
    child.wait_with_output().expect("failed to wait for trialkit")
}

/// Transport that replays a fixed list of attempt results, then succeeds.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<(), SubmissionError>>>,
    calls: AtomicU32,
    seen: Mutex<Vec<SubmissionRequest>>,
}

impl ScriptedTransport {
    /// Fails the first `n` attempts with HTTP 503.
    #[must_use]
    pub fn failing(n: usize) -> Self {
        let script = (0..n).map(|_| Err(SubmissionError::HttpStatus(503))).collect();
        Self {
            script: Mutex::new(script),
            ..Self::default()
        }
    }

    /// Number of attempts made so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far.
    pub fn seen(&self) -> Vec<SubmissionRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubmissionTransport for ScriptedTransport {
    async fn send(&self, request: &SubmissionRequest) -> Result<(), SubmissionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.clone());
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }
}

/// What the mock store has received.
#[derive(Debug, Default)]
pub struct StoreLog {
    /// Bodies posted to `/data`
    pub data: Mutex<Vec<Value>>,
    /// Bodies patched to `/participants`
    pub status: Mutex<Vec<Value>>,
    /// Requests still to be answered with 503
    pub fail_next: AtomicU32,
}

/// A local result store on an ephemeral port.
pub struct MockStore {
    /// Base URL, e.g. `http://127.0.0.1:PORT`
    pub base_url: String,
    /// Received requests
    pub log: Arc<StoreLog>,
}

impl MockStore {
    /// Binds and serves the store in the background.
    #[allow(clippy::missing_panics_doc)]
    pub async fn start(fail_first: u32) -> Self {
        let log = Arc::new(StoreLog {
            fail_next: AtomicU32::new(fail_first),
            ..StoreLog::default()
        });
        let app = Router::new()
            .route("/data", post(save_data))
            .route("/participants", patch(save_status))
            .with_state(Arc::clone(&log));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind mock store");
        let addr: SocketAddr = listener.local_addr().expect("no local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base_url: format!("http://{addr}"),
            log,
        }
    }

    /// Number of `/data` bodies accepted.
    pub fn data_count(&self) -> usize {
        self.log.data.lock().unwrap().len()
    }
}

fn should_fail(log: &StoreLog) -> bool {
    log.fail_next
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

async fn save_data(State(log): State<Arc<StoreLog>>, Json(body): Json<Value>) -> StatusCode {
    if should_fail(&log) {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    log.data.lock().unwrap().push(body);
    StatusCode::CREATED
}

async fn save_status(State(log): State<Arc<StoreLog>>, Json(body): Json<Value>) -> StatusCode {
    if should_fail(&log) {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    log.status.lock().unwrap().push(body);
    StatusCode::OK
}

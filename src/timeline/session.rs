//! Session record and participant identity.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::trial::outcome::TrialOutcome;

/// Recruitment platform the participant arrived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Prolific
    Prolific,
    /// Amazon Mechanical Turk
    Turk,
    /// `CloudResearch` Connect
    Connect,
}

impl Platform {
    /// URL parameters carrying (worker, study, assignment) ids.
    #[must_use]
    pub const fn params(self) -> (&'static str, &'static str, &'static str) {
        match self {
            Self::Prolific => ("PROLIFIC_PID", "STUDY_ID", "SESSION_ID"),
            Self::Turk => ("workerId", "hitId", "assignmentId"),
            Self::Connect => ("participantId", "projectId", "assignmentId"),
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Prolific => "prolific",
            Self::Turk => "turk",
            Self::Connect => "connect",
        };
        f.write_str(s)
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "prolific" => Ok(Self::Prolific),
            "turk" | "mturk" => Ok(Self::Turk),
            "connect" => Ok(Self::Connect),
            other => Err(format!("unknown platform '{other}' (expected prolific, turk or connect)")),
        }
    }
}

/// Who is taking part.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantIdentity {
    /// Participant identifier
    pub worker_id: String,
    /// Study / HIT / project identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_id: Option<String>,
    /// Assignment / session identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignment_id: Option<String>,
    /// Recruitment platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
}

impl ParticipantIdentity {
    /// Identity for a local run that is not tied to any platform.
    #[must_use]
    pub fn debug() -> Self {
        Self {
            worker_id: format!("debug-{}", Uuid::new_v4().simple()),
            ..Self::default()
        }
    }

    /// Reads an identity from recruitment URL parameters.
    ///
    /// The platform is the first whose worker parameter is present,
    /// checked in the order Prolific, Turk, Connect.
    pub fn from_params<'a, I>(params: I) -> Option<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let params: Vec<(&str, &str)> = params.into_iter().collect();
        let get = |name: &str| {
            params
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| (*v).to_string())
                .filter(|v| !v.is_empty())
        };

        [Platform::Prolific, Platform::Turk, Platform::Connect]
            .into_iter()
            .find_map(|platform| {
                let (worker, hit, assignment) = platform.params();
                get(worker).map(|worker_id| Self {
                    worker_id,
                    hit_id: get(hit),
                    assignment_id: get(assignment),
                    platform: Some(platform),
                })
            })
    }

    /// Reads an identity from a URL query string (`?a=1&b=2` or `a=1&b=2`).
    #[must_use]
    pub fn from_query(query: &str) -> Option<Self> {
        let query = query.trim_start_matches('?');
        let url = reqwest::Url::parse(&format!("http://localhost/?{query}")).ok()?;
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        Self::from_params(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

/// Ordered trial outcomes plus session-level fields.
///
/// Grows by one outcome per completed trial and is handed to the
/// submission pipeline once, after [`SessionRecord::finish`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Unique id of this run
    pub session_id: Uuid,
    /// Experiment name
    pub experiment_name: String,
    /// Participant
    pub identity: ParticipantIdentity,
    /// Assigned condition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Restarts seen for this participant before this run
    #[serde(default)]
    pub refresh_count: u32,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Wall-clock end, set by `finish`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// The session was ended before its last trial
    #[serde(default)]
    pub ended_early: bool,
    /// Completed trials, in order
    pub trials: Vec<TrialOutcome>,
}

impl SessionRecord {
    /// Starts an empty record.
    #[must_use]
    pub fn new(experiment_name: impl Into<String>, identity: ParticipantIdentity) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            experiment_name: experiment_name.into(),
            identity,
            condition: None,
            refresh_count: 0,
            started_at: Utc::now(),
            ended_at: None,
            ended_early: false,
            trials: Vec::new(),
        }
    }

    /// Appends a completed trial.
    pub fn push(&mut self, outcome: TrialOutcome) {
        self.trials.push(outcome);
    }

    /// Number of completed trials.
    #[must_use]
    pub fn trial_count(&self) -> usize {
        self.trials.len()
    }

    /// Stamps the end time and hands the record on.
    #[must_use]
    pub fn finish(mut self) -> Self {
        self.ended_at = Some(Utc::now());
        self
    }
}

/// Generates a completion code: `NNNNNNNNNN-prefix-NNNNNNNNNN-suffix`.
pub fn generate_completion_code<R: Rng + ?Sized>(prefix: &str, suffix: &str, rng: &mut R) -> String {
    fn digits<R: Rng + ?Sized>(rng: &mut R) -> String {
        (0..10)
            .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
            .collect()
    }
    let head = digits(rng);
    let tail = digits(rng);
    format!("{head}-{prefix}-{tail}-{suffix}")
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Opaque ID types for type safety
pub type PollId = String;
pub type ConnectionId = String;

/// Network-level source of a voter after proxy-header normalization
pub type OriginAddress = String;

/// Opaque client-derived token, an untrusted secondary identity signal
pub type Fingerprint = String;

/// Decimal places used for every derived percentage
pub const PERCENTAGE_PRECISION: i32 = 2;

/// Which identity signal caught a repeat voter
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateSignal {
    Origin,
    Fingerprint,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    pub text: String,
    pub votes: u64,
}

/// The persisted poll aggregate.
///
/// Only `PollStore::record_vote` mutates a stored poll, and it keeps
/// `total_votes` equal to the sum of the option counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: PollId,
    pub question: String,
    pub options: Vec<PollOption>,
    pub total_votes: u64,
    #[serde(default)]
    pub voted_origins: HashSet<OriginAddress>,
    #[serde(default)]
    pub voted_fingerprints: HashSet<Fingerprint>,
    #[serde(default = "default_created_by")]
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every committed vote
    #[serde(default)]
    pub version: u64,
}

fn default_created_by() -> String {
    "Anonymous".to_string()
}

impl Poll {
    /// Build a fresh poll with zeroed counters
    pub fn new(question: String, options: Vec<String>, created_by: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string(),
            question,
            options: options
                .into_iter()
                .map(|text| PollOption { text, votes: 0 })
                .collect(),
            total_votes: 0,
            voted_origins: HashSet::new(),
            voted_fingerprints: HashSet::new(),
            created_by: created_by.unwrap_or_else(default_created_by),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    pub fn has_voted_by_origin(&self, origin: &str) -> bool {
        self.voted_origins.contains(origin)
    }

    pub fn has_voted_by_fingerprint(&self, fingerprint: &str) -> bool {
        self.voted_fingerprints.contains(fingerprint)
    }

    /// First identity signal that has already voted, origin checked first
    pub fn duplicate_signal(
        &self,
        origin: &str,
        fingerprint: Option<&str>,
    ) -> Option<DuplicateSignal> {
        if self.has_voted_by_origin(origin) {
            return Some(DuplicateSignal::Origin);
        }
        match fingerprint {
            Some(fp) if self.has_voted_by_fingerprint(fp) => Some(DuplicateSignal::Fingerprint),
            _ => None,
        }
    }

    /// Sum of the per-option counters
    pub fn tallied_votes(&self) -> u64 {
        self.options.iter().map(|o| o.votes).sum()
    }
}

/// Per-option result with its derived percentage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OptionResult {
    pub text: String,
    pub votes: u64,
    pub percentage: f64,
}

/// Point-in-time read of a poll's counts, total and percentages.
///
/// This is the payload of both the room `update` broadcast and the private
/// `vote-success` ack, so every consumer sees the same rounded numbers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PollSnapshot {
    pub poll_id: PollId,
    pub options: Vec<PollOption>,
    pub total_votes: u64,
    pub results: Vec<OptionResult>,
}

impl PollSnapshot {
    pub fn from_poll(poll: &Poll) -> Self {
        let results = poll
            .options
            .iter()
            .map(|o| OptionResult {
                text: o.text.clone(),
                votes: o.votes,
                percentage: percentage(o.votes, poll.total_votes),
            })
            .collect();

        Self {
            poll_id: poll.id.clone(),
            options: poll.options.clone(),
            total_votes: poll.total_votes,
            results,
        }
    }
}

/// `votes / total * 100`, rounded to `PERCENTAGE_PRECISION` places; 0 when nobody voted
pub fn percentage(votes: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let scale = 10f64.powi(PERCENTAGE_PRECISION);
    (votes as f64 / total as f64 * 100.0 * scale).round() / scale
}

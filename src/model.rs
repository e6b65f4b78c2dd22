use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::errors::FileError;

/// A backup archive listed from Drive, immutable for the rest of the run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateFile {
    pub id: String,
    pub name: String,
    /// RFC 3339 text as returned by Drive.
    #[serde(default)]
    pub created_time: String,
    #[serde(default, deserialize_with = "size_from_decimal_string")]
    pub size: u64,
    #[serde(default)]
    pub parents: Vec<String>,
}

impl CandidateFile {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.created_time)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parents.first().map(String::as_str)
    }
}

// Drive encodes int64 fields as JSON strings.
fn size_from_decimal_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(0),
        Some(Raw::Number(n)) => Ok(n),
        Some(Raw::Text(s)) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// What happened to one candidate file. Exactly one per file per run.
#[derive(Debug)]
pub enum ProcessingOutcome {
    Processed,
    SkippedTooSmall,
    /// Source left in place; the next run retries it.
    FailedTransient(FileError),
    /// Archive judged unrecoverable; source cleaned up and recorded.
    FailedPermanent(FileError),
}

impl ProcessingOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ProcessingOutcome::Processed => "processed",
            ProcessingOutcome::SkippedTooSmall => "skipped_too_small",
            ProcessingOutcome::FailedTransient(_) => "failed_transient",
            ProcessingOutcome::FailedPermanent(_) => "failed_permanent",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub listed: usize,
    pub processed: usize,
    pub skipped_too_small: usize,
    pub failed_transient: usize,
    pub failed_permanent: usize,
}

impl BatchSummary {
    pub fn record(&mut self, outcome: &ProcessingOutcome) {
        match outcome {
            ProcessingOutcome::Processed => self.processed += 1,
            ProcessingOutcome::SkippedTooSmall => self.skipped_too_small += 1,
            ProcessingOutcome::FailedTransient(_) => self.failed_transient += 1,
            ProcessingOutcome::FailedPermanent(_) => self.failed_permanent += 1,
        }
    }
}

//! Domain types shared across crates: document and chunk identity, batch
//! status, and classification results.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Identity of one annual report: a company and a fiscal year.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId {
    pub company: String,
    pub year: u16,
}

impl DocumentId {
    pub fn new(company: impl Into<String>, year: u16) -> Self {
        Self {
            company: company.into(),
            year,
        }
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.company, self.year)
    }
}

/// Sentence index within a document.
///
/// The textual form is the canonical decimal string: no sign, no leading
/// zeros. Parsing rejects anything else so that text ↔ id stays one-to-one.
/// Parsed ids never exceed [`ChunkId::MAX`], the largest SQLite integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(pub u64);

impl ChunkId {
    pub const MAX: u64 = i64::MAX as u64;

    pub fn get(self) -> u64 {
        self.0
    }

    fn checked(v: u64) -> Result<Self, Error> {
        if v > Self::MAX {
            return Err(Error::InvalidInput(format!("chunk id {} out of range", v)));
        }
        Ok(ChunkId(v))
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChunkId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let canonical = !s.is_empty()
            && s.bytes().all(|b| b.is_ascii_digit())
            && (s == "0" || !s.starts_with('0'));
        if !canonical {
            return Err(Error::InvalidInput(format!("not a chunk id: {:?}", s)));
        }
        let v = s
            .parse::<u64>()
            .map_err(|e| Error::InvalidInput(format!("chunk id {:?}: {}", s, e)))?;
        ChunkId::checked(v)
    }
}

impl From<u64> for ChunkId {
    fn from(v: u64) -> Self {
        ChunkId(v)
    }
}

impl Serialize for ChunkId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChunkId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Accept both "12" and 12: score tables and older files disagree.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Raw::Number(n) => ChunkId::checked(n).map_err(serde::de::Error::custom),
        }
    }
}

/// Provider-side batch lifecycle.
///
/// `Created` is local only: the chunk is recorded but the provider has not
/// acknowledged a batch for it yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Created,
    Validating,
    InProgress,
    Finalizing,
    Cancelling,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Expired
        )
    }

    /// Known to the provider and not yet finished.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            Self::Validating | Self::InProgress | Self::Finalizing | Self::Cancelling
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Validating => "validating",
            Self::InProgress => "in_progress",
            Self::Finalizing => "finalizing",
            Self::Cancelling => "cancelling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "created" => Self::Created,
            "validating" => Self::Validating,
            "in_progress" => Self::InProgress,
            "finalizing" => Self::Finalizing,
            "cancelling" => Self::Cancelling,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" => Self::Cancelled,
            "expired" => Self::Expired,
            other => return Err(Error::InvalidInput(format!("unknown batch status: {}", other))),
        })
    }
}

/// Sentiment label returned by the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sentiment {
    Positive,
    Negative,
}

impl Sentiment {
    /// Lenient mapping used on model output: anything containing "pos" or
    /// "neg" (case-insensitive).
    pub fn normalize(raw: &str) -> Option<Self> {
        let t = raw.trim().to_lowercase();
        if t.contains("pos") {
            Some(Self::Positive)
        } else if t.contains("neg") {
            Some(Self::Negative)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "Positive",
            Self::Negative => "Negative",
        }
    }
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured answer extracted from a model response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedLabels {
    /// Distinct SDG labels (0..=17) in first-seen order. `0` means "no SDG".
    pub sdg_labels: Vec<u8>,
    /// The SDG part of the answer was empty or held values outside 0..=17.
    pub sdg_malformed: bool,
    pub ai_related: bool,
    pub sentiment: Sentiment,
}

/// How a single request ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Parsed,
    ParseFailure,
    RequestFailed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parsed => "parsed",
            Self::ParseFailure => "parse_failure",
            Self::RequestFailed => "request_failed",
        }
    }
}

impl FromStr for Outcome {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parsed" => Ok(Self::Parsed),
            "parse_failure" => Ok(Self::ParseFailure),
            "request_failed" => Ok(Self::RequestFailed),
            other => Err(Error::InvalidInput(format!("unknown outcome: {}", other))),
        }
    }
}

/// One classified sentence, keyed by `(document, chunk_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub document: DocumentId,
    pub chunk_id: ChunkId,
    pub custom_id: String,
    pub batch_id: String,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<ParsedLabels>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    /// RFC 3339 timestamp of the merge that wrote this row.
    pub updated_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_canonical_parse() {
        assert_eq!("0".parse::<ChunkId>().unwrap(), ChunkId(0));
        assert_eq!("42".parse::<ChunkId>().unwrap(), ChunkId(42));
        assert!("042".parse::<ChunkId>().is_err());
        assert!("-1".parse::<ChunkId>().is_err());
        assert!("+3".parse::<ChunkId>().is_err());
        assert!("".parse::<ChunkId>().is_err());
        assert!("1.0".parse::<ChunkId>().is_err());
    }

    #[test]
    fn test_chunk_id_range() {
        let max = ChunkId::MAX.to_string();
        assert_eq!(max.parse::<ChunkId>().unwrap(), ChunkId(ChunkId::MAX));
        assert!((ChunkId::MAX + 1).to_string().parse::<ChunkId>().is_err());
        assert!(u64::MAX.to_string().parse::<ChunkId>().is_err());
        assert!(serde_json::from_str::<ChunkId>(&u64::MAX.to_string()).is_err());
    }

    #[test]
    fn test_chunk_id_serde_accepts_numbers_and_strings() {
        let a: ChunkId = serde_json::from_str("\"7\"").unwrap();
        let b: ChunkId = serde_json::from_str("7").unwrap();
        assert_eq!(a, b);
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"7\"");
    }

    #[test]
    fn test_batch_status_sets() {
        for s in [
            BatchStatus::Completed,
            BatchStatus::Failed,
            BatchStatus::Cancelled,
            BatchStatus::Expired,
        ] {
            assert!(s.is_terminal());
            assert!(!s.is_running());
        }
        for s in [
            BatchStatus::Validating,
            BatchStatus::InProgress,
            BatchStatus::Finalizing,
            BatchStatus::Cancelling,
        ] {
            assert!(s.is_running());
            assert!(!s.is_terminal());
        }
        assert!(!BatchStatus::Created.is_running());
        assert_eq!("in_progress".parse::<BatchStatus>().unwrap(), BatchStatus::InProgress);
    }

    #[test]
    fn test_sentiment_normalize() {
        assert_eq!(Sentiment::normalize(" positive"), Some(Sentiment::Positive));
        assert_eq!(Sentiment::normalize("NEGATIVE."), Some(Sentiment::Negative));
        assert_eq!(Sentiment::normalize("neutral"), None);
    }
}

//! Domain identifiers.
//!
//! Job ids are produced by the submission layer (usually a relational
//! primary key) and are opaque here: the queue never parses them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a job inside a queue.
///
/// The wrapped string is compared byte-for-byte; `"07"` and `"7"` are
/// different jobs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&String> for JobId {
    fn from(s: &String) -> Self {
        Self(s.clone())
    }
}

impl From<u64> for JobId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_ids_render_as_decimal_strings() {
        assert_eq!(JobId::from(42u64).as_str(), "42");
        assert_eq!(JobId::from(0u64), JobId::from("0"));
    }

    #[test]
    fn job_id_serializes_as_plain_string() {
        let id = JobId::new("1234");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"1234\"");
        let back: JobId = serde_json::from_str("\"1234\"").unwrap();
        assert_eq!(back, id);
    }
}

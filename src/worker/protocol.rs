//! IPC protocol between the coordinator and its workers.
//!
//! Messages are JSON-serialized and newline-delimited.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request from coordinator to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkRequest {
    /// Translate one job.
    #[serde(rename = "translate")]
    Translate {
        /// Task id assigned by the coordinator
        id: u64,
        /// Text to translate
        text: String,
    },

    /// Stop the worker loop and exit.
    #[serde(rename = "stop")]
    Stop,
}

/// Response from worker to coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkResponse {
    /// Worker is pinned and polling for work.
    #[serde(rename = "ready")]
    Ready {
        /// Worker process id
        pid: u32,
        /// Core the worker is pinned to
        core: usize,
    },

    /// A finished job. `result` is `None` when the translator failed.
    #[serde(rename = "result")]
    Result {
        id: u64,
        result: Option<String>,
        finished_at: DateTime<Utc>,
    },
}

/// Outcome of a non-blocking receive.
#[derive(Debug, Clone, PartialEq)]
pub enum Recv<T> {
    /// A message was waiting.
    Message(T),
    /// Nothing to read right now.
    Empty,
    /// The peer closed its end.
    Closed,
}

impl WorkRequest {
    /// Create a translation request.
    pub fn translate(id: u64, text: impl Into<String>) -> Self {
        Self::Translate {
            id,
            text: text.into(),
        }
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from JSON line.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

impl WorkResponse {
    /// Create a result stamped with the current time.
    pub fn result(id: u64, result: Option<String>) -> Self {
        Self::Result {
            id,
            result,
            finished_at: Utc::now(),
        }
    }

    /// Serialize to JSON line (with newline).
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize from JSON line.
    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_request_serialization() {
        let req = WorkRequest::translate(7, "Guten Morgen");
        let line = req.to_line().unwrap();
        assert!(line.ends_with('\n'));
        assert!(line.contains("\"type\":\"translate\""));

        match WorkRequest::from_line(&line).unwrap() {
            WorkRequest::Translate { id, text } => {
                assert_eq!(id, 7);
                assert_eq!(text, "Guten Morgen");
            }
            other => panic!("Expected Translate variant, got {:?}", other),
        }
    }

    #[test]
    fn test_stop_request() {
        let line = WorkRequest::Stop.to_line().unwrap();
        assert_eq!(WorkRequest::from_line(&line).unwrap(), WorkRequest::Stop);
    }

    #[test]
    fn test_text_with_newlines_stays_on_one_line() {
        let line = WorkRequest::translate(1, "Zeile eins\nZeile zwei").to_line().unwrap();
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn test_failed_result_has_no_text() {
        let line = WorkResponse::result(3, None).to_line().unwrap();
        match WorkResponse::from_line(&line).unwrap() {
            WorkResponse::Result { id, result, .. } => {
                assert_eq!(id, 3);
                assert!(result.is_none());
            }
            other => panic!("Expected Result variant, got {:?}", other),
        }
    }

    #[test]
    fn test_ready_response() {
        let line = WorkResponse::Ready { pid: 99, core: 2 }.to_line().unwrap();
        assert_eq!(
            WorkResponse::from_line(&line).unwrap(),
            WorkResponse::Ready { pid: 99, core: 2 }
        );
    }

    #[test]
    fn test_rejects_unknown_type() {
        assert!(WorkResponse::from_line(r#"{"type":"restart"}"#).is_err());
        assert!(WorkRequest::from_line("STOP").is_err());
    }
}

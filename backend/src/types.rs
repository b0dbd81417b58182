use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Result of uploading one document: the session the backend opened plus the
/// untouched response payload, kept for run artifacts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadOutcome {
    pub session_id: String,
    pub raw: Value,
}

/// One ask round-trip: the request body that was sent and the raw response.
///
/// Both sides stay as JSON values so callers can persist them verbatim; the
/// typed accessors below extract the fields the evaluator needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AskExchange {
    pub request: Value,
    pub response: Value,
}

impl AskExchange {
    /// The backend's answer. A missing or non-string `answer` field is an
    /// empty string, never an error.
    pub fn answer(&self) -> String {
        match self.response.get("answer") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    /// Retrieval chunks coerced to strings, in backend order. String chunks
    /// are taken verbatim; anything else is rendered as compact JSON.
    pub fn retrieval_context(&self) -> Vec<String> {
        match self.response.get("retrieval_context") {
            Some(Value::Array(chunks)) => chunks.iter().map(coerce_chunk).collect(),
            _ => Vec::new(),
        }
    }
}

fn coerce_chunk(chunk: &Value) -> String {
    match chunk {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

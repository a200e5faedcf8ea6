use serde::{Deserialize, Serialize};
use serde_json::Value;

// Inbound create request, POST /
// Fields are optional so that missing ones map to 400 instead of a json rejection
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub job_id: Option<String>,
    pub payload: Option<Value>,
}

// Inbound edit request, PATCH /edit
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    pub job_id: Option<String>,
    pub message_id: Option<String>,
    pub payload: Option<Value>,
}

// Response to a successful create
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateResponse {
    pub message_id: String,
}

// Identifier assigned by the downstream API
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    // Downstream ids may arrive as strings or bare numbers
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            Value::Number(n) => Some(Self(n.to_string())),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One journaled call: the operation name, the request type tag and the request fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub method: String,
    pub request_type: String,
    pub request_data: Value,
}

impl JournalEntry {
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        request_type: impl Into<String>,
        request_data: Value,
    ) -> Self {
        Self {
            method: method.into(),
            request_type: request_type.into(),
            request_data,
        }
    }
}

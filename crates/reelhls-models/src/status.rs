//! Terminal status callback payload.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::job::CorrelationId;

/// Terminal outcome reported to the system of record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CallbackStatus {
    Done,
    Failed,
}

impl CallbackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackStatus::Done => "done",
            CallbackStatus::Failed => "failed",
        }
    }
}

/// Body of the status callback POST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub correlation_id: CorrelationId,
    pub status: CallbackStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusUpdate {
    pub fn done(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            status: CallbackStatus::Done,
            error: None,
        }
    }

    pub fn failed(correlation_id: CorrelationId, error: impl Into<String>) -> Self {
        Self {
            correlation_id,
            status: CallbackStatus::Failed,
            error: Some(error.into()),
        }
    }
}

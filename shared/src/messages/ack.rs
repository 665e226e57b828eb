//! Per-item acknowledgment record, sent from the viewer host back toward
//! the producer.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckMessage {
    pub status: AckStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
}

impl AckMessage {
    pub fn ok(item_id: impl Into<String>) -> Self {
        AckMessage {
            status: AckStatus::Ok,
            reason: None,
            item_id: Some(item_id.into()),
        }
    }

    pub fn error(item_id: impl Into<String>, reason: impl Into<String>) -> Self {
        AckMessage {
            status: AckStatus::Error,
            reason: Some(reason.into()),
            item_id: Some(item_id.into()),
        }
    }
}

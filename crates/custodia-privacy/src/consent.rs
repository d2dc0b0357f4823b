//! Consent prompts.
//!
//! The governor asks a [`ConsentPrompt`] a single yes/no question and bounds
//! the wait with a timeout. An unanswered prompt counts as denied.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The question put to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRequest {
    pub data_type: String,
    pub purpose: String,
}

impl ConsentRequest {
    /// Human-readable prompt text.
    pub fn message(&self) -> String {
        format!(
            "Allow processing of your {} data for {}?",
            self.data_type, self.purpose
        )
    }
}

/// How a consent request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentOutcome {
    Granted,
    Denied,
    TimedOut,
}

impl ConsentOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }
}

/// One recorded consent decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRecord {
    pub data_type: String,
    pub purpose: String,
    pub outcome: ConsentOutcome,
    pub decided_at: DateTime<Utc>,
}

/// A yes/no prompt shown to the user.
///
/// Implementations may block for as long as the user takes; the governor
/// applies the timeout.
#[async_trait]
pub trait ConsentPrompt: Send + Sync {
    async fn ask(&self, request: &ConsentRequest) -> bool;
}

/// Prompt that refuses everything. Used when no UI is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAllPrompt;

#[async_trait]
impl ConsentPrompt for DenyAllPrompt {
    async fn ask(&self, request: &ConsentRequest) -> bool {
        tracing::debug!(data_type = %request.data_type, "no consent UI attached; denying");
        false
    }
}

pub mod ledger;
pub mod pipeline;
pub mod pricing;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::AuthorizationKey;

pub use self::ledger::spend_in_range;
pub use self::pipeline::{SpendFlusher, SpendQueue, spend_channel};
pub use self::pricing::{PriceTable, TokenPrice};

/// Token counts reported by an upstream completion. Prompt and completion
/// counts are required; `total_tokens` is derived when absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// One billing line for a completed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendRecord {
    /// Upstream completion id.
    pub request_id: String,
    /// Digest of the key that paid for the request.
    pub key_hash: String,
    pub user_id: String,
    pub organization_id: String,
    pub model_group: String,
    pub spend: f64,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum SpendError {
    #[error("Malformed upstream response: {0}")]
    MalformedUpstreamResponse(String),

    #[error("No price configured for model group '{0}'")]
    UnknownPrice(String),
}

/// The parts of an OpenAI-style completion body that billing needs.
#[derive(Debug, Deserialize)]
struct CompletionSummary {
    id: String,
    usage: TokenUsage,
}

impl SpendRecord {
    /// Derive the billing line for a successful upstream response body.
    pub fn from_completion(
        body: &[u8],
        key: &AuthorizationKey,
        model_group: &str,
        prices: &PriceTable,
    ) -> Result<Self, SpendError> {
        let summary: CompletionSummary = serde_json::from_slice(body)
            .map_err(|e| SpendError::MalformedUpstreamResponse(e.to_string()))?;
        let spend = prices.cost(model_group, &summary.usage)?;

        let usage = summary.usage;
        let total_tokens = if usage.total_tokens == 0 {
            usage.prompt_tokens.saturating_add(usage.completion_tokens)
        } else {
            usage.total_tokens
        };

        Ok(Self {
            request_id: summary.id,
            key_hash: key.key_hash.clone(),
            user_id: key.user_id.clone(),
            organization_id: key.organization_id.clone(),
            model_group: model_group.to_string(),
            spend,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens,
            created_at: Utc::now(),
        })
    }
}

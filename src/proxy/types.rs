use serde::{Deserialize, Serialize};

/// Inbound chat-completion request, OpenAI shape.
///
/// Sampling fields that the caller omits are filled with gateway defaults
/// and forwarded explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Model-group name on the way in; backend model name on the way out.
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_do_sample")]
    pub do_sample: bool,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: MessageContent,
}

/// Plain text or a list of typed content parts (images, audio, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<serde_json::Value>),
}

const fn default_do_sample() -> bool {
    true
}

const fn default_temperature() -> f64 {
    0.7
}

const fn default_top_p() -> f64 {
    1.0
}

const fn default_max_tokens() -> u32 {
    4096
}

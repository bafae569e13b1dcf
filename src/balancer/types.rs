use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One upstream model endpoint inside a model group.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Concrete upstream model name. Replaces the `model` field of every
    /// request routed to this backend.
    pub name: String,
    /// Free-form backend kind label (`openai`, `claude`, `local`, ...).
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    pub base_url: String,
    /// Credential sent as `Authorization: Bearer ...`. Empty means the
    /// caller's own `Authorization` header is forwarded untouched.
    #[serde(default)]
    pub api_key: String,
    /// Load-balancing weight, only consulted by the weighted strategy.
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
}

impl BackendConfig {
    /// Build a backend with default kind, weight 1 and no credential.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: default_kind(),
            base_url: base_url.into(),
            api_key: String::new(),
            weight: default_weight(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }
}

/// Selection algorithm used by one model group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum StrategyKind {
    #[default]
    #[serde(rename = "round-robin", alias = "round_robin")]
    RoundRobin,
    #[serde(rename = "weighted")]
    Weighted,
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RoundRobin => write!(f, "round-robin"),
            Self::Weighted => write!(f, "weighted"),
        }
    }
}

impl FromStr for StrategyKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "round-robin" | "roundrobin" => Ok(Self::RoundRobin),
            "weighted" => Ok(Self::Weighted),
            _ => Err(format!("Unknown balancing strategy: {s}")),
        }
    }
}

/// A caller-visible model alias and the backends that serve it.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ModelGroup {
    pub name: String,
    #[serde(default)]
    pub strategy: StrategyKind,
    #[serde(default)]
    pub models: Vec<BackendConfig>,
    /// Price per prompt token.
    #[serde(default)]
    pub cost_per_input_token: f64,
    /// Price per completion token.
    #[serde(default)]
    pub cost_per_output_token: f64,
}

fn default_kind() -> String {
    "openai".to_string()
}

const fn default_weight() -> u32 {
    1
}

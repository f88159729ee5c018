//! Container environment for the text-generation serving image.
//!
//! The map built here is handed to the platform verbatim and becomes the
//! process environment of the served container, so keys and value
//! formatting must match what the container reads.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::{DeployError, Result};

pub const HF_MODEL_ID: &str = "HF_MODEL_ID";
pub const SM_NUM_GPUS: &str = "SM_NUM_GPUS";
pub const MAX_INPUT_LENGTH: &str = "MAX_INPUT_LENGTH";
pub const MAX_TOTAL_TOKENS: &str = "MAX_TOTAL_TOKENS";
pub const HF_MODEL_QUANTIZE: &str = "HF_MODEL_QUANTIZE";

/// Keys the serving container recognizes.
pub const RECOGNIZED_KEYS: [&str; 5] = [
    HF_MODEL_ID,
    SM_NUM_GPUS,
    MAX_INPUT_LENGTH,
    MAX_TOTAL_TOKENS,
    HF_MODEL_QUANTIZE,
];

/// Where the container unpacks an uploaded model archive.
pub const LOCAL_MODEL_DIR: &str = "/opt/ml/model";

/// Where the served container loads weights from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelSource {
    /// Container downloads the model from the hub at startup
    Hub(String),
    /// Container loads the uploaded archive from [`LOCAL_MODEL_DIR`]
    Archive,
}

impl ModelSource {
    fn model_id(&self) -> &str {
        match self {
            ModelSource::Hub(id) => id,
            ModelSource::Archive => LOCAL_MODEL_DIR,
        }
    }
}

/// Weight quantization applied by the serving container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Quantization {
    Bitsandbytes,
    BitsandbytesNf4,
    BitsandbytesFp4,
    Gptq,
    Awq,
    Eetq,
}

impl Quantization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quantization::Bitsandbytes => "bitsandbytes",
            Quantization::BitsandbytesNf4 => "bitsandbytes-nf4",
            Quantization::BitsandbytesFp4 => "bitsandbytes-fp4",
            Quantization::Gptq => "gptq",
            Quantization::Awq => "awq",
            Quantization::Eetq => "eetq",
        }
    }
}

impl std::fmt::Display for Quantization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quantization {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bitsandbytes" => Ok(Quantization::Bitsandbytes),
            "bitsandbytes-nf4" => Ok(Quantization::BitsandbytesNf4),
            "bitsandbytes-fp4" => Ok(Quantization::BitsandbytesFp4),
            "gptq" => Ok(Quantization::Gptq),
            "awq" => Ok(Quantization::Awq),
            "eetq" => Ok(Quantization::Eetq),
            other => Err(DeployError::InvalidConfig(format!(
                "unknown quantization '{other}'"
            ))),
        }
    }
}

/// Flat string map passed to the container as its environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentConfig(BTreeMap<String, String>);

impl DeploymentConfig {
    pub fn builder(source: ModelSource) -> DeploymentConfigBuilder {
        DeploymentConfigBuilder::new(source)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// GPU count carried in `SM_NUM_GPUS`.
    pub fn num_gpus(&self) -> Option<u32> {
        self.get(SM_NUM_GPUS)?.parse().ok()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn into_map(self) -> BTreeMap<String, String> {
        self.0
    }
}

/// Builder for [`DeploymentConfig`].
#[derive(Debug, Clone)]
pub struct DeploymentConfigBuilder {
    source: ModelSource,
    num_gpus: u32,
    max_input_length: u32,
    max_total_tokens: u32,
    quantize: Option<Quantization>,
}

impl DeploymentConfigBuilder {
    pub fn new(source: ModelSource) -> Self {
        DeploymentConfigBuilder {
            source,
            num_gpus: 1,
            max_input_length: 2048,
            max_total_tokens: 4096,
            quantize: None,
        }
    }

    /// Tensor-parallel degree (GPUs per replica)
    pub fn num_gpus(mut self, gpus: u32) -> Self {
        self.num_gpus = gpus;
        self
    }

    /// Maximum prompt length in tokens
    pub fn max_input_length(mut self, tokens: u32) -> Self {
        self.max_input_length = tokens;
        self
    }

    /// Maximum prompt + generated tokens
    pub fn max_total_tokens(mut self, tokens: u32) -> Self {
        self.max_total_tokens = tokens;
        self
    }

    pub fn quantize(mut self, quantize: Option<Quantization>) -> Self {
        self.quantize = quantize;
        self
    }

    /// Validate limits and emit the environment map.
    pub fn build(self) -> Result<DeploymentConfig> {
        if self.num_gpus == 0 {
            return Err(DeployError::InvalidConfig(
                "GPU count must be at least 1".to_string(),
            ));
        }
        if self.max_input_length == 0 {
            return Err(DeployError::InvalidConfig(
                "max input length must be positive".to_string(),
            ));
        }
        if self.max_input_length >= self.max_total_tokens {
            return Err(DeployError::InvalidConfig(format!(
                "max input length ({}) must be below max total tokens ({})",
                self.max_input_length, self.max_total_tokens
            )));
        }

        let mut env = BTreeMap::new();
        env.insert(HF_MODEL_ID.to_string(), self.source.model_id().to_string());
        env.insert(SM_NUM_GPUS.to_string(), self.num_gpus.to_string());
        env.insert(
            MAX_INPUT_LENGTH.to_string(),
            self.max_input_length.to_string(),
        );
        env.insert(
            MAX_TOTAL_TOKENS.to_string(),
            self.max_total_tokens.to_string(),
        );
        if let Some(q) = self.quantize {
            env.insert(HF_MODEL_QUANTIZE.to_string(), q.to_string());
        }

        Ok(DeploymentConfig(env))
    }
}

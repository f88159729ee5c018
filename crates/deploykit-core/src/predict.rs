//! Generation requests against a deployed endpoint.
//!
//! One synchronous request per prompt: no retries and no streaming.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::clients::{EndpointHandle, InferencePlatform};
use crate::error::{DeployError, Result};

/// Sampling parameters sent with each prompt. Unset fields are omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub do_sample: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_new_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        GenerationParameters {
            do_sample: Some(true),
            top_p: Some(0.9),
            temperature: Some(0.8),
            top_k: None,
            max_new_tokens: Some(512),
            repetition_penalty: Some(1.03),
            stop: vec!["</s>".to_string()],
        }
    }
}

impl GenerationParameters {
    /// Parameters with every field unset.
    pub fn empty() -> Self {
        GenerationParameters {
            do_sample: None,
            top_p: None,
            temperature: None,
            top_k: None,
            max_new_tokens: None,
            repetition_penalty: None,
            stop: Vec::new(),
        }
    }

    /// Greedy decoding with a token budget.
    pub fn greedy(max_new_tokens: u32) -> Self {
        GenerationParameters {
            do_sample: Some(false),
            max_new_tokens: Some(max_new_tokens),
            ..Self::empty()
        }
    }
}

#[derive(Serialize)]
struct GenerationRequest<'a> {
    inputs: &'a str,
    parameters: &'a GenerationParameters,
}

#[derive(Deserialize)]
struct GeneratedCandidate {
    generated_text: String,
}

/// Build the JSON request body for a prompt.
pub fn build_payload(prompt: &str, params: &GenerationParameters) -> Result<Value> {
    Ok(serde_json::to_value(GenerationRequest {
        inputs: prompt,
        parameters: params,
    })?)
}

/// Extract the first candidate's text from a response body.
///
/// Accepts the usual list of candidates and a bare single candidate.
pub fn first_generated_text(response: &Value) -> Result<String> {
    let candidate = match response {
        Value::Array(items) => items.first().ok_or_else(|| {
            DeployError::InvalidResponse("endpoint returned no candidates".to_string())
        })?,
        Value::Object(_) => response,
        other => {
            return Err(DeployError::InvalidResponse(format!(
                "expected a list of candidates, got {other}"
            )))
        }
    };

    let parsed: GeneratedCandidate = serde_json::from_value(candidate.clone()).map_err(|e| {
        DeployError::InvalidResponse(format!("candidate without generated_text: {e}"))
    })?;
    Ok(parsed.generated_text)
}

/// Send one prompt and return the generated text.
pub async fn generate(
    platform: &dyn InferencePlatform,
    endpoint: &EndpointHandle,
    prompt: &str,
    params: &GenerationParameters,
) -> Result<String> {
    let payload = build_payload(prompt, params)?;
    debug!(endpoint = %endpoint.endpoint_name, prompt_chars = prompt.len(), "sending prompt");

    let response = platform.predict(endpoint, &payload).await?;
    let text = first_generated_text(&response)?;

    info!(
        endpoint = %endpoint.endpoint_name,
        generated_chars = text.len(),
        "generation complete"
    );
    Ok(text)
}

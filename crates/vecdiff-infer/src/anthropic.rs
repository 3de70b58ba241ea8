use async_trait::async_trait;
use serde_json::{Value, json};
use vecdiff_config::Secret;

use crate::{
    GenerationRequest, InferError, TextGenerator, api_error_message, non_empty_text, request_error,
};

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: Secret,
    model: String,
    api_base: String,
}

impl AnthropicProvider {
    pub fn new(api_key: Secret, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            api_base: ANTHROPIC_API_BASE.to_owned(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint_url(&self) -> String {
        format!("{}/messages", self.api_base)
    }

    fn request_body(&self, request: &GenerationRequest) -> Value {
        json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "messages": [
                {
                    "role": "user",
                    "content": request.prompt
                }
            ]
        })
    }
}

#[async_trait]
impl TextGenerator for AnthropicProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, InferError> {
        let response = self
            .client
            .post(self.endpoint_url())
            .header("x-api-key", self.api_key.expose())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferError::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }

        let response_value: Value = response.json().await.map_err(request_error)?;
        extract_anthropic_text(&response_value)
    }
}

fn extract_anthropic_text(response: &Value) -> Result<String, InferError> {
    let block = response
        .get("content")
        .and_then(Value::as_array)
        .and_then(|blocks| blocks.first())
        .ok_or_else(|| InferError::InvalidResponse("missing content[0]".to_owned()))?;

    let block_type = block.get("type").and_then(Value::as_str).unwrap_or("unknown");
    if block_type != "text" {
        return Err(InferError::InvalidResponse(format!(
            "expected text response from Anthropic API, got '{block_type}'"
        )));
    }

    let text = block
        .get("text")
        .and_then(Value::as_str)
        .ok_or_else(|| InferError::InvalidResponse("missing content[0].text".to_owned()))?;
    non_empty_text(text)
}

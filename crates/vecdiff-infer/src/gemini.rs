use async_trait::async_trait;
use serde_json::{Value, json};
use vecdiff_config::Secret;

use crate::{
    GenerationRequest, InferError, TextGenerator, api_error_message, non_empty_text, request_error,
};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: Secret,
    model: String,
    api_base: String,
}

impl GeminiProvider {
    pub fn new(api_key: Secret, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            api_base: GEMINI_API_BASE.to_owned(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    #[cfg(test)]
    fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_owned();
        self
    }

    fn endpoint_url(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }

    fn request_body(request: &GenerationRequest) -> Value {
        json!({
            "contents": [
                {
                    "parts": [
                        {
                            "text": request.prompt
                        }
                    ]
                }
            ],
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens
            }
        })
    }
}

#[async_trait]
impl TextGenerator for GeminiProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, InferError> {
        let response = self
            .client
            .post(self.endpoint_url())
            .header("x-goog-api-key", self.api_key.expose())
            .json(&Self::request_body(request))
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
        extract_gemini_text_part(&response_value).and_then(non_empty_text)
    }
}

fn extract_gemini_text_part(response: &Value) -> Result<&str, InferError> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .and_then(|parts| parts.first())
        .and_then(|part| part.get("text"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            InferError::InvalidResponse("missing candidates[0].content.parts[0].text".to_owned())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_keeps_key_out_of_the_path() {
        let provider = GeminiProvider::new(Secret::new("g-key"), "gemini-test".to_owned());
        let url = provider.endpoint_url();
        assert_eq!(
            url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-test:generateContent"
        );
        assert!(!url.contains("g-key"));
    }

    #[tokio::test]
    async fn transport_failure_does_not_expose_api_key() {
        let provider = GeminiProvider::new(Secret::new("g-secret-key-123"), "m".to_owned())
            .with_api_base("http://127.0.0.1:9");

        let err = provider
            .generate(&GenerationRequest {
                prompt: "compare".to_owned(),
                max_tokens: 16,
                temperature: 0.0,
            })
            .await
            .expect_err("nothing listens on the discard port");

        assert!(matches!(err, InferError::Request(_)), "{err:?}");
        assert!(!err.to_string().contains("g-secret-key-123"), "{err}");
        assert!(!format!("{err:?}").contains("g-secret-key-123"));
    }

    #[test]
    fn request_body_maps_generation_limits() {
        let body = GeminiProvider::request_body(&GenerationRequest {
            prompt: "compare".to_owned(),
            max_tokens: 256,
            temperature: 0.25,
        });
        assert_eq!(body["contents"][0]["parts"][0]["text"], "compare");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 256);
        assert_eq!(body["generationConfig"]["temperature"], 0.25);
    }

    #[test]
    fn extracts_candidate_text() {
        let response = json!({
            "candidates": [
                {"content": {"parts": [{"text": "Only the titles changed."}]}}
            ]
        });
        assert_eq!(
            extract_gemini_text_part(&response).expect("text"),
            "Only the titles changed."
        );

        let missing = json!({"candidates": []});
        assert!(matches!(
            extract_gemini_text_part(&missing),
            Err(InferError::InvalidResponse(_))
        ));
    }
}

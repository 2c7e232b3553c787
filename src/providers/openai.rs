//! `OpenAI` chat completions provider

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use url::Url;

use super::{CompletionOptions, CompletionProvider};
use crate::context::Turn;
use crate::models::{ModelInfo, ModelSource};
use crate::{Error, Result};

/// Default API root
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// `OpenAI` API client
pub struct OpenAiProvider {
    client: Client,
    api_key: SecretString,
    base_url: Url,
}

impl OpenAiProvider {
    /// Create a provider for the given key and API root
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(api_key: SecretString, base_url: Url, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            base_url,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url.as_str().trim_end_matches('/'))
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn complete(&self, turns: &[Turn], options: &CompletionOptions) -> Result<String> {
        let request = ChatCompletionRequest {
            model: &options.model,
            messages: turns,
            max_tokens: options.max_tokens,
            temperature: options.temperature,
        };

        tracing::debug!(
            model = %options.model,
            turns = turns.len(),
            "sending chat completion"
        );

        let response = self
            .client
            .post(self.endpoint("chat/completions"))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("OpenAI request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!("OpenAI API error: {status} - {body}")));
        }

        let result: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("failed to parse OpenAI response: {e}")))?;

        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Provider("OpenAI returned no content".to_string()))
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

#[async_trait]
impl ModelSource for OpenAiProvider {
    async fn fetch_models(&self) -> Result<Vec<ModelInfo>> {
        tracing::debug!("fetching models from OpenAI");

        let response = self
            .client
            .get(self.endpoint("models"))
            .bearer_auth(self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| Error::Provider(format!("OpenAI models request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!("OpenAI API error: {status} - {body}")));
        }

        let list: ModelListResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("failed to parse model list: {e}")))?;

        tracing::debug!(count = list.data.len(), "fetched models from OpenAI");
        Ok(list.data)
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ModelListResponse {
    #[serde(default)]
    data: Vec<ModelInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(base: &str) -> OpenAiProvider {
        OpenAiProvider::new(
            SecretString::from("sk-test".to_string()),
            Url::parse(base).unwrap(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        assert_eq!(
            provider("https://api.openai.com/v1/").endpoint("models"),
            "https://api.openai.com/v1/models"
        );
        assert_eq!(
            provider("http://localhost:8080/v1").endpoint("chat/completions"),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn request_omits_unset_parameters() {
        let turns = [Turn::system("Output format: Markdown"), Turn::user("Hi")];
        let request = ChatCompletionRequest {
            model: "gpt-4",
            messages: &turns,
            max_tokens: None,
            temperature: Some(0.7),
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "gpt-4");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "Hi");
        assert!(json.get("max_tokens").is_none());
    }

    #[test]
    fn response_parses_first_choice() {
        let body = r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"**hi**"}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.choices[0].message.content.as_deref(), Some("**hi**"));
    }

    #[tokio::test]
    async fn unreachable_host_is_provider_error() {
        let provider = provider("http://127.0.0.1:9");
        let err = provider
            .complete(&[Turn::user("hi")], &CompletionOptions::new("gpt-4"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Provider(_)));
    }
}

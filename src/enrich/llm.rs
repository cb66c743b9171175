//! Language model clients.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::models::{FailureReason, Outcome};
use crate::utils::checked_text;

/// Text generation backend used for enrichment.
///
/// Implementations make exactly one request per call and classify failures;
/// retries belong to the caller.
#[async_trait]
pub trait LanguageModel: Send + Sync + std::fmt::Debug {
    /// Model name, for logs and reports
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Outcome<String>;
}

/// Local Ollama server
#[derive(Debug, Clone)]
pub struct OllamaModel {
    client: Client,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    num_predict: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

impl OllamaModel {
    pub fn new(client: Client, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        }
    }

    /// Names of the models installed on the server
    pub async fn list_models(&self) -> Outcome<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => return Outcome::failure(e.into()),
        };

        let parsed = checked_text(response).await.and_then(|body| {
            serde_json::from_str::<TagsResponse>(&body).map_err(FailureReason::from)
        });

        match parsed {
            Ok(tags) => Outcome::Success(tags.models.into_iter().map(|m| m.name).collect()),
            Err(reason) => Outcome::failure(reason),
        }
    }

    /// Check that the server is up and the configured model is installed.
    ///
    /// "llama3.1" matches an installed "llama3.1:latest" and vice versa.
    pub async fn ensure_available(&self) -> Outcome<()> {
        let installed = match self.list_models().await {
            Outcome::Success(names) => names,
            Outcome::RetryableFailure(reason) => return Outcome::RetryableFailure(reason),
            Outcome::FatalFailure(reason) => return Outcome::FatalFailure(reason),
        };

        let wanted = base_name(&self.model);
        if installed.iter().any(|name| base_name(name) == wanted) {
            Outcome::Success(())
        } else {
            Outcome::FatalFailure(FailureReason::InvalidRequest(format!(
                "model '{}' is not installed on {} (try `ollama pull {}`)",
                self.model, self.base_url, self.model
            )))
        }
    }
}

fn base_name(model: &str) -> &str {
    model.strip_suffix(":latest").unwrap_or(model)
}

#[async_trait]
impl LanguageModel for OllamaModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Outcome<String> {
        let url = format!("{}/api/generate", self.base_url);
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                num_predict: max_tokens,
                temperature,
            },
        };

        let response = match self.client.post(&url).json(&request).send().await {
            Ok(response) => response,
            Err(e) => return Outcome::failure(e.into()),
        };

        let parsed = checked_text(response).await.and_then(|body| {
            serde_json::from_str::<GenerateResponse>(&body).map_err(FailureReason::from)
        });

        match parsed {
            Ok(generated) if generated.response.trim().is_empty() => {
                // Ollama occasionally returns an empty completion under load
                Outcome::RetryableFailure(FailureReason::Other("empty completion".to_string()))
            }
            Ok(generated) => Outcome::Success(generated.response),
            Err(reason) => Outcome::failure(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn model(server: &mockito::Server) -> OllamaModel {
        OllamaModel::new(Client::new(), server.url(), "llama3.1")
    }

    #[tokio::test]
    async fn test_generate_sends_options() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/generate")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "model": "llama3.1",
                "prompt": "hello",
                "stream": false,
                "options": {"num_predict": 64}
            })))
            .with_status(200)
            .with_body(r#"{"model":"llama3.1","response":"Hi there","done":true}"#)
            .create_async()
            .await;

        let outcome = model(&server).generate("hello", 64, 0.2).await;

        mock.assert_async().await;
        assert_eq!(outcome, Outcome::Success("Hi there".to_string()));
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/generate")
            .with_status(500)
            .with_body("model runner crashed")
            .create_async()
            .await;

        let outcome = model(&server).generate("hello", 64, 0.2).await;
        assert!(outcome.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_model_is_fatal() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/generate")
            .with_status(404)
            .with_body(r#"{"error":"model 'llama3.1' not found"}"#)
            .create_async()
            .await;

        let outcome = model(&server).generate("hello", 64, 0.2).await;
        assert!(outcome.is_fatal());
    }

    #[tokio::test]
    async fn test_connection_refused_is_retryable() {
        // Nothing listens on port 9 locally
        let model = OllamaModel::new(Client::new(), "http://127.0.0.1:9", "llama3.1");
        let outcome = model.generate("hello", 8, 0.0).await;
        assert!(outcome.is_retryable());
    }

    #[tokio::test]
    async fn test_ensure_available() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/tags")
            .with_status(200)
            .with_body(r#"{"models":[{"name":"llama3.1:latest"},{"name":"mistral:7b"}]}"#)
            .create_async()
            .await;

        assert!(model(&server).ensure_available().await.is_success());

        let missing = OllamaModel::new(Client::new(), server.url(), "qwen2");
        assert!(missing.ensure_available().await.is_fatal());
    }
}

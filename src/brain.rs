//! Chat-completion client for text and vision queries
//!
//! Speaks the OpenAI-compatible `chat/completions` wire format (Groq by default).

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::consultation::Analyze;
use crate::image::EncodedImage;
use crate::{Error, Result};

/// Chat/vision client
pub struct ChatClient {
    client: Client,
    api_key: Option<SecretString>,
    base_url: String,
}

impl ChatClient {
    /// Create a new chat client
    #[must_use]
    pub fn new(api_key: Option<SecretString>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Use a preconfigured HTTP client
    #[must_use]
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Ask `model` about `query`, attaching `image` when present
    ///
    /// # Errors
    ///
    /// Returns [`Error::ImageRequired`] without calling out when a vision model
    /// gets no image, otherwise an error if the API call fails
    pub async fn analyze(
        &self,
        query: &str,
        image: Option<&EncodedImage>,
        model: &str,
    ) -> Result<String> {
        if image.is_none() && requires_image(model) {
            return Err(Error::ImageRequired);
        }

        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| Error::Config("GROQ_API_KEY not set".to_string()))?;

        let request = build_request(query, image, model);

        tracing::debug!(model, has_image = image.is_some(), "sending chat completion");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Vision(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat API error");
            return Err(Error::Vision(format!("API error {status}: {body}")));
        }

        let result: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| Error::Vision(format!("failed to parse response: {e}")))?;

        let answer = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Vision("response contained no choices".to_string()))?;

        tracing::info!(model, answer_chars = answer.len(), "chat completion received");
        Ok(answer)
    }
}

#[async_trait]
impl Analyze for ChatClient {
    async fn analyze(
        &self,
        query: &str,
        image: Option<&EncodedImage>,
        model: &str,
    ) -> Result<String> {
        Self::analyze(self, query, image, model).await
    }
}

/// Vision-only models cannot answer without an image
fn requires_image(model: &str) -> bool {
    model.contains("vision")
}

fn build_request(query: &str, image: Option<&EncodedImage>, model: &str) -> ChatCompletionRequest {
    let mut content = vec![ContentPart::Text {
        text: query.to_string(),
    }];

    if let Some(image) = image {
        content.push(ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: image.data_uri(),
            },
        });
    }

    ChatCompletionRequest {
        model: model.to_string(),
        messages: vec![Message {
            role: "user",
            content,
        }],
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_only_request_shape() {
        let request = build_request("I have a headache", None, "llama-3.3-70b-versatile");
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["model"], "llama-3.3-70b-versatile");
        assert_eq!(json["messages"][0]["role"], "user");
        let content = json["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[0]["text"], "I have a headache");
    }

    #[test]
    fn test_image_part_uses_data_uri() {
        let image = EncodedImage::from_bytes(b"GIF89a", None);
        let request = build_request("look", Some(&image), "vision-model");
        let json = serde_json::to_value(&request).unwrap();

        let content = json["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 2);
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(
            content[1]["image_url"]["url"],
            "data:image/gif;base64,R0lGODlh"
        );
    }

    #[tokio::test]
    async fn test_vision_model_without_image_short_circuits() {
        // Unroutable endpoint: any network attempt would surface as Error::Vision
        let client = ChatClient::new(None, "http://127.0.0.1:9");
        let result = client
            .analyze("hello", None, "llama-3.2-90b-vision-preview")
            .await;
        assert!(matches!(result, Err(Error::ImageRequired)));
    }

    #[tokio::test]
    async fn test_missing_key_is_config_error() {
        let client = ChatClient::new(None, "http://127.0.0.1:9");
        let result = client.analyze("hello", None, "llama-3.3-70b-versatile").await;
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_parses_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"Rest and fluids."}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("Rest and fluids.")
        );
    }
}

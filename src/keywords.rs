//! LLM-backed keyword extraction for natural-language queries.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::KeywordConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const PROMPT_TEMPLATE: &str = "Bạn là trợ lý tra cứu từ điển ngôn ngữ ký hiệu. \
Hãy trích xuất từ 3 đến 5 từ khóa ngắn, mang nghĩa quan trọng nhất của câu sau. \
Chỉ trả về các từ khóa, ngăn cách bởi dấu phẩy, không giải thích.\n\nCâu: \"{text}\"";

/// Prompt sent to the model for `text`.
pub fn build_prompt(text: &str) -> String {
    PROMPT_TEMPLATE.replace("{text}", text)
}

/// Split a model answer into keywords.
///
/// Falls back to `[original]` when the answer has no usable keyword.
pub fn parse_keywords(answer: &str, original: &str) -> Vec<String> {
    let mut keywords: Vec<String> = Vec::new();
    for keyword in answer.split(',').map(str::trim).filter(|k| !k.is_empty()) {
        if !keywords.iter().any(|k| k == keyword) {
            keywords.push(keyword.to_string());
        }
    }

    if keywords.is_empty() {
        vec![original.to_string()]
    } else {
        keywords
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KeywordError {
    #[error("keyword request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("keyword model answered {status}: {body}")]
    Status { status: u16, body: String },
}

/// Rewrites free text into a comma separated keyword list.
#[async_trait]
pub trait KeywordExtractor: Send + Sync {
    /// Raw model answer; parse it with `parse_keywords`.
    async fn extract(&self, text: &str) -> Result<String, KeywordError>;
}

/// Client for an OpenAI compatible `/chat/completions` endpoint.
pub struct ChatKeywordExtractor {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatAnswer,
}

#[derive(Deserialize)]
struct ChatAnswer {
    #[serde(default)]
    content: Option<String>,
}

impl ChatKeywordExtractor {
    pub fn new(config: &KeywordConfig, api_key: &str) -> Result<Self, KeywordError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        let base_url = config.base_url.strip_suffix('/').unwrap_or(&config.base_url);

        Ok(Self {
            client,
            endpoint: format!("{base_url}/chat/completions"),
            model: config.model.clone(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl KeywordExtractor for ChatKeywordExtractor {
    async fn extract(&self, text: &str) -> Result<String, KeywordError> {
        let prompt = build_prompt(text);
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &prompt,
            }],
            temperature: 0.0,
        };

        log::debug!("requesting keywords from {} for {text:?}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KeywordError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let response: ChatResponse = response.json().await?;
        let answer = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        log::debug!("keyword model answered {answer:?}");
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{body_partial_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    fn test_config(base_url: String) -> KeywordConfig {
        KeywordConfig {
            enabled: true,
            base_url,
            model: "test-model".to_string(),
            api_key: None,
        }
    }

    #[test]
    fn test_prompt_interpolates_text() {
        let prompt = build_prompt("tôi muốn ăn cơm");
        assert!(prompt.contains("\"tôi muốn ăn cơm\""));
        assert!(!prompt.contains("{text}"));
    }

    #[test]
    fn test_parse_keywords_trims_and_drops_empty() {
        assert_eq!(
            parse_keywords(" ăn , cơm,, đói ,", "x"),
            vec!["ăn".to_string(), "cơm".to_string(), "đói".to_string()]
        );
    }

    #[test]
    fn test_parse_keywords_fallback() {
        assert_eq!(parse_keywords("", "xin chào"), vec!["xin chào".to_string()]);
        assert_eq!(parse_keywords(" , ,\n", "xin chào"), vec!["xin chào".to_string()]);
    }

    #[test]
    fn test_parse_keywords_collapses_repeats() {
        assert_eq!(
            parse_keywords("mẹ, mẹ, con", "x"),
            vec!["mẹ".to_string(), "con".to_string()]
        );
    }

    #[tokio::test]
    async fn test_extract_reads_first_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({"model": "test-model"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "ăn, cơm"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let extractor =
            ChatKeywordExtractor::new(&test_config(format!("{}/v1/", server.uri())), "secret")
                .unwrap();
        let answer = extractor.extract("tôi muốn ăn cơm").await.unwrap();

        assert_eq!(answer, "ăn, cơm");
    }

    #[tokio::test]
    async fn test_extract_surfaces_upstream_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let extractor =
            ChatKeywordExtractor::new(&test_config(server.uri()), "secret").unwrap();
        let result = extractor.extract("x").await;

        assert!(matches!(result, Err(KeywordError::Status { status: 500, .. })));
    }

    #[tokio::test]
    async fn test_extract_without_choices_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let extractor =
            ChatKeywordExtractor::new(&test_config(server.uri()), "secret").unwrap();

        assert_eq!(extractor.extract("x").await.unwrap(), "");
    }
}

//! LLM-assisted product guess
//!
//! Last step of every chain when enabled. The model is asked for the same
//! five keys the legacy API returned; its answer is normalized and merged
//! like any other strategy's output, so it can only fill gaps.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use crate::config::GuessConfig;
use crate::error::GuessError;
use crate::record::Field;

/// Raw fields proposed by a guesser, keyed like the legacy response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GuessedProduct {
    #[serde(deserialize_with = "lenient_text")]
    pub product_name: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub product_price: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub product_url: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub product_image_url: Option<String>,
    #[serde(deserialize_with = "lenient_text")]
    pub product_description: Option<String>,
}

/// Models sometimes answer prices as bare numbers.
fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

impl GuessedProduct {
    pub fn get(&self, field: Field) -> Option<&str> {
        match field {
            Field::Name => self.product_name.as_deref(),
            Field::Price => self.product_price.as_deref(),
            Field::Image => self.product_image_url.as_deref(),
            Field::Description => self.product_description.as_deref(),
            Field::CanonicalUrl => self.product_url.as_deref(),
        }
    }
}

#[async_trait]
pub trait ProductGuesser: Send + Sync {
    async fn guess(&self, url: &str) -> Result<GuessedProduct, GuessError>;
}

/// Prompt sent to the model; `{url}` is replaced with the page URL.
const PROMPT_TEMPLATE: &str = r#"Extract product details from the given webpage.
URL: {url}
Reply with JSON only, in this format:
{
    "product_name": "",
    "product_price": "",
    "product_url": "",
    "product_image_url": "",
    "product_description": ""
}"#;

/// Guesser backed by an OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiGuesser {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenAiGuesser {
    /// # Errors
    ///
    /// [`GuessError::Http`] if the HTTP client cannot be built.
    pub fn new(config: &GuessConfig) -> Result<Self, GuessError> {
        let client = Client::builder()
            .timeout(config.timeout + Duration::from_secs(5))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl ProductGuesser for OpenAiGuesser {
    async fn guess(&self, url: &str) -> Result<GuessedProduct, GuessError> {
        let body = json!({
            "model": self.model,
            "temperature": 0,
            "messages": [
                { "role": "user", "content": PROMPT_TEMPLATE.replace("{url}", url) }
            ]
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GuessError::Status {
                status: status.as_u16(),
            });
        }

        let reply: Value = response.json().await?;
        let content = reply
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| GuessError::Malformed("missing choices[0].message.content".to_string()))?;

        parse_reply(content)
    }
}

/// Parse the model's reply, tolerating a surrounding Markdown code fence.
pub fn parse_reply(content: &str) -> Result<GuessedProduct, GuessError> {
    let trimmed = content.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed);

    serde_json::from_str(unfenced.trim()).map_err(|e| GuessError::Malformed(e.to_string()))
}

//! Pricing assistant: forwards a pricing question to a chat-completion API and
//! pulls a JSON object out of the free-text answer.
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, instrument};

use crate::config::Pricing;

static JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").expect("valid regex"));
static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("valid regex"));

const SYSTEM_PROMPT: &str = "You are a pricing assistant for a creative and marketing agency. \
Answer with a single JSON object with the keys \"suggestedPrice\" (number), \"priceRange\" \
(object with \"min\" and \"max\" numbers), \"pricingModel\" (string) and \"reasoning\" (string).";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PricingRequest {
    pub service_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub client_industry: Option<String>,
    #[serde(default)]
    pub deliverables: Vec<String>,
}

impl PricingRequest {
    pub fn prompt(&self) -> String {
        let mut prompt = format!("Suggest pricing for this service: {}.", self.service_type);
        if let Some(description) = self.description.as_deref().filter(|d| !d.trim().is_empty()) {
            prompt.push_str(&format!("\nDescription: {}", description.trim()));
        }
        if let Some(industry) = self.client_industry.as_deref().filter(|i| !i.trim().is_empty()) {
            prompt.push_str(&format!("\nClient industry: {}", industry.trim()));
        }
        if !self.deliverables.is_empty() {
            prompt.push_str(&format!("\nDeliverables: {}", self.deliverables.join(", ")));
        }
        prompt
    }
}

#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Send a system + user prompt and return the assistant's raw text.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// OpenAI-compatible chat-completions client.
#[derive(Clone)]
pub struct ChatCompletionClient {
    http: Client,
    endpoint: Url,
    api_key: String,
    model: String,
}

impl fmt::Debug for ChatCompletionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatCompletionClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl ChatCompletionClient {
    pub fn from_config(cfg: &Pricing) -> Result<Self> {
        let endpoint = Url::parse(&cfg.api_url).context("invalid pricing.api_url")?;
        let http = Client::builder()
            .user_agent("approval-sweeper/0.1")
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            endpoint,
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
        })
    }

    pub fn build_body(&self, system: &str, user: &str) -> Value {
        json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl CompletionService for ChatCompletionClient {
    #[instrument(skip_all)]
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        let body = self.build_body(system, user);
        debug!(endpoint=%self.endpoint, model=%self.model, "sending completion request");
        let res = self
            .http
            .post(self.endpoint.clone())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .context("failed to reach completion API")?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("completion API error {}: {}", status, body));
        }
        let payload: ChatResponse = res.json().await.context("invalid completion response")?;
        payload
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow!("completion response had no choices"))
    }
}

/// Extract the first JSON object embedded in model output. Fenced ```json blocks win
/// over a bare brace span.
pub fn extract_json(text: &str) -> Option<Value> {
    if let Some(caps) = FENCED_JSON.captures(text) {
        if let Ok(value) = serde_json::from_str::<Value>(&caps[1]) {
            return Some(value);
        }
    }
    let span = JSON_OBJECT.find(text)?;
    serde_json::from_str::<Value>(span.as_str())
        .ok()
        .filter(Value::is_object)
}

/// Ask the completion service for a pricing suggestion and parse it.
pub async fn suggest(service: &dyn CompletionService, request: &PricingRequest) -> Result<Value> {
    let answer = service.complete(SYSTEM_PROMPT, &request.prompt()).await?;
    extract_json(&answer).ok_or_else(|| anyhow!("completion did not contain a JSON object"))
}

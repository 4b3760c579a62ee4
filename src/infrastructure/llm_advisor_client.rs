//! Trade advisor backed by an OpenAI-compatible chat completions endpoint.

use crate::config::AdvisorConfig;
use crate::domain::errors::ExternalError;
use crate::domain::repositories::trade_advisor::{AdvisoryRequest, TradeAdvisor};
use crate::domain::value_objects::decision::AiDecision;
use crate::infrastructure::http::{build_client, classify_transport, read_body};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

const SYSTEM_PROMPT: &str = "You are a disciplined trading assistant for a paper-trading account. \
Given a symbol, its latest price, technical indicators and the open position (if any), answer \
with a single JSON object: {\"recommendation\": \"BUY\" | \"SELL\" | \"HOLD\", \
\"confidence\": \"high\" | \"medium\" | \"low\", \"reasoning\": \"<one or two sentences>\"}. \
Prefer HOLD when the indicators disagree or data is missing.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage>,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

pub struct LlmAdvisorClient {
    client: Client,
    config: AdvisorConfig,
}

impl LlmAdvisorClient {
    pub fn new(config: AdvisorConfig) -> Result<Self, ExternalError> {
        Ok(Self {
            client: build_client(config.timeout)?,
            config,
        })
    }
}

#[async_trait]
impl TradeAdvisor for LlmAdvisorClient {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn recommend(&self, request: &AdvisoryRequest) -> Result<AiDecision, ExternalError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| ExternalError::Permanent("LLM_API_KEY is not set".to_string()))?;

        let body = ChatRequest {
            model: &self.config.model,
            temperature: self.config.temperature,
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: build_user_prompt(request)?,
                },
            ],
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;
        let text = read_body(response).await?;

        let chat: ChatResponse = serde_json::from_str(&text)
            .map_err(|e| ExternalError::Parse(format!("chat response: {}", e)))?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| ExternalError::Parse("chat response has no choices".to_string()))?;

        let decision = parse_decision(&content)?;
        debug!(
            "Advisor says {} ({}) for {}",
            decision.recommendation, decision.confidence, request.symbol
        );
        Ok(decision)
    }
}

fn build_user_prompt(request: &AdvisoryRequest) -> Result<String, ExternalError> {
    let context = serde_json::to_string_pretty(request)
        .map_err(|e| ExternalError::Parse(format!("advisory request: {}", e)))?;
    Ok(format!(
        "Market snapshot for {} ({}):\n{}\n\nRespond with the JSON object only.",
        request.symbol, request.market_type, context
    ))
}

/// Extract the decision object, tolerating code fences or prose around it
pub(crate) fn parse_decision(content: &str) -> Result<AiDecision, ExternalError> {
    let json = match (content.find('{'), content.rfind('}')) {
        (Some(start), Some(end)) if start < end => &content[start..=end],
        _ => content,
    };

    serde_json::from_str::<AiDecision>(json).map_err(|e| {
        ExternalError::Parse(format!("advisor decision: {} in {:?}", e, truncate(content)))
    })
}

fn truncate(text: &str) -> String {
    text.chars().take(120).collect()
}

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use indoc::{formatdoc, indoc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    rate_limiters::RateLimiters,
    server_config::{cfg, Category},
    HttpClient,
};

use super::{LabelModel, LabelSet, TextPair};

#[derive(Debug, Serialize, Deserialize)]
pub struct PromptUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: i32,
    pub message: ChatMessage,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiResponse {
    pub choices: Vec<ChatChoice>,
    pub usage: Option<PromptUsage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatApiError {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChatApiResponseOrError {
    Response(ChatApiResponse),
    Error(ChatApiError),
}

#[derive(Debug, Deserialize)]
struct LabeledItem {
    index: usize,
    labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BatchAnswer {
    results: Vec<LabeledItem>,
}

const INSTRUCTIONS: &str = indoc! {r#"
    Read each email carefully (subject and body).
    Rank the categories that best describe the sender's intent, best first.
    Only use category labels from the list. Do not invent new ones.
    Return an entry for every email index you were given."#
};

fn system_prompt(categories: &[Category], labels_per_item: usize) -> String {
    let taxonomy = categories
        .iter()
        .map(|c| format!("• \"{}\": {}", c.label, c.description))
        .collect::<Vec<_>>()
        .join("\n");

    formatdoc! {r#"
        Your task is to label a numbered list of emails with categories from the taxonomy below.

        {taxonomy}

        {INSTRUCTIONS}

        You will only respond with a JSON object of the form
        {{"results": [{{"index": <email index>, "labels": [<{labels_per_item} labels, best first>]}}]}}"#
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn user_prompt(pairs: &[TextPair], max_body_chars: usize) -> String {
    pairs
        .iter()
        .enumerate()
        .map(|(i, pair)| {
            format!(
                "<email index=\"{}\">\n<subject>{}</subject>\n<body>{}</body>\n</email>",
                i,
                pair.subject,
                truncate_chars(&pair.body, max_body_chars)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Labels a sub-batch with one chat completion against the Mistral API.
pub struct MistralLabelModel {
    http_client: HttpClient,
    rate_limiters: RateLimiters,
    endpoint: String,
    api_key: String,
    model_id: String,
    temperature: f64,
    categories: Vec<Category>,
    labels_per_item: usize,
    max_body_chars: usize,
}

impl MistralLabelModel {
    pub fn from_config(http_client: HttpClient, rate_limiters: RateLimiters) -> Self {
        Self {
            http_client,
            rate_limiters,
            endpoint: cfg.model.endpoint.clone(),
            api_key: cfg.api.key.clone(),
            model_id: cfg.model.id.clone(),
            temperature: cfg.model.temperature,
            categories: cfg.categories.clone(),
            labels_per_item: cfg.model.labels_per_item,
            max_body_chars: cfg.model.max_body_chars,
        }
    }

    fn known_label(&self, label: &str) -> Option<String> {
        let label = label.trim();
        self.categories
            .iter()
            .find(|c| c.label.eq_ignore_ascii_case(label))
            .map(|c| c.label.clone())
    }

    fn parse_answer(&self, content: &str, expected: usize) -> anyhow::Result<Vec<LabelSet>> {
        let answer: BatchAnswer = serde_json::from_str(content)
            .with_context(|| format!("Could not parse JSON response: {}", content))?;

        let mut slots: Vec<Option<LabelSet>> = vec![None; expected];
        for item in answer.results {
            let slot = slots
                .get_mut(item.index)
                .ok_or_else(|| anyhow!("Model answered for unknown index {}", item.index))?;
            let mut labels: LabelSet = Vec::with_capacity(item.labels.len());
            for label in item.labels.iter().filter_map(|l| self.known_label(l)) {
                if !labels.contains(&label) {
                    labels.push(label);
                }
            }
            *slot = Some(labels);
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(i, slot)| slot.ok_or_else(|| anyhow!("Model skipped email index {}", i)))
            .collect()
    }
}

#[async_trait]
impl LabelModel for MistralLabelModel {
    async fn label_batch(&self, pairs: &[TextPair]) -> anyhow::Result<Vec<LabelSet>> {
        let resp = self
            .http_client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!(
              {
                "model": &self.model_id,
                "temperature": self.temperature,
                "messages": [
                  {
                    "role": "system",
                    "content": system_prompt(&self.categories, self.labels_per_item)
                  },
                  {
                    "role": "user",
                    "content": user_prompt(pairs, self.max_body_chars)
                  }
                ],
                "response_format": {
                    "type": "json_object",
                }
              }
            ))
            .send()
            .await
            .context("Chat API request failed")?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            self.rate_limiters.trigger_backoff();
            return Err(anyhow!("Chat API rate limited"));
        }

        let resp = resp
            .json::<serde_json::Value>()
            .await
            .with_context(|| format!("Chat API returned unreadable body ({})", status))?;

        let parsed = serde_json::from_value::<ChatApiResponseOrError>(resp.clone())
            .with_context(|| format!("Could not parse chat response: {}", resp))?;

        let parsed = match parsed {
            ChatApiResponseOrError::Error(error) => {
                if error.message == "Requests rate limit exceeded" {
                    self.rate_limiters.trigger_backoff();
                }
                return Err(anyhow!("Chat API error: {:?}", error));
            }
            ChatApiResponseOrError::Response(parsed) => parsed,
        };

        if let Some(usage) = &parsed.usage {
            tracing::debug!(
                "Labeled {} emails using {} tokens",
                pairs.len(),
                usage.total_tokens
            );
        }

        let choice = parsed.choices.first().context("No choices in response")?;
        self.parse_answer(&choice.message.content, pairs.len())
    }
}

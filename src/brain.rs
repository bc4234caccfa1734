use anyhow::{Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::types::{
    Decision, HISTORY_RESULT_MAX_CHARS, HISTORY_WINDOW, Snapshot, SnapshotPreview, StepRecord,
    trim_chars,
};

const SYSTEM_PROMPT: &str = r#"You are a browser automation agent. You control a real browser one action at a time.

You are given:
- the user's task,
- a summary of the current page (url, title, indexed buttons, links and inputs),
- the most recent steps you already took and their results.

Pick the NEXT action from: navigate, click, type, scroll, wait, press, done.

Actions and their args:
- navigate: {"url": "https://..."}
- click:    {"target": "link" | "button" | "input", "index": <int>}
- type:     {"index": <int>, "text": "..."}   (index into the inputs list)
- scroll:   {"direction": "down" | "up", "amount": 800}
- wait:     {"seconds": 1.5}
- press:    {"key": "Enter"}
- done:     {"result": "short description of what was achieved"}

Rules:
1. If the goal of the task is already reached, answer with done.
2. Never repeat the same action with the same args twice in a row; it will be blocked.
3. Do not navigate again to the site you are already on.
4. Do not click invisible or empty elements. Indices refer to the page summary you were just shown.
5. If a step failed, read its result and try something different.

Answer with ONLY a JSON object, no text around it:
{"action": "type", "args": {"index": 0, "text": "iphone"}, "thoughts": "Found the search box."}"#;

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 512;
const TEMPERATURE: f64 = 0.1;

/// The oracle's answer could not be turned into a decision.
#[derive(Debug, thiserror::Error)]
pub enum DecisionFormatError {
    #[error("could not parse JSON from oracle response: {reason}\nresponse:\n{raw}")]
    Unparsable { reason: String, raw: String },
    #[error("oracle response is not a JSON object:\n{raw}")]
    NotAnObject { raw: String },
    #[error("oracle response lacks `action` and/or `args`:\n{raw}")]
    MissingKeys { raw: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub step: usize,
    pub action: String,
    pub args: Map<String, Value>,
    pub result: String,
}

/// Everything the oracle is told for one decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleRequest {
    pub task: String,
    pub history: Vec<HistoryEntry>,
    pub snapshot_preview: SnapshotPreview,
}

impl OracleRequest {
    pub fn new(task: &str, snapshot: &Snapshot, history: &[StepRecord]) -> Self {
        let start = history.len().saturating_sub(HISTORY_WINDOW);
        let history = history[start..]
            .iter()
            .map(|record| HistoryEntry {
                step: record.step,
                action: record.action.clone(),
                args: record.args.clone(),
                result: trim_chars(&record.result, HISTORY_RESULT_MAX_CHARS),
            })
            .collect();
        Self {
            task: task.to_string(),
            history,
            snapshot_preview: snapshot.preview(),
        }
    }

    /// Renders the user turn of the prompt.
    pub fn render(&self) -> String {
        let history = if self.history.is_empty() {
            "(nothing yet)".to_string()
        } else {
            self.history
                .iter()
                .map(|entry| {
                    format!(
                        "- step {}: action={}, args={}, result={}",
                        entry.step,
                        entry.action,
                        Value::Object(entry.args.clone()),
                        entry.result
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        let page = serde_json::to_string_pretty(&self.snapshot_preview)
            .unwrap_or_else(|_| "{}".to_string());

        format!(
            "Task:\n{}\n\nPrevious steps:\n{}\n\nCurrent page:\n{}\n\nChoose the next action. Answer with JSON only.",
            self.task, history, page
        )
    }
}

/// Source of raw decisions. Returns the oracle's text untouched.
#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn complete(&self, request: &OracleRequest) -> Result<String>;
}

/// Keeps the span from the first `{` to the last `}`.
pub fn extract_json(raw: &str) -> &str {
    let text = raw.trim();
    let text = match text.find('{') {
        Some(start) => &text[start..],
        None => text,
    };
    match text.rfind('}') {
        Some(end) => &text[..=end],
        None => text,
    }
}

/// Reduces raw oracle text to a decision. Never retries.
pub fn parse_decision(raw: &str) -> Result<Decision, DecisionFormatError> {
    let candidate = extract_json(raw);
    let value: Value =
        serde_json::from_str(candidate).map_err(|err| DecisionFormatError::Unparsable {
            reason: err.to_string(),
            raw: raw.to_string(),
        })?;
    let Value::Object(mut object) = value else {
        return Err(DecisionFormatError::NotAnObject {
            raw: raw.to_string(),
        });
    };

    let action = object.remove("action");
    let args = object.remove("args");
    let (Some(Value::String(action)), Some(Value::Object(args))) = (action, args) else {
        return Err(DecisionFormatError::MissingKeys {
            raw: raw.to_string(),
        });
    };
    let thoughts = match object.remove("thoughts") {
        Some(Value::String(thoughts)) => thoughts,
        _ => String::new(),
    };

    Ok(Decision {
        thoughts,
        ..Decision::new(action, args)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Provider {
    #[value(name = "openai")]
    OpenAi,
    Anthropic,
}

impl Provider {
    pub fn api_key_var(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4o-mini",
            Provider::Anthropic => "claude-3-haiku-20240307",
        }
    }
}

/// HTTP-backed oracle.
pub struct Brain {
    client: Client,
    api_key: String,
    provider: Provider,
    model: String,
}

impl Brain {
    pub fn new(provider: Provider, model: Option<String>) -> Result<Self> {
        let var = provider.api_key_var();
        let api_key = std::env::var(var).map_err(|_| anyhow!("{var} not set in environment"))?;
        Ok(Self {
            client: Client::new(),
            api_key,
            provider,
            model: model.unwrap_or_else(|| provider.default_model().to_string()),
        })
    }

    async fn post(&self, request: reqwest::RequestBuilder, body: Value) -> Result<Value> {
        let response = request.json(&body).send().await?;
        let status = response.status();
        let payload: Value = response.json().await?;
        if !status.is_success() {
            let message = payload["error"]["message"]
                .as_str()
                .unwrap_or("unknown API error");
            return Err(anyhow!("{:?} API error ({status}): {message}", self.provider));
        }
        Ok(payload)
    }

    async fn ask_openai(&self, user: String) -> Result<String> {
        let request = self
            .client
            .post(OPENAI_URL)
            .header("Authorization", format!("Bearer {}", self.api_key));
        let payload = self
            .post(
                request,
                json!({
                    "model": self.model,
                    "temperature": TEMPERATURE,
                    "messages": [
                        {"role": "system", "content": SYSTEM_PROMPT},
                        {"role": "user", "content": user},
                    ],
                }),
            )
            .await?;
        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| anyhow!("no content in LLM response: {payload}"))
    }

    async fn ask_anthropic(&self, user: String) -> Result<String> {
        let request = self
            .client
            .post(ANTHROPIC_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION);
        let payload = self
            .post(
                request,
                json!({
                    "model": self.model,
                    "max_tokens": MAX_TOKENS,
                    "temperature": TEMPERATURE,
                    "system": SYSTEM_PROMPT,
                    "messages": [{"role": "user", "content": user}],
                }),
            )
            .await?;
        let blocks = payload["content"]
            .as_array()
            .ok_or_else(|| anyhow!("no content in LLM response: {payload}"))?;
        Ok(blocks
            .iter()
            .filter(|block| block["type"] == "text")
            .filter_map(|block| block["text"].as_str())
            .collect())
    }
}

#[async_trait]
impl DecisionOracle for Brain {
    async fn complete(&self, request: &OracleRequest) -> Result<String> {
        let user = request.render();
        let text = match self.provider {
            Provider::OpenAi => self.ask_openai(user).await?,
            Provider::Anthropic => self.ask_anthropic(user).await?,
        };
        debug!(response = %text, "oracle replied");
        Ok(text)
    }
}

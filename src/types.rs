use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_MAX_STEPS: usize = 15;
pub const ACTION_TIMEOUT: Duration = Duration::from_secs(10);

pub const MARKUP_MAX_CHARS: usize = 8000;
pub const MARKUP_TRUNCATION_MARKER: &str = "\n<!-- truncated -->";
pub const ELEMENT_TEXT_MAX_CHARS: usize = 200;
pub const MAX_LINKS: usize = 50;
pub const MAX_INPUTS: usize = 50;

/// How many history entries, and how much of each result, the oracle gets to see.
pub const HISTORY_WINDOW: usize = 10;
pub const HISTORY_RESULT_MAX_CHARS: usize = 120;
pub const PREVIEW_ELEMENTS: usize = 20;

/// Element families the agent can address by positional index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementCategory {
    Link,
    Button,
    Input,
}

impl ElementCategory {
    pub fn selector(self) -> &'static str {
        match self {
            ElementCategory::Link => "a",
            ElementCategory::Button => "button, [role='button']",
            ElementCategory::Input => "input, textarea",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ElementCategory::Link => "link",
            ElementCategory::Button => "button",
            ElementCategory::Input => "input",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "link" => Some(ElementCategory::Link),
            "button" => Some(ElementCategory::Button),
            "input" => Some(ElementCategory::Input),
            _ => None,
        }
    }
}

impl fmt::Display for ElementCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSummary {
    pub index: usize,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSummary {
    pub index: usize,
    pub attributes: BTreeMap<String, String>,
}

/// Bounded view of the page at one instant. Indices are only valid against
/// the snapshot that produced them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub url: String,
    pub title: String,
    pub markup: String,
    pub buttons: Vec<ElementSummary>,
    pub links: Vec<ElementSummary>,
    pub inputs: Vec<InputSummary>,
}

/// The part of a snapshot shown to the decision oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotPreview {
    pub url: String,
    pub title: String,
    pub buttons: Vec<ElementSummary>,
    pub links: Vec<ElementSummary>,
    pub inputs: Vec<InputSummary>,
}

impl Snapshot {
    pub fn preview(&self) -> SnapshotPreview {
        SnapshotPreview {
            url: self.url.clone(),
            title: self.title.clone(),
            buttons: self.buttons.iter().take(PREVIEW_ELEMENTS).cloned().collect(),
            links: self.links.iter().take(PREVIEW_ELEMENTS).cloned().collect(),
            inputs: self.inputs.iter().take(PREVIEW_ELEMENTS).cloned().collect(),
        }
    }
}

/// One step the oracle asks for. `action` is lowercased; `args` is left as
/// the oracle sent it and only typed by the executor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub action: String,
    pub args: Map<String, Value>,
    pub thoughts: String,
}

impl Decision {
    pub fn new(action: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            action: action.into().to_lowercase(),
            args,
            thoughts: String::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.action == "done"
    }

    /// Same action with the same arguments.
    pub fn repeats(&self, record: &StepRecord) -> bool {
        self.action == record.action && self.args == record.args
    }
}

/// Why a step did not produce a clean result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StepError {
    #[error("Blocked by agent safety policy")]
    PolicyBlocked,
    #[error("TIMEOUT: action '{action}' exceeded {}s", .limit.as_secs_f64())]
    TimedOut { action: String, limit: Duration },
    #[error("{0}")]
    Failed(String),
}

/// Immutable log entry for one loop iteration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub step: usize,
    pub action: String,
    pub args: Map<String, Value>,
    pub result: String,
    pub error: Option<StepError>,
}

impl StepRecord {
    pub fn is_policy_blocked(&self) -> bool {
        matches!(self.error, Some(StepError::PolicyBlocked))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "result", rename_all = "snake_case")]
pub enum Outcome {
    Completed(String),
    Exhausted,
}

/// What a finished run hands back: the terminal outcome plus the trace.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub outcome: Outcome,
    pub history: Vec<StepRecord>,
}

impl RunReport {
    pub fn result(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Completed(result) => Some(result),
            Outcome::Exhausted => None,
        }
    }
}

/// Cuts `text` to at most `max` chars, ending with "..." when shortened.
pub fn trim_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

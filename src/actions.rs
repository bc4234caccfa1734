use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::hands::{LoadStrategy, Page, PageError};
use crate::types::{Decision, ElementCategory};

const DEFAULT_SCROLL_AMOUNT: i64 = 800;
const DEFAULT_WAIT_SECONDS: f64 = 1.0;
const DEFAULT_KEY: &str = "Enter";
pub const DEFAULT_DONE_RESULT: &str = "Task completed.";

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("{action}: {message}")]
    InvalidArgs {
        action: &'static str,
        message: &'static str,
    },
    #[error("{category} index {index} out of range (page has {count})")]
    IndexOutOfRange {
        category: ElementCategory,
        index: usize,
        count: usize,
    },
    #[error(transparent)]
    Page(#[from] PageError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavigateArgs {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClickArgs {
    pub target: ElementCategory,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeArgs {
    pub index: usize,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Down,
    Up,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScrollArgs {
    pub direction: ScrollDirection,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WaitArgs {
    pub seconds: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PressArgs {
    pub key: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DoneArgs {
    pub result: String,
}

impl DoneArgs {
    pub fn from_args(args: &Map<String, Value>) -> Self {
        let result = args
            .get("result")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_DONE_RESULT);
        Self {
            result: result.to_string(),
        }
    }
}

/// A decision after its arguments have been checked against the action's shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Navigate(NavigateArgs),
    Click(ClickArgs),
    Type(TypeArgs),
    Scroll(ScrollArgs),
    Wait(WaitArgs),
    Press(PressArgs),
    Done(DoneArgs),
}

impl Action {
    pub fn parse(action: &str, args: &Map<String, Value>) -> Result<Self, ActionError> {
        match action.to_lowercase().as_str() {
            "navigate" => {
                let url = args
                    .get("url")
                    .and_then(Value::as_str)
                    .ok_or(ActionError::InvalidArgs {
                        action: "navigate",
                        message: "expected a string in args.url",
                    })?;
                Ok(Action::Navigate(NavigateArgs { url: url.to_string() }))
            }
            "click" => {
                let index = index_arg(args).ok_or(ActionError::InvalidArgs {
                    action: "click",
                    message: "expected an integer in args.index",
                })?;
                let target = args
                    .get("target")
                    .and_then(Value::as_str)
                    .and_then(ElementCategory::parse)
                    .ok_or(ActionError::InvalidArgs {
                        action: "click",
                        message: "args.target must be 'link' | 'button' | 'input'",
                    })?;
                Ok(Action::Click(ClickArgs { target, index }))
            }
            "type" => {
                let index = index_arg(args);
                let text = args.get("text").and_then(Value::as_str);
                match (index, text) {
                    (Some(index), Some(text)) => Ok(Action::Type(TypeArgs {
                        index,
                        text: text.to_string(),
                    })),
                    _ => Err(ActionError::InvalidArgs {
                        action: "type",
                        message: "expected index:int and text:string",
                    }),
                }
            }
            "scroll" => {
                let direction = match args.get("direction").and_then(Value::as_str) {
                    Some("up") => ScrollDirection::Up,
                    _ => ScrollDirection::Down,
                };
                let amount = args
                    .get("amount")
                    .and_then(Value::as_i64)
                    .unwrap_or(DEFAULT_SCROLL_AMOUNT);
                Ok(Action::Scroll(ScrollArgs { direction, amount }))
            }
            "wait" => {
                let seconds = args
                    .get("seconds")
                    .and_then(number_like)
                    // negative or non-finite counts as missing
                    .filter(|s| s.is_finite() && *s >= 0.0)
                    .unwrap_or(DEFAULT_WAIT_SECONDS);
                Ok(Action::Wait(WaitArgs { seconds }))
            }
            "press" => {
                let key = args
                    .get("key")
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_KEY);
                Ok(Action::Press(PressArgs { key: key.to_string() }))
            }
            "done" => Ok(Action::Done(DoneArgs::from_args(args))),
            other => Err(ActionError::UnknownAction(other.to_string())),
        }
    }
}

fn index_arg(args: &Map<String, Value>) -> Option<usize> {
    args.get("index")
        .and_then(Value::as_u64)
        .and_then(|i| usize::try_from(i).ok())
}

// Oracles sometimes quote numbers.
fn number_like(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// What happened when a click was attempted. Only `Clicked` changed the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
    Clicked,
    /// The element vanished between snapshot and click.
    ElementGone,
    /// The element was there but would not take the click.
    Skipped,
}

/// Clicks without failing: elements disappearing mid-step is normal.
pub async fn attempt_click(page: &dyn Page, category: ElementCategory, index: usize) -> ClickOutcome {
    match page.click(category, index).await {
        Ok(()) => ClickOutcome::Clicked,
        Err(PageError::ElementGone { .. }) => ClickOutcome::ElementGone,
        Err(err) => {
            debug!(%category, index, "click skipped: {err}");
            ClickOutcome::Skipped
        }
    }
}

async fn ensure_in_range(
    page: &dyn Page,
    category: ElementCategory,
    index: usize,
) -> Result<(), ActionError> {
    let count = page.count_elements(category).await?;
    if index >= count {
        return Err(ActionError::IndexOutOfRange {
            category,
            index,
            count,
        });
    }
    Ok(())
}

/// Validates the decision's arguments, then performs it.
pub async fn execute(page: &dyn Page, decision: &Decision) -> Result<String, ActionError> {
    let action = Action::parse(&decision.action, &decision.args)?;
    perform(page, &action).await
}

pub async fn perform(page: &dyn Page, action: &Action) -> Result<String, ActionError> {
    match action {
        Action::Navigate(NavigateArgs { url }) => {
            if let Err(err) = page.navigate(url, LoadStrategy::Load).await {
                warn!(%url, "full load failed, retrying with DOM-ready wait: {err}");
                page.navigate(url, LoadStrategy::DomContentLoaded).await?;
            }
            Ok(format!("Navigated to {url}"))
        }
        Action::Click(ClickArgs { target, index }) => {
            ensure_in_range(page, *target, *index).await?;
            let outcome = attempt_click(page, *target, *index).await;
            Ok(match outcome {
                ClickOutcome::Clicked => format!("Clicked {target} index={index}"),
                ClickOutcome::ElementGone => {
                    format!("Clicked {target} index={index} (element disappeared)")
                }
                ClickOutcome::Skipped => {
                    format!("Clicked {target} index={index} (element not interactable)")
                }
            })
        }
        Action::Type(TypeArgs { index, text }) => {
            ensure_in_range(page, ElementCategory::Input, *index).await?;
            attempt_click(page, ElementCategory::Input, *index).await;
            page.type_into(*index, text).await?;
            Ok(format!("Typed into input index={index}: {text:?}"))
        }
        Action::Scroll(ScrollArgs { direction, amount }) => {
            let (label, delta) = match direction {
                ScrollDirection::Down => ("down", *amount),
                ScrollDirection::Up => ("up", amount.saturating_neg()),
            };
            page.scroll(delta).await?;
            Ok(format!("Scrolled {label} by {amount} pixels"))
        }
        Action::Wait(WaitArgs { seconds }) => {
            let pause = Duration::try_from_secs_f64(*seconds)
                .unwrap_or(Duration::from_secs_f64(DEFAULT_WAIT_SECONDS));
            page.sleep(pause).await;
            Ok(format!("Waited {seconds} seconds"))
        }
        Action::Press(PressArgs { key }) => {
            page.press_key(key).await?;
            Ok(format!("Pressed key {key}"))
        }
        Action::Done(DoneArgs { result }) => Ok(format!("Task finished: {result}")),
    }
}

/// Result of running one action under the step time limit.
#[derive(Debug)]
pub enum Execution {
    Completed(String),
    TimedOut,
    Failed(ActionError),
}

/// Runs the decision, giving up after `limit`. An abandoned call may still be
/// running inside the browser.
pub async fn execute_bounded(page: &dyn Page, decision: &Decision, limit: Duration) -> Execution {
    match tokio::time::timeout(limit, execute(page, decision)).await {
        Ok(Ok(result)) => Execution::Completed(result),
        Ok(Err(err)) => Execution::Failed(err),
        Err(_) => Execution::TimedOut,
    }
}

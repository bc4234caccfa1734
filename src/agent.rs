use std::time::Duration;

use tracing::{debug, info, warn};

use crate::actions::{DoneArgs, Execution, execute_bounded};
use crate::brain::{DecisionFormatError, DecisionOracle, OracleRequest, parse_decision};
use crate::dom;
use crate::hands::Page;
use crate::trace::TraceSink;
use crate::types::{
    ACTION_TIMEOUT, DEFAULT_MAX_STEPS, Decision, Outcome, RunReport, StepError, StepRecord,
};

const BLOCKED_RESULT: &str = "Skipped: repeated action blocked by agent safety policy.";
const FAST_PATH_RESULT: &str = "Target page reached.";
const RESULT_SEPARATOR: &str = "=>";

/// Errors that end a run early. Action failures never show up here.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("no browser page available; start the browser first")]
    PageUnavailable,
    #[error("decision oracle failed: {0}")]
    Oracle(String),
    #[error(transparent)]
    DecisionFormat(#[from] DecisionFormatError),
}

/// URL heuristic that ends a run without asking the oracle. Matches when the
/// URL contains every pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRule {
    pub patterns: Vec<String>,
    pub result: String,
}

impl CompletionRule {
    /// Parses `PATTERN[&PATTERN...][=>RESULT]`. Patterns may contain `=`, so
    /// query strings work. An empty result falls back to the default one.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let (patterns, result) = match raw.split_once(RESULT_SEPARATOR) {
            Some((patterns, result)) if !result.trim().is_empty() => {
                (patterns, result.trim().to_string())
            }
            Some((patterns, _)) => (patterns, FAST_PATH_RESULT.to_string()),
            None => (raw, FAST_PATH_RESULT.to_string()),
        };
        let patterns: Vec<String> = patterns
            .split('&')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(String::from)
            .collect();
        if patterns.is_empty() {
            return Err(format!("completion rule '{raw}' has no URL pattern"));
        }
        Ok(Self { patterns, result })
    }

    pub fn matches(&self, url: &str) -> bool {
        !self.patterns.is_empty() && self.patterns.iter().all(|p| url.contains(p.as_str()))
    }
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub max_steps: usize,
    pub action_timeout: Duration,
    /// Empty disables the fast path.
    pub completion_rules: Vec<CompletionRule>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            action_timeout: ACTION_TIMEOUT,
            completion_rules: Vec::new(),
        }
    }
}

impl AgentSettings {
    fn fast_path(&self, url: &str) -> Option<&CompletionRule> {
        self.completion_rules.iter().find(|rule| rule.matches(url))
    }
}

/// One task driven to completion against a borrowed page.
pub struct AgentRun<'a> {
    task: String,
    page: &'a mut dyn Page,
    oracle: &'a dyn DecisionOracle,
    sink: &'a dyn TraceSink,
    settings: &'a AgentSettings,
    history: Vec<StepRecord>,
}

impl<'a> AgentRun<'a> {
    pub fn new(
        task: impl Into<String>,
        page: &'a mut dyn Page,
        oracle: &'a dyn DecisionOracle,
        sink: &'a dyn TraceSink,
        settings: &'a AgentSettings,
    ) -> Self {
        Self {
            task: task.into(),
            page,
            oracle,
            sink,
            settings,
            history: Vec::new(),
        }
    }

    pub async fn run(mut self) -> Result<RunReport, AgentError> {
        if !self.page.is_open() {
            return Err(AgentError::PageUnavailable);
        }
        let max_steps = self.settings.max_steps;
        info!(task = %self.task, max_steps, "starting task");

        for step in 1..=max_steps {
            debug!(step, max_steps, "taking snapshot");
            let snapshot = dom::snapshot(&*self.page).await;

            if let Some(rule) = self.settings.fast_path(&snapshot.url) {
                info!(step, url = %snapshot.url, "completion rule matched");
                let result = rule.result.clone();
                return Ok(self.finish(Outcome::Completed(result)));
            }

            let request = OracleRequest::new(&self.task, &snapshot, &self.history);
            let raw = self
                .oracle
                .complete(&request)
                .await
                .map_err(|err| AgentError::Oracle(format!("{err:#}")))?;
            let decision = parse_decision(&raw)?;
            if !decision.thoughts.is_empty() {
                debug!(step, thoughts = %decision.thoughts);
            }

            if decision.is_done() {
                let result = DoneArgs::from_args(&decision.args).result;
                self.append(step, &decision, result.clone(), None);
                return Ok(self.finish(Outcome::Completed(result)));
            }

            if self.history.last().is_some_and(|last| decision.repeats(last)) {
                self.append(
                    step,
                    &decision,
                    BLOCKED_RESULT.to_string(),
                    Some(StepError::PolicyBlocked),
                );
                continue;
            }

            let limit = self.settings.action_timeout;
            let (result, error) = match execute_bounded(&*self.page, &decision, limit).await {
                Execution::Completed(result) => (result, None),
                Execution::TimedOut => {
                    let error = StepError::TimedOut {
                        action: decision.action.clone(),
                        limit,
                    };
                    (error.to_string(), Some(error))
                }
                Execution::Failed(err) => (
                    format!("ERROR: {err}"),
                    Some(StepError::Failed(format!("{err:#?}"))),
                ),
            };
            self.append(step, &decision, result, error);
        }

        warn!(max_steps, "step budget exhausted without completing the task");
        Ok(self.finish(Outcome::Exhausted))
    }

    fn append(
        &mut self,
        step: usize,
        decision: &Decision,
        result: String,
        error: Option<StepError>,
    ) {
        let record = StepRecord {
            step,
            action: decision.action.clone(),
            args: decision.args.clone(),
            result,
            error,
        };
        self.sink.record_step(&record);
        self.history.push(record);
    }

    fn finish(self, outcome: Outcome) -> RunReport {
        if let Outcome::Completed(result) = &outcome {
            info!(steps = self.history.len(), "task completed: {result}");
        }
        RunReport {
            outcome,
            history: self.history,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_requires_every_pattern() {
        let rule = CompletionRule::parse("market.yandex&search").unwrap();
        assert!(rule.matches("https://market.yandex.ru/search?text=phone"));
        assert!(!rule.matches("https://market.yandex.ru/"));
        assert_eq!(rule.result, FAST_PATH_RESULT);
    }

    #[test]
    fn rule_accepts_custom_result() {
        let rule = CompletionRule::parse("youtube.com/watch=>Video opened.").unwrap();
        assert_eq!(rule.patterns, vec!["youtube.com/watch".to_string()]);
        assert_eq!(rule.result, "Video opened.");
    }

    #[test]
    fn rule_keeps_query_string_patterns() {
        let rule = CompletionRule::parse("youtube.com/watch?v=").unwrap();
        assert_eq!(rule.patterns, vec!["youtube.com/watch?v=".to_string()]);
        assert_eq!(rule.result, FAST_PATH_RESULT);
        assert!(rule.matches("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(!rule.matches("https://www.youtube.com/watch?list=abc"));

        let rule = CompletionRule::parse("search?text=phone&market=>Results shown.").unwrap();
        assert_eq!(
            rule.patterns,
            vec!["search?text=phone".to_string(), "market".to_string()]
        );
        assert_eq!(rule.result, "Results shown.");
    }

    #[test]
    fn rule_with_blank_result_uses_default() {
        let rule = CompletionRule::parse("youtube.com/watch =>  ").unwrap();
        assert_eq!(rule.patterns, vec!["youtube.com/watch".to_string()]);
        assert_eq!(rule.result, FAST_PATH_RESULT);
    }

    #[test]
    fn rule_without_pattern_is_rejected() {
        assert!(CompletionRule::parse(" & =>done").is_err());
    }

    #[test]
    fn default_settings_disable_fast_path() {
        let settings = AgentSettings::default();
        assert!(settings.fast_path("https://www.youtube.com/watch?v=x").is_none());
        assert_eq!(settings.action_timeout, Duration::from_secs(10));
    }
}

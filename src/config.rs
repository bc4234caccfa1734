use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::agent::{AgentSettings, CompletionRule};
use crate::brain::Provider;
use crate::hands::LaunchConfig;
use crate::types::DEFAULT_MAX_STEPS;

/// Drives a browser through natural-language tasks, one action at a time.
#[derive(Debug, Clone, Parser)]
#[command(name = "agent", version, about)]
pub struct Config {
    /// Which LLM API decides the next action.
    #[arg(long, value_enum, default_value = "openai", env = "AGENT_PROVIDER")]
    pub provider: Provider,

    /// Model name; defaults to a small model of the chosen provider.
    #[arg(long, env = "AGENT_MODEL")]
    pub model: Option<String>,

    /// Step budget per task.
    #[arg(long, default_value_t = DEFAULT_MAX_STEPS)]
    pub max_steps: usize,

    /// Seconds one action may take before the step is abandoned.
    #[arg(long, default_value_t = 10)]
    pub action_timeout_secs: u64,

    /// URL patterns that end a task without asking the LLM, as
    /// `PATTERN[&PATTERN...][=>RESULT]`. Repeatable.
    #[arg(long = "complete-on-url", value_parser = CompletionRule::parse)]
    pub completion_rules: Vec<CompletionRule>,

    #[arg(long)]
    pub headless: bool,

    #[arg(long, env = "CHROME_PATH")]
    pub chrome_path: Option<PathBuf>,

    /// Attach to a running Chrome via its DevTools websocket URL.
    #[arg(long)]
    pub connect: Option<String>,

    /// Keep cookies and logins between launches.
    #[arg(long)]
    pub persistent_profile: bool,

    /// Take tasks from a local web page instead of stdin.
    #[arg(long)]
    pub serve: bool,

    #[arg(long, default_value_t = 3000)]
    pub port: u16,
}

impl Config {
    pub fn agent_settings(&self) -> AgentSettings {
        AgentSettings {
            max_steps: self.max_steps,
            action_timeout: Duration::from_secs(self.action_timeout_secs),
            completion_rules: self.completion_rules.clone(),
        }
    }

    pub fn launch_config(&self) -> LaunchConfig {
        LaunchConfig {
            headless: self.headless,
            chrome_path: self.chrome_path.clone(),
            connect: self.connect.clone(),
            persistent_profile: self.persistent_profile,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_agent_constants() {
        let config = Config::try_parse_from(["agent", "--provider", "anthropic"]).unwrap();
        assert_eq!(config.provider, Provider::Anthropic);
        let settings = config.agent_settings();
        assert_eq!(settings.max_steps, DEFAULT_MAX_STEPS);
        assert_eq!(settings.action_timeout, Duration::from_secs(10));
        assert!(settings.completion_rules.is_empty());
    }

    #[test]
    fn completion_rules_are_repeatable() {
        let config = Config::try_parse_from([
            "agent",
            "--provider",
            "openai",
            "--complete-on-url",
            "youtube.com/watch?v=>Video opened.",
            "--complete-on-url",
            "market.yandex&search",
        ])
        .unwrap();
        assert_eq!(config.completion_rules.len(), 2);
        assert_eq!(
            config.completion_rules[0].patterns,
            vec!["youtube.com/watch?v".to_string()]
        );
        assert_eq!(config.completion_rules[1].patterns.len(), 2);
    }

    #[test]
    fn empty_completion_rule_is_a_usage_error() {
        assert!(Config::try_parse_from(["agent", "--complete-on-url", "=>"]).is_err());
    }
}

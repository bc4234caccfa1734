//! Autonomous browser agent: snapshot the page, ask an LLM for the next
//! action, execute it, repeat until the task is done or the step budget
//! runs out.

pub mod actions;
pub mod agent;
pub mod brain;
pub mod config;
pub mod dom;
pub mod face;
pub mod hands;
pub mod logging;
pub mod trace;
pub mod types;

pub use agent::{AgentError, AgentRun, AgentSettings, CompletionRule};
pub use brain::{Brain, DecisionOracle, OracleRequest};
pub use hands::{BrowserSession, Page};
pub use trace::TraceSink;
pub use types::{Decision, Outcome, RunReport, Snapshot, StepError, StepRecord};

use std::io::Write;

use anyhow::{Result, anyhow};
use browser_agent::agent::{AgentError, AgentRun, AgentSettings};
use browser_agent::brain::Brain;
use browser_agent::config::Config;
use browser_agent::face::{self, AgentEvent, BroadcastSink};
use browser_agent::hands::BrowserSession;
use browser_agent::logging;
use browser_agent::trace::LogSink;
use browser_agent::types::{Outcome, RunReport};
use clap::Parser;
use dotenvy::dotenv;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};

const EXIT_WORDS: [&str; 3] = ["exit", "quit", "q"];

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    logging::init();
    let config = Config::parse();

    // Fail on a missing credential before paying for a browser launch.
    let brain = Brain::new(config.provider, config.model.clone())?;
    let settings = config.agent_settings();

    let launch = config.launch_config();
    let mut session = tokio::task::spawn_blocking(move || BrowserSession::launch(&launch))
        .await
        .map_err(|e| anyhow!("browser launch panicked: {e}"))??;

    let outcome = if config.serve {
        serve(&mut session, &brain, &settings, config.port).await
    } else {
        prompt_loop(&mut session, &brain, &settings).await
    };

    info!("closing browser");
    session.close();
    outcome
}

/// Reads tasks from stdin until EOF or an exit word.
async fn prompt_loop(
    session: &mut BrowserSession,
    brain: &Brain,
    settings: &AgentSettings,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("Task (or 'exit'): ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let task = line.trim();
        if task.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&task.to_lowercase().as_str()) {
            break;
        }

        let run = AgentRun::new(task, &mut *session, brain, &LogSink, settings);
        match run.run().await {
            Ok(report) => print_report(&report),
            Err(AgentError::PageUnavailable) => return Err(AgentError::PageUnavailable.into()),
            Err(err) => error!("task aborted: {err}"),
        }
    }
    Ok(())
}

fn print_report(report: &RunReport) {
    println!("\n=== RESULT ===");
    match &report.outcome {
        Outcome::Completed(result) => println!("{result}"),
        Outcome::Exhausted => println!(
            "Step budget exhausted after {} steps without completing the task.",
            report.history.len()
        ),
    }
    println!("=== END OF TASK ===\n");
}

/// Runs tasks submitted from the web console, one at a time.
async fn serve(
    session: &mut BrowserSession,
    brain: &Brain,
    settings: &AgentSettings,
    port: u16,
) -> Result<()> {
    let (mut cmd_rx, events) = face::start_server(port).await?;
    let sink = (LogSink, BroadcastSink::new(events.clone()));

    while let Some(task) = cmd_rx.recv().await {
        info!(%task, "task received from web console");
        let run = AgentRun::new(task, &mut *session, brain, &sink, settings);
        let event = match run.run().await {
            Ok(report) => match report.outcome {
                Outcome::Completed(result) => AgentEvent::TaskComplete { result },
                Outcome::Exhausted => AgentEvent::TaskExhausted {
                    steps: report.history.len(),
                },
            },
            Err(err) => {
                error!("task aborted: {err}");
                AgentEvent::TaskError {
                    message: err.to_string(),
                }
            }
        };
        let _ = events.send(event);
        let _ = events.send(AgentEvent::Ready);
    }
    Ok(())
}

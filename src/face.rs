//! Local web console: submit tasks from a page and watch the step trace live
//! over Server-Sent Events.

use std::convert::Infallible;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::response::Html;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, error, info};

use crate::trace::TraceSink;
use crate::types::StepRecord;

/// Events streamed to the page.
#[derive(Clone, Debug)]
pub enum AgentEvent {
    Step(StepRecord),
    TaskComplete { result: String },
    TaskExhausted { steps: usize },
    TaskError { message: String },
    Ready,
}

impl AgentEvent {
    fn to_sse_event(&self) -> Result<Event, axum::Error> {
        match self {
            AgentEvent::Step(record) => Event::default().event("step").json_data(record),
            AgentEvent::TaskComplete { result } => Event::default()
                .event("task_complete")
                .json_data(serde_json::json!({ "result": result })),
            AgentEvent::TaskExhausted { steps } => Event::default()
                .event("task_exhausted")
                .json_data(serde_json::json!({ "steps": steps })),
            AgentEvent::TaskError { message } => Event::default()
                .event("task_error")
                .json_data(serde_json::json!({ "message": message })),
            AgentEvent::Ready => Ok(Event::default().event("ready").data("{}")),
        }
    }
}

/// Forwards every step record to connected pages.
#[derive(Clone)]
pub struct BroadcastSink {
    events: broadcast::Sender<AgentEvent>,
}

impl BroadcastSink {
    pub fn new(events: broadcast::Sender<AgentEvent>) -> Self {
        Self { events }
    }
}

impl TraceSink for BroadcastSink {
    fn record_step(&self, record: &StepRecord) {
        // No subscribers is fine.
        let _ = self.events.send(AgentEvent::Step(record.clone()));
    }
}

#[derive(Clone)]
struct AppState {
    cmd_tx: mpsc::Sender<String>,
    event_tx: broadcast::Sender<AgentEvent>,
}

#[derive(Deserialize)]
struct CommandPayload {
    command: String,
}

/// Binds the first free port from `port` upward and serves the console.
/// Returns submitted tasks and the event channel.
pub async fn start_server(
    port: u16,
) -> Result<(mpsc::Receiver<String>, broadcast::Sender<AgentEvent>)> {
    let (cmd_tx, cmd_rx) = mpsc::channel::<String>(1);
    let (event_tx, _) = broadcast::channel::<AgentEvent>(64);

    let state = Arc::new(AppState {
        cmd_tx,
        event_tx: event_tx.clone(),
    });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/command", post(command_handler))
        .route("/events", get(sse_handler))
        .route(
            "/favicon.ico",
            get(|| async { axum::http::StatusCode::NO_CONTENT }),
        )
        .with_state(state);

    let mut bound = None;
    for candidate in port..port.saturating_add(10) {
        if let Ok(listener) = tokio::net::TcpListener::bind(("127.0.0.1", candidate)).await {
            bound = Some((listener, candidate));
            break;
        }
    }
    let (listener, port) =
        bound.ok_or_else(|| anyhow!("no free port in {port}..{}", port.saturating_add(10)))?;

    info!("web console at http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!("web console stopped: {err}");
        }
    });

    Ok((cmd_rx, event_tx))
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn command_handler(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CommandPayload>,
) -> &'static str {
    debug!(command = %payload.command, "task submitted");
    let _ = state.cmd_tx.send(payload.command).await;
    "ok"
}

async fn sse_handler(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.event_tx.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| {
        result
            .ok()
            .and_then(|event| event.to_sse_event().ok())
            .map(Ok::<_, Infallible>)
    });
    Sse::new(stream)
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>Browser Agent</title>
<style>
  body { margin: 0; background: #0b0b10; color: #ddd; font-family: system-ui, sans-serif;
         height: 100vh; display: flex; flex-direction: column; }
  header { padding: 18px 28px; border-bottom: 1px solid #1c1c2a; font-weight: 600; }
  main { flex: 1; display: flex; flex-direction: column; gap: 12px; max-width: 820px;
         width: 100%; margin: 0 auto; padding: 20px 28px; box-sizing: border-box; overflow: hidden; }
  #log { flex: 1; overflow-y: auto; display: flex; flex-direction: column; gap: 6px; }
  .entry { padding: 8px 12px; border-radius: 6px; font-size: 14px; border-left: 3px solid #3b82f6;
           background: #13131b; white-space: pre-wrap; }
  .entry.step { font-family: ui-monospace, monospace; font-size: 13px; }
  .entry.blocked { border-color: #f59e0b; }
  .entry.error { border-color: #ef4444; color: #fca5a5; }
  .entry.done { border-color: #22c55e; color: #86efac; }
  .entry.user { border-color: #6366f1; }
  form { display: flex; gap: 8px; }
  input { flex: 1; background: #13131b; border: 1px solid #262633; border-radius: 6px;
          padding: 10px 14px; color: #fff; font-size: 15px; }
  button { background: #6366f1; color: #fff; border: 0; border-radius: 6px; padding: 10px 20px; }
  button:disabled, input:disabled { opacity: 0.5; }
</style>
</head>
<body>
<header>Browser Agent</header>
<main>
  <div id="log"></div>
  <form id="form">
    <input id="cmd" placeholder="Describe a task..." autofocus>
    <button id="send">Run</button>
  </form>
</main>
<script>
  const log = document.getElementById('log');
  const cmd = document.getElementById('cmd');
  const send = document.getElementById('send');

  function add(cls, text) {
    const div = document.createElement('div');
    div.className = 'entry ' + cls;
    div.textContent = text;
    log.appendChild(div);
    log.scrollTop = log.scrollHeight;
  }

  function busy(b) { cmd.disabled = b; send.disabled = b; if (!b) cmd.focus(); }

  document.getElementById('form').addEventListener('submit', async e => {
    e.preventDefault();
    const text = cmd.value.trim();
    if (!text) return;
    cmd.value = '';
    add('user', 'Task: ' + text);
    busy(true);
    await fetch('/command', {
      method: 'POST',
      headers: {'Content-Type': 'application/json'},
      body: JSON.stringify({command: text}),
    });
  });

  const es = new EventSource('/events');
  es.addEventListener('step', e => {
    const r = JSON.parse(e.data);
    const kind = !r.error ? 'step' : (r.error.kind === 'policy_blocked' ? 'step blocked' : 'step error');
    add(kind, '#' + r.step + ' ' + r.action + ' ' + JSON.stringify(r.args) + '\n' + r.result);
  });
  es.addEventListener('task_complete', e => { add('done', 'Done: ' + JSON.parse(e.data).result); });
  es.addEventListener('task_exhausted', e => {
    add('error', 'Step budget of ' + JSON.parse(e.data).steps + ' exhausted.');
  });
  es.addEventListener('task_error', e => { add('error', 'Task failed: ' + JSON.parse(e.data).message); });
  es.addEventListener('ready', () => busy(false));

  add('done', 'Agent ready.');
</script>
</body>
</html>
"##;

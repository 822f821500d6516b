//! Stdio Server
//!
//! Newline-delimited JSON in both directions. Each input line is one command;
//! each output line is either a command reply or a [`ReviewEvent`] relayed
//! from the shared session.
//!
//! ```text
//!   stdin ──▶ {"command":"submit-review","personaKey":"security","code":"..."}
//!   stdout ◀── {"type":"reply","command":"submit-review","ok":true,...}
//!   stdout ◀── {"type":"state-changed","state":{...}}
//!   stdout ◀── {"type":"stream-chunk","chunk":"...","accumulatedSoFar":"..."}
//!   stdout ◀── {"type":"stream-end","finalResult":"..."}
//! ```
//!
//! When stdin closes the server waits for an in-flight review to finish and
//! relays its remaining events before returning.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use codepulse_core::{
    AdmissionError, BridgeConfig, NavigationDirection, PersonaCatalog, Provider, ReviewEvent,
    ReviewHandle, ReviewOrchestrator, ReviewProvider, SessionState, SessionStore, Strictness,
    SubscriberRegistry,
};

/// Buffer for the stdio subscriber; generous since stdout may block briefly
const STDIO_SUBSCRIBER_BUFFER: usize = 1024;

/// One input line
#[derive(Debug, Deserialize)]
struct Request {
    /// Echoed back in the reply
    #[serde(default)]
    id: Option<Value>,
    #[serde(flatten)]
    command: Command,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
enum Command {
    #[serde(rename_all = "camelCase")]
    SubmitReview {
        persona_key: String,
        #[serde(default)]
        code: Option<String>,
    },
    SetStrictness {
        level: i64,
    },
    NavigateHistory {
        direction: NavigationDirection,
    },
    Status,
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::SubmitReview { .. } => "submit-review",
            Self::SetStrictness { .. } => "set-strictness",
            Self::NavigateHistory { .. } => "navigate-history",
            Self::Status => "status",
        }
    }
}

#[derive(Debug, Serialize)]
struct ReplyError {
    code: &'static str,
    message: String,
}

/// One reply line
#[derive(Debug, Serialize)]
struct Reply {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    command: Option<&'static str>,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ReplyError>,
}

impl Reply {
    fn ok(id: Option<Value>, command: &'static str, result: Value) -> Self {
        Self {
            kind: "reply",
            id,
            command: Some(command),
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    fn rejected(id: Option<Value>, command: &'static str, error: &AdmissionError) -> Self {
        Self {
            kind: "reply",
            id,
            command: Some(command),
            ok: false,
            result: None,
            error: Some(ReplyError {
                code: error.code(),
                message: error.to_string(),
            }),
        }
    }

    fn invalid(message: String) -> Self {
        Self {
            kind: "reply",
            id: None,
            command: None,
            ok: false,
            result: None,
            error: Some(ReplyError {
                code: "invalid-command",
                message,
            }),
        }
    }
}

/// Serves one session over a line-oriented reader/writer pair
pub struct StdioServer<P: ReviewProvider> {
    orchestrator: ReviewOrchestrator<P>,
    registry: SubscriberRegistry,
}

impl<P: ReviewProvider + 'static> StdioServer<P> {
    /// Create a server with a fresh session at `default_strictness`
    pub fn new(provider: P, default_strictness: Strictness) -> Self {
        let registry = SubscriberRegistry::with_buffer(STDIO_SUBSCRIBER_BUFFER);
        let store = SessionStore::from_state(SessionState::with_strictness(default_strictness));
        let orchestrator = ReviewOrchestrator::with_store(
            provider,
            PersonaCatalog::builtin(),
            store,
            Arc::new(registry.clone()),
        );
        Self {
            orchestrator,
            registry,
        }
    }

    /// Process commands until `reader` is exhausted
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let (subscriber, mut events) = self
            .registry
            .subscribe("stdio", self.orchestrator.snapshot());
        let mut lines = reader.lines();
        let mut pending: Option<ReviewHandle> = None;

        loop {
            tokio::select! {
                biased;
                Some(event) = events.recv() => write_line(&mut writer, &event).await?,
                line = lines.next_line() => {
                    let Some(line) = line.context("Failed to read command")? else {
                        debug!("Input closed");
                        break;
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let reply = self.handle_line(&line, &mut pending);
                    write_line(&mut writer, &reply).await?;
                }
            }
        }

        if let Some(handle) = pending.take() {
            drain_until_done(handle, &mut events, &mut writer).await?;
        }
        while let Ok(event) = events.try_recv() {
            write_line(&mut writer, &event).await?;
        }

        self.registry.unsubscribe(&subscriber);
        Ok(())
    }

    fn handle_line(&self, line: &str, pending: &mut Option<ReviewHandle>) -> Reply {
        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Unreadable command");
                return Reply::invalid(e.to_string());
            }
        };
        let name = request.command.name();
        debug!(command = name, "Handling command");

        match request.command {
            Command::SubmitReview { persona_key, code } => {
                match self.orchestrator.submit_review(&persona_key, code) {
                    Ok(accepted) => {
                        let result = json!({
                            "personaKey": accepted.persona_key,
                            "strictnessLevel": accepted.strictness_level,
                        });
                        *pending = Some(accepted.handle);
                        Reply::ok(request.id, name, result)
                    }
                    Err(e) => Reply::rejected(request.id, name, &e),
                }
            }
            Command::SetStrictness { level } => match self.orchestrator.set_strictness(level) {
                Ok(strictness) => Reply::ok(
                    request.id,
                    name,
                    json!({ "level": strictness, "label": strictness.label() }),
                ),
                Err(e) => Reply::rejected(request.id, name, &e),
            },
            Command::NavigateHistory { direction } => {
                let entry = self.orchestrator.navigate_history(direction);
                Reply::ok(request.id, name, json!({ "entry": entry }))
            }
            Command::Status => Reply::ok(request.id, name, json!(self.orchestrator.status())),
        }
    }
}

async fn drain_until_done<W>(
    handle: ReviewHandle,
    events: &mut mpsc::Receiver<ReviewEvent>,
    writer: &mut W,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let outcome = handle.outcome();
    tokio::pin!(outcome);

    loop {
        tokio::select! {
            biased;
            Some(event) = events.recv() => write_line(writer, &event).await?,
            outcome = &mut outcome => {
                debug!(completed = outcome.is_completed(), "In-flight review finished");
                return Ok(());
            }
        }
    }
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_string(value).context("Failed to encode output line")?;
    line.push('\n');
    writer
        .write_all(line.as_bytes())
        .await
        .context("Failed to write output line")?;
    writer.flush().await.context("Failed to flush output")?;
    Ok(())
}

/// Serve the configured provider on stdin/stdout
pub async fn serve(config: BridgeConfig) -> Result<()> {
    let provider = Provider::from_config(config.provider.clone());
    info!(
        provider = provider.name(),
        model = %config.provider.model,
        strictness = config.default_strictness.level(),
        "Serving review session on stdio"
    );

    let server = StdioServer::new(provider, config.default_strictness);
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    server.run(stdin, tokio::io::stdout()).await
}

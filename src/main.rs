use std::collections::HashSet;
use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use secrecy::SecretString;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast;
use weft_core::{
    find_pending_call, AgentEvent, ExecutionMode, FunctionCall, FunctionResponse, Message,
    MessageId, Role, ThreadId, ToolCallId, UserEvent,
};
use weft_engine::{create_default_registry, AgentService, RunnerConfig};
use weft_llm::GeminiProvider;
use weft_store::messages::MessageRepo;
use weft_store::threads::ThreadRepo;
use weft_store::Database;
use weft_telemetry::{init_telemetry, TelemetryConfig};

/// Chat with a Gemini-backed agent from the terminal. Conversations persist
/// in a local SQLite database and can be resumed by thread id.
#[derive(Parser)]
#[command(name = "weft", version, about)]
struct Cli {
    /// SQLite database path. Defaults to ~/.weft/weft.db.
    #[arg(long)]
    db: Option<PathBuf>,

    /// Gemini model name, e.g. gemini-2.5-pro.
    #[arg(long)]
    model: Option<String>,

    /// Resume an existing thread instead of starting a new one.
    #[arg(long)]
    thread: Option<String>,

    /// Directory the document_search tool reads markdown from.
    #[arg(long)]
    docs_root: Option<PathBuf>,

    /// Log filter directive, e.g. info,weft_engine=trace. Overrides WEFT_LOG.
    #[arg(long)]
    log: Option<String>,

    /// Emit logs as newline-delimited JSON.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_telemetry(TelemetryConfig {
        filter: cli.log.clone(),
        json: cli.json_logs,
    });

    let api_key = std::env::var("GEMINI_API_KEY").context("GEMINI_API_KEY is not set")?;
    let provider = Arc::new(GeminiProvider::new(
        SecretString::from(api_key),
        cli.model.as_deref(),
    ));

    let db_path = match &cli.db {
        Some(path) => path.clone(),
        None => default_db_path()?,
    };
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let db = Database::open(&db_path)
        .with_context(|| format!("open database at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "database open");

    let registry = Arc::new(create_default_registry(db.clone(), cli.docs_root.clone()));
    let service = AgentService::new(
        provider,
        db.clone(),
        Arc::clone(&registry),
        RunnerConfig::default(),
    );
    let mut rx = service.subscribe();

    let threads = ThreadRepo::new(db.clone());
    let messages = MessageRepo::new(db);
    let thread_id = match &cli.thread {
        Some(raw) => {
            let id = ThreadId::from_raw(raw.clone());
            threads
                .get(&id)
                .with_context(|| format!("no thread {raw}"))?
                .id
        }
        None => threads.create(None)?.id,
    };
    println!("thread {thread_id}");

    let mut renderer = Renderer::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    // On resume, replay the transcript and settle a client call left hanging
    // when the previous session ended. A leftover server call needs no prompt:
    // the next submitted event resolves or supersedes it.
    let history = messages.list(&thread_id)?;
    render_history(&history);
    if let Some(pending) = find_pending_call(&history) {
        let is_client = registry
            .get(&pending.call.name)
            .is_some_and(|tool| tool.execution_mode() == ExecutionMode::Client);
        if is_client {
            match prompt_approval(&mut lines, &pending.call).await? {
                Some(response) => {
                    let message = Message::user_response(thread_id.clone(), response);
                    service.submit(UserEvent::FunctionResponse { message })?;
                    let end =
                        drain_turn(&service, &mut rx, &mut lines, &mut renderer, &thread_id)
                            .await?;
                    if end == TurnEnd::Quit {
                        return Ok(());
                    }
                }
                None => return Ok(()),
            }
        }
    }

    loop {
        let Some(line) = prompt_line(&mut lines, "you> ").await? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }
        let message = Message::user_text(thread_id.clone(), input);
        service.submit(UserEvent::Text { message })?;
        let end = drain_turn(&service, &mut rx, &mut lines, &mut renderer, &thread_id).await?;
        if end == TurnEnd::Quit {
            return Ok(());
        }
    }

    service.cancel_all();
    Ok(())
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME is not set and --db was not given")?;
    Ok(PathBuf::from(home).join(".weft").join("weft.db"))
}

#[derive(PartialEq)]
enum TurnEnd {
    /// The run finished (or failed); the prompt comes back.
    Done,
    /// Stdin closed or the user declined to resolve a pending call.
    Quit,
}

/// Pump agent events for one turn: stream text deltas, announce tool
/// results, and mediate client tool approvals until the run settles.
async fn drain_turn(
    service: &AgentService,
    rx: &mut broadcast::Receiver<AgentEvent>,
    lines: &mut Lines<BufReader<Stdin>>,
    renderer: &mut Renderer,
    thread_id: &ThreadId,
) -> anyhow::Result<TurnEnd> {
    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                service.cancel(thread_id);
                renderer.finish();
                println!("(cancelled)");
                while rx.try_recv().is_ok() {}
                return Ok(TurnEnd::Done);
            }
            event = rx.recv() => event,
        };
        let event = match event {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event stream lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(TurnEnd::Done),
        };
        if event.thread_id() != thread_id {
            continue;
        }
        match event {
            AgentEvent::IsThinking { .. } => {}
            AgentEvent::Message { message, .. } => renderer.message_delta(&message),
            AgentEvent::FunctionResponse { message, .. } => renderer.tool_results(&message),
            AgentEvent::FunctionCall { message, .. } => {
                renderer.finish();
                let pending = message
                    .function_calls()
                    .into_iter()
                    .find(|call| !message.has_response_for(&call.id))
                    .cloned();
                let Some(call) = pending else { continue };
                match prompt_approval(lines, &call).await? {
                    Some(response) => {
                        let message = Message::user_response(thread_id.clone(), response);
                        service.submit(UserEvent::FunctionResponse { message })?;
                    }
                    None => {
                        println!("(call left pending; resume with --thread {thread_id})");
                        return Ok(TurnEnd::Quit);
                    }
                }
            }
            AgentEvent::Error { error, .. } => {
                renderer.finish();
                eprintln!("error: {error}");
                return Ok(TurnEnd::Done);
            }
            AgentEvent::Complete { .. } => {
                renderer.finish();
                return Ok(TurnEnd::Done);
            }
        }
    }
}

/// Show the call to the user and turn their answer into a functionResponse.
/// Returns `None` when stdin closes or the user interrupts.
async fn prompt_approval(
    lines: &mut Lines<BufReader<Stdin>>,
    call: &FunctionCall,
) -> anyhow::Result<Option<FunctionResponse>> {
    println!("[{} awaits your approval]", call.name);
    match call.args.get("prompt").and_then(|value| value.as_str()) {
        Some(prompt) => println!("  {prompt}"),
        None => println!("  args: {}", call.args),
    }
    let Some(answer) = prompt_line(lines, "allow? [y/N] ").await? else {
        return Ok(None);
    };
    let approved = matches!(answer.trim().to_lowercase().as_str(), "y" | "yes");
    Ok(Some(FunctionResponse::ok(
        call.id.clone(),
        &call.name,
        json!({ "confirmed": approved }),
    )))
}

async fn prompt_line(
    lines: &mut Lines<BufReader<Stdin>>,
    prompt: &str,
) -> anyhow::Result<Option<String>> {
    print!("{prompt}");
    let _ = std::io::stdout().flush();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!();
            Ok(None)
        }
        line = lines.next_line() => Ok(line.context("read stdin")?),
    }
}

fn render_history(history: &[Message]) {
    for message in history {
        let text = message.text();
        if text.is_empty() {
            continue;
        }
        match message.role {
            Role::User => println!("you> {text}"),
            Role::Model => println!("weft> {text}"),
        }
    }
    if !history.is_empty() {
        println!();
    }
}

/// Stdout rendering state for one streamed model message at a time.
struct Renderer {
    current: Option<(MessageId, usize)>,
    seen_responses: HashSet<ToolCallId>,
}

impl Renderer {
    fn new() -> Self {
        Self {
            current: None,
            seen_responses: HashSet::new(),
        }
    }

    /// Print only the unseen suffix of the snapshot. Snapshots for one
    /// message grow monotonically, so the previous snapshot's length always
    /// lands on a char boundary of the next.
    fn message_delta(&mut self, message: &Message) {
        let text = message.text();
        let same = matches!(&self.current, Some((id, _)) if *id == message.id);
        if !same {
            self.finish();
            print!("weft> ");
            self.current = Some((message.id.clone(), 0));
        }
        if let Some((_, printed)) = &mut self.current {
            if text.len() > *printed {
                print!("{}", &text[*printed..]);
                *printed = text.len();
            }
        }
        let _ = std::io::stdout().flush();
    }

    /// Announce each newly resolved call once, ending any open stream line.
    fn tool_results(&mut self, message: &Message) {
        let fresh: Vec<String> = message
            .function_responses()
            .into_iter()
            .filter(|response| self.seen_responses.insert(response.id.clone()))
            .map(|response| {
                let status = if response.is_error() { "error" } else { "ok" };
                format!("[{} {status}]", response.name)
            })
            .collect();
        if fresh.is_empty() {
            return;
        }
        self.finish();
        for line in fresh {
            println!("{line}");
        }
    }

    /// Terminate the line of the in-flight message, if any.
    fn finish(&mut self) {
        if self.current.take().is_some() {
            println!();
        }
    }
}

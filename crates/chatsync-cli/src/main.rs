use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result, bail};
use chatsync_core::{
    AttachmentId, ChatEngine, ChatsyncConfig, Conversation, EngineEvent, LocalFile, LocalFileMaterializer,
    Materializer, SendOutcome, SimulatedMaterializer, SimulatedResponseSource,
};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod commands;
mod render;

use commands::Command;
use render::{EventPrinter, attachment_label};

#[derive(Parser, Debug)]
#[command(name = "chatsync", version, about = "Headless driver for the chat synchronization engine", long_about = None)]
struct Args {
    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print engine events as JSON lines
    #[arg(long)]
    json: bool,

    /// Send this message, wait for the response and exit
    #[arg(short, long)]
    message: Option<String>,

    /// File to attach to the message (repeatable)
    #[arg(short, long)]
    attach: Vec<PathBuf>,

    /// Reference files on disk instead of simulating uploads
    #[arg(long)]
    local_files: bool,

    /// Start with a few sample conversations in the list
    #[arg(long)]
    samples: bool,
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = ChatsyncConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    debug!(?config, "Configuration loaded");

    let source = Arc::new(SimulatedResponseSource::from_config(&config.simulation));
    let materializer: Arc<dyn Materializer> = if args.local_files {
        Arc::new(LocalFileMaterializer)
    } else {
        Arc::new(SimulatedMaterializer::from_config(&config.simulation))
    };

    let mut engine = ChatEngine::new(config.engine.clone(), source, materializer);
    let mut events = engine.subscribe();
    let mut printer = EventPrinter::new(args.json);

    if args.samples {
        for conversation in sample_conversations(SystemTime::now()) {
            engine.insert_conversation(conversation);
        }
    }
    info!("Starting chatsync");

    let result = match args.message.clone() {
        Some(message) => run_once(&mut engine, &mut printer, &mut events, message, &args.attach).await,
        None => run_interactive(&mut engine, &mut printer, &mut events, &args.attach).await,
    };

    engine.shutdown();
    printer.drain(&mut events);
    result
}

/// Conversations the list starts with when `--samples` is given.
fn sample_conversations(now: SystemTime) -> Vec<Conversation> {
    const DAY: Duration = Duration::from_secs(24 * 60 * 60);
    let earlier = |days: u32| now.checked_sub(DAY * days).unwrap_or(now);

    vec![
        Conversation::from_summary("current", "Current chat", chatsync_core::config::DEFAULT_NEW_CONVERSATION_PREVIEW, now),
        Conversation::from_summary(
            "tax-filing",
            "Tax filing questions",
            "When is the deadline for filing taxes?",
            earlier(1),
        ),
        Conversation::from_summary(
            "getting-started",
            "Getting started with GC services",
            "How do I apply for a passport?",
            earlier(2),
        ),
    ]
}

fn local_files(paths: &[PathBuf]) -> Vec<LocalFile> {
    paths
        .iter()
        .filter_map(|path| match LocalFile::from_path(path) {
            Ok(file) => Some(file),
            Err(err) => {
                println!("cannot attach {}: {err}", path.display());
                None
            }
        })
        .collect()
}

async fn run_once(
    engine: &mut ChatEngine,
    printer: &mut EventPrinter,
    events: &mut broadcast::Receiver<EngineEvent>,
    message: String,
    attach: &[PathBuf],
) -> Result<()> {
    if engine.store().active_id().is_none() {
        engine.create_conversation();
    }

    engine.attach(local_files(attach));
    printer.drain(events);
    while engine.uploads().queue_size() > 0 && engine.next_event().await {
        printer.drain(events);
    }

    engine.set_draft(message);
    if let SendOutcome::Rejected(reason) = engine.send().context("Failed to send message")? {
        bail!("Message not sent: {reason}");
    }
    printer.drain(events);

    while engine.next_event().await {
        printer.drain(events);
    }
    Ok(())
}

async fn run_interactive(
    engine: &mut ChatEngine,
    printer: &mut EventPrinter,
    events: &mut broadcast::Receiver<EngineEvent>,
    attach: &[PathBuf],
) -> Result<()> {
    if engine.store().active_id().is_none() {
        engine.create_conversation();
    }
    if !attach.is_empty() {
        engine.attach(local_files(attach));
    }
    println!("{}", commands::HELP);
    printer.drain(events);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match commands::parse(&line) {
                    Ok(Command::Quit) => break,
                    Ok(command) => execute(engine, command),
                    Err(err) => println!("{err}"),
                }
            }
            _ = engine.next_event(), if engine.has_pending_tasks() => {}
        }
        printer.drain(events);
    }
    Ok(())
}

fn execute(engine: &mut ChatEngine, command: Command) {
    match command {
        Command::Send(text) => {
            engine.set_draft(text);
            match engine.send() {
                Ok(SendOutcome::Started(_)) => {}
                Ok(SendOutcome::Rejected(reason)) => println!("not sent: {reason}"),
                Err(err) => println!("send failed: {err}"),
            }
        }
        Command::Attach(paths) => {
            engine.attach(local_files(&paths));
        }
        Command::Remove(id) => {
            if !engine.remove_attachment(AttachmentId(id)) {
                println!("no attachment #{id}");
            }
        }
        Command::Stop => {
            if engine.stop_generating().is_none() {
                println!("nothing to stop");
            }
        }
        Command::New => {
            engine.create_conversation();
        }
        Command::List => {
            for (index, summary) in engine.store().summaries(SystemTime::now()).iter().enumerate() {
                let marker = if summary.is_active { "*" } else { " " };
                println!("{marker} {}. {}  ({})", index + 1, summary.title, summary.updated_label);
                println!("     {}", summary.preview);
            }
        }
        Command::Select(target) => match resolve_conversation(engine, &target) {
            Some(id) => {
                if let Err(err) = engine.select_conversation(&id) {
                    println!("{err}");
                }
            }
            None => println!("no conversation {target}"),
        },
        Command::Delete(target) => match resolve_conversation(engine, &target) {
            Some(id) => {
                engine.delete_conversation(&id);
            }
            None => println!("no conversation {target}"),
        },
        Command::Status => {
            let uploads = engine.uploads();
            println!(
                "uploading: {}, ready: {}, generating: {}",
                uploads.queue_size(),
                uploads.ready().len(),
                engine.is_generating()
            );
            for attachment in uploads.ready() {
                println!("  #{} {}", attachment.id.0, attachment_label(attachment));
            }
        }
        Command::Help => println!("{}", commands::HELP),
        Command::Quit => {}
    }
}

/// Accept either a conversation id or a 1-based position in the list.
fn resolve_conversation(engine: &ChatEngine, target: &str) -> Option<String> {
    let conversations = engine.store().list();
    if let Ok(position) = target.parse::<usize>()
        && let Some(conversation) = position.checked_sub(1).and_then(|i| conversations.get(i))
    {
        return Some(conversation.id().to_string());
    }
    conversations
        .iter()
        .find(|c| c.id() == target)
        .map(|c| c.id().to_string())
}

//! CLI entry point for gptrelay

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use dialoguer::{Confirm, Input};
use gptrelay_agent::{ConversationLoop, NO_ANSWER, NO_CONVERSATION};
use gptrelay_channels::ChannelManager;
use gptrelay_core::bus::MessageBus;
use gptrelay_core::config::{validate_gateway, Config, ConfigLoader};
use gptrelay_core::logging::init_logging;
use gptrelay_core::session::{JsonFilePersistence, SessionStore};
use gptrelay_core::utils::{expand_tilde, mask_secret};
use gptrelay_providers::{AskReply, ChatGptClient, ConversationBackend};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gptrelay")]
#[command(about = "Telegram bot that relays conversations to ChatGPT")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration directory
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize gptrelay configuration
    Onboard,
    /// Run the Telegram gateway
    Gateway,
    /// Send one prompt to ChatGPT and print the answer
    Ask {
        /// Prompt to send
        #[arg(short, long)]
        message: String,
        /// Continue an existing conversation
        #[arg(long)]
        conversation: Option<String>,
        /// Parent message id inside the conversation
        #[arg(long, requires = "conversation")]
        parent: Option<String>,
    },
    /// Manage conversations stored by ChatGPT
    Conversations {
        #[command(subcommand)]
        command: ConversationCommands,
    },
    /// Show or reset persisted user sessions (stop the gateway first)
    Sessions {
        /// Reset the session with this key (e.g. telegram:12345)
        #[arg(long)]
        clear: Option<String>,
    },
    /// Show status information
    Status,
}

#[derive(Subcommand)]
enum ConversationCommands {
    /// List conversations
    List,
    /// Hide all conversations
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_loader = if let Some(dir) = cli.config_dir {
        ConfigLoader::with_dir(dir)
    } else {
        ConfigLoader::new()
    };

    // The gateway installs the full logging stack itself
    if !matches!(cli.command, Commands::Gateway) {
        init_cli_tracing();
    }

    match cli.command {
        Commands::Onboard => run_onboard(&config_loader).await?,
        Commands::Gateway => run_gateway(&config_loader).await?,
        Commands::Ask {
            message,
            conversation,
            parent,
        } => run_ask(&config_loader, message, conversation, parent).await?,
        Commands::Conversations { command } => match command {
            ConversationCommands::List => run_conversations_list(&config_loader).await?,
            ConversationCommands::Clear { yes } => {
                run_conversations_clear(&config_loader, yes).await?
            }
        },
        Commands::Sessions { clear } => run_sessions(&config_loader, clear)?,
        Commands::Status => run_status(&config_loader)?,
    }

    Ok(())
}

fn init_cli_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_sessions(config: &Config) -> Result<SessionStore> {
    let path = expand_tilde(&config.sessions.path);
    SessionStore::open(JsonFilePersistence::new(&path))
        .with_context(|| format!("Failed to load sessions from {}", path.display()))
}

fn backend(config: &Config) -> Result<Arc<dyn ConversationBackend>> {
    if config.chatgpt.access_token.is_empty() {
        anyhow::bail!("chatgpt.access_token is not configured (set CHATGPT_ACCESS_TOKEN)");
    }
    Ok(Arc::new(ChatGptClient::new(config.chatgpt.clone())))
}

async fn run_onboard(loader: &ConfigLoader) -> Result<()> {
    println!("{}", style("Welcome to gptrelay!").bold().cyan());
    println!("Let's set up your configuration.\n");

    let config_path = loader.config_path();
    if config_path.exists() {
        let overwrite = Confirm::new()
            .with_prompt("Configuration already exists. Overwrite?")
            .default(false)
            .interact()?;
        if !overwrite {
            println!("Onboard cancelled.");
            return Ok(());
        }
    }

    let defaults = Config::default();
    let mut config = Config::default();

    config.telegram.bot_token = Input::new()
        .with_prompt("Telegram bot token (from @BotFather)")
        .interact_text()?;
    config.chatgpt.access_token = Input::new()
        .with_prompt("ChatGPT access token")
        .interact_text()?;
    config.chatgpt.base_url = Input::new()
        .with_prompt("ChatGPT backend URL")
        .default(defaults.chatgpt.base_url.clone())
        .interact_text()?;
    config.chatgpt.model = Input::new()
        .with_prompt("Model")
        .default(defaults.chatgpt.model.clone())
        .interact_text()?;
    config.conversation.idle_timeout_secs = Input::new()
        .with_prompt("End idle conversations after (seconds)")
        .default(defaults.conversation.idle_timeout_secs)
        .interact_text()?;

    let developer_chat: String = Input::new()
        .with_prompt("Developer chat id for error reports (empty to disable)")
        .allow_empty(true)
        .interact_text()?;
    let developer_chat = developer_chat.trim();
    config.reporter.developer_chat_id =
        (!developer_chat.is_empty()).then(|| developer_chat.to_string());

    loader.save(&config)?;

    println!(
        "\n{}",
        style("Configuration saved successfully!").green().bold()
    );
    println!("Config location: {}", config_path.display());
    println!("\nYou can now run:");
    println!("  {} - Start the bot", style("gptrelay gateway").cyan());
    println!(
        "  {} - Ask ChatGPT directly",
        style("gptrelay ask --message 'Hello!'").cyan()
    );

    Ok(())
}

async fn run_gateway(loader: &ConfigLoader) -> Result<()> {
    let config = loader.load()?;
    validate_gateway(&config)?;

    let mut logging = config.logging.clone();
    logging.dir = expand_tilde(&logging.dir).to_string_lossy().into_owned();
    let _log_guard = init_logging(&logging);

    println!("{}", style("Starting gptrelay gateway...").bold().cyan());
    println!("Backend: {}", config.chatgpt.base_url);
    println!("Model: {}", config.chatgpt.model);
    println!("Idle timeout: {}s", config.conversation.idle_timeout_secs);

    let sessions = Arc::new(open_sessions(&config)?);
    info!("Loaded {} sessions", sessions.len());

    let bus = MessageBus::new();
    let backend = backend(&config)?;

    let channels = Arc::new(ChannelManager::new(bus.clone()));
    channels.initialize(&config).await?;
    channels.start_all().await?;

    let outbound_handle = {
        let channels = channels.clone();
        tokio::spawn(async move {
            if let Err(e) = channels.dispatch_outbound().await {
                error!("Outbound dispatcher error: {}", e);
            }
        })
    };

    let conversation = ConversationLoop::new(bus.clone(), backend, sessions.clone(), &config);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let loop_handle = tokio::spawn(conversation.run(async move {
        let _ = shutdown_rx.await;
    }));

    println!(
        "\n{}",
        style("Gateway is running. Press Ctrl+C to stop.").green()
    );

    tokio::signal::ctrl_c().await?;
    println!("\n{}", style("Shutting down...").yellow());

    let _ = shutdown_tx.send(());
    match loop_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Conversation loop error: {}", e),
        Err(e) => error!("Conversation loop task failed: {}", e),
    }

    if let Err(e) = channels.stop_all().await {
        error!("Failed to stop channels: {}", e);
    }
    outbound_handle.abort();
    let _ = outbound_handle.await;

    if let Err(e) = sessions.flush() {
        error!("Failed to save sessions: {}", e);
    }

    println!("{}", style("Gateway stopped.").green());
    Ok(())
}

async fn run_ask(
    loader: &ConfigLoader,
    message: String,
    conversation: Option<String>,
    parent: Option<String>,
) -> Result<()> {
    let config = loader.load()?;
    let backend = backend(&config)?;

    // Answers arrive as growing snapshots; only the new suffix is printed
    let last = tokio::task::spawn_blocking(move || -> Result<Option<AskReply>> {
        let stream = backend.ask(&message, conversation.as_deref(), parent.as_deref())?;
        let mut stdout = std::io::stdout();
        let mut shown = String::new();
        let mut last = None;
        for item in stream {
            let reply = item?;
            match reply.text.strip_prefix(shown.as_str()) {
                Some(delta) => write!(stdout, "{}", delta)?,
                None => write!(stdout, "\n{}", reply.text)?,
            }
            stdout.flush()?;
            shown = reply.text.clone();
            last = Some(reply);
        }
        Ok(last)
    })
    .await??;

    match last {
        Some(reply) => {
            if reply.text.trim().is_empty() {
                println!("{}", NO_ANSWER);
            } else {
                println!();
            }
            if let (Some(conversation), Some(parent)) = (&reply.conversation_id, &reply.parent_id) {
                println!(
                    "\n{}",
                    style(format!(
                        "Continue with: gptrelay ask --conversation {} --parent {} --message '...'",
                        conversation, parent
                    ))
                    .dim()
                );
            }
        }
        None => println!("{}", NO_ANSWER),
    }

    Ok(())
}

async fn run_conversations_list(loader: &ConfigLoader) -> Result<()> {
    let config = loader.load()?;
    let backend = backend(&config)?;

    let conversations = tokio::task::spawn_blocking(move || backend.get_conversations()).await??;
    if conversations.is_empty() {
        println!("{}", NO_CONVERSATION);
        return Ok(());
    }

    println!("{}", style("Conversations:").bold());
    for conversation in conversations {
        let title = if conversation.title.trim().is_empty() {
            "(untitled)".to_string()
        } else {
            conversation.title.clone()
        };
        println!("  {} {}", style(&conversation.id).dim(), title);
    }
    Ok(())
}

async fn run_conversations_clear(loader: &ConfigLoader, yes: bool) -> Result<()> {
    let config = loader.load()?;
    let backend = backend(&config)?;

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt("Hide all ChatGPT conversations?")
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Cancelled.");
            return Ok(());
        }
    }

    tokio::task::spawn_blocking(move || backend.clear_conversations()).await??;
    println!("{}", style("All conversations cleared.").green());
    Ok(())
}

fn run_sessions(loader: &ConfigLoader, clear: Option<String>) -> Result<()> {
    let config = loader.load()?;
    let store = open_sessions(&config)?;

    if let Some(key) = clear {
        if !store.contains(&key) {
            println!("No session stored for {}", key);
            return Ok(());
        }
        store.clear(&key);
        store.flush()?;
        println!("{} {}", style("Session reset:").green(), key);
        return Ok(());
    }

    let sessions = store.snapshot();
    if sessions.is_empty() {
        println!("No stored sessions.");
        return Ok(());
    }

    println!("{}", style("Sessions:").bold());
    for (key, session) in sessions {
        println!(
            "  {}  {}  conversation={} parent={}",
            key,
            style(session.state()).cyan(),
            session.conversation_id().unwrap_or("-"),
            session.parent_id().unwrap_or("-"),
        );
    }
    Ok(())
}

fn run_status(loader: &ConfigLoader) -> Result<()> {
    let config = loader.load()?;

    println!("{}", style("gptrelay Status").bold().cyan());
    println!("Version: {}\n", env!("CARGO_PKG_VERSION"));

    println!("{}", style("Configuration:").bold());
    println!("  Config directory: {}", loader.config_dir().display());
    let config_state = if loader.config_path().exists() {
        style("found").green()
    } else {
        style("missing (defaults and environment only)").yellow()
    };
    println!("  Config file: {}", config_state);
    println!();

    println!("{}", style("Telegram:").bold());
    println!("  Bot token: {}", mask_secret(&config.telegram.bot_token));
    if config.telegram.allow_from.is_empty() {
        println!("  Allowed users: everyone");
    } else {
        println!("  Allowed users: {}", config.telegram.allow_from.join(", "));
    }
    println!();

    println!("{}", style("ChatGPT:").bold());
    println!("  Access token: {}", mask_secret(&config.chatgpt.access_token));
    println!("  Backend: {}", config.chatgpt.base_url);
    println!("  Model: {}", config.chatgpt.model);
    println!(
        "  Proxy: {}",
        config.chatgpt.proxy.as_deref().unwrap_or("none")
    );
    println!();

    println!("{}", style("Conversation:").bold());
    println!("  Idle timeout: {}s", config.conversation.idle_timeout_secs);
    let sessions_path = expand_tilde(&config.sessions.path);
    match open_sessions(&config) {
        Ok(store) => println!(
            "  Sessions: {} stored in {}",
            store.len(),
            sessions_path.display()
        ),
        Err(e) => println!("  Sessions: {}", style(format!("{:#}", e)).red()),
    }
    let reporter = match &config.reporter.developer_chat_id {
        Some(chat) => style(format!("chat {}", chat)).green(),
        None => style("disabled".to_string()).dim(),
    };
    println!("  Error reports: {}", reporter);
    println!();

    let ready = validate_gateway(&config);
    match ready {
        Ok(()) => println!("{}", style("Ready to run the gateway.").green()),
        Err(e) => println!("{} {}", style("Not ready:").red(), e),
    }

    Ok(())
}

//! Main module for the docent CLI application.
//!
//! Parses the command line, loads configuration and persisted state, runs the
//! command and saves state again when the command changed it.
//!
//! # Examples
//!
//! ```sh
//! docent init
//! docent agent create "Handbook" -p "Answer from the employee handbook."
//! docent upload <agent-id> handbook.txt
//! docent chat <agent-id> "How many vacation days do I get?" --context
//! ```

use clap::Parser;
use crossterm::{
    ExecutableCommand,
    style::{Attribute, Color, SetAttribute, SetForegroundColor},
};
use once_cell::sync::OnceCell;
use std::{error::Error, fs, io::stdout, path::Path, process::ExitCode};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use docent::commands::{AgentCommands, Cli, Commands};
use docent::config::{self, DocentConfig};
use docent::error::DocentError;
use docent::service::{ChatRequest, Docent};
use docent::store::NewAgent;

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> ExitCode {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt::init();
    });
    let result = tokio::runtime::Runtime::new()
        .map_err(Box::<dyn Error>::from)
        .and_then(|runtime| runtime.block_on(run()));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(err.as_ref()),
    }
}

/// Print `err` and pick the exit status. Provider failures, cancellation and
/// deadlines are reported apart from local errors.
fn report(err: &(dyn Error + 'static)) -> ExitCode {
    match err.downcast_ref::<DocentError>() {
        Some(e) => {
            error!(code = e.error_code(), "{}", e);
            match e {
                DocentError::Cancelled => eprintln!("cancelled"),
                DocentError::Timeout { .. } => eprintln!("timed out: {e}"),
                _ if e.is_provider_error() => eprintln!("provider error: {e}"),
                _ => eprintln!("error: {e}"),
            }
            ExitCode::from(e.exit_code())
        }
        None => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Main asynchronous function of the docent CLI application.
///
/// # Errors
///
/// Returns an error if there is an issue loading the configuration or state, or
/// executing the specified command.
async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => docent::config_dir()?.join("config.yaml"),
    };

    if let Commands::Init = cli.command {
        return init(&config_path);
    }

    debug!("Loading config from: {}", config_path.display());
    let config = config::load_config(
        config_path
            .to_str()
            .ok_or("config path is not valid UTF-8")?,
    )?;
    let docent = Docent::open(config)?;

    // Ctrl-C abandons any in-flight provider call.
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let mutates = cli.command.mutates_state();
    match cli.command {
        Commands::Init => unreachable!("handled above"),
        Commands::Agent(AgentCommands::Create {
            name,
            prompt,
            model,
        }) => {
            let agent = docent
                .create_agent(NewAgent::new(name, prompt, model.unwrap_or_default()))
                .await?;
            println!("{}\t{}\t{}", agent.id, agent.name, agent.model);
        }
        Commands::Agent(AgentCommands::List) => {
            for agent in docent.list_agents().await {
                println!(
                    "{}\t{}\t{}\t{}",
                    agent.id,
                    agent.name,
                    agent.model,
                    agent.created_at.to_rfc3339()
                );
            }
        }
        Commands::Agent(AgentCommands::Delete { id }) => {
            let tombstoned = docent.delete_agent(&id).await?;
            println!("Deleted agent {id} ({tombstoned} documents)");
        }
        Commands::Upload { agent, file, name } => {
            let content = fs::read_to_string(&file)?;
            let name = name.unwrap_or_else(|| {
                file.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| file.display().to_string())
            });
            let id = docent
                .upload_document(&agent, &name, &content, &cancel)
                .await?;
            println!("{id}");
        }
        Commands::Chat {
            agent,
            message,
            context,
        } => {
            let reply = docent
                .chat(&agent, ChatRequest::new(message, context), &cancel)
                .await?;
            let mut stdout = stdout();
            stdout.execute(SetForegroundColor(Color::Blue))?;
            stdout.execute(SetAttribute(Attribute::Bold))?;
            println!("{}", reply.message);
            stdout.execute(SetAttribute(Attribute::Reset))?;
            stdout.execute(SetForegroundColor(Color::Reset))?;
        }
        Commands::History { agent } => {
            let mut stdout = stdout();
            for entry in docent.chat_history(&agent).await? {
                let color = match entry.role {
                    async_openai::types::Role::User => Color::Green,
                    _ => Color::Blue,
                };
                stdout.execute(SetForegroundColor(color))?;
                println!("[{}] {:?}: {}", entry.timestamp.to_rfc3339(), entry.role, entry.content);
            }
            stdout.execute(SetForegroundColor(Color::Reset))?;
        }
        Commands::Search { agent, query, k } => {
            for hit in docent.search(&agent, &query, k, &cancel).await? {
                let preview: String = hit.content.chars().take(80).collect();
                println!("{:.4}\t{}\t{}", hit.distance, hit.id, preview.replace('\n', " "));
            }
        }
    }

    if mutates {
        let dir = docent.save().await?;
        debug!("State saved to {}", dir.display());
    }

    Ok(())
}

/// Write a default configuration file, leaving an existing one untouched.
fn init(config_path: &Path) -> Result<(), Box<dyn Error>> {
    if config_path.exists() {
        info!("Config already exists: {}", config_path.display());
        return Ok(());
    }
    if let Some(dir) = config_path.parent() {
        info!("Creating config directory: {}", dir.display());
        fs::create_dir_all(dir)?;
    }

    info!("Creating config file: {}", config_path.display());
    let config_yaml = serde_yaml::to_string(&DocentConfig::default())?;
    fs::write(config_path, config_yaml)?;
    println!("Wrote {}; set api_key before use.", config_path.display());

    Ok(())
}

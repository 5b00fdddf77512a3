//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a `Cli` struct that represents the parsed command-line arguments,
//! and a `Commands` enum that represents the available subcommands and their
//! options.
//!
//! # Examples
//!
//! ```no_run
//! use clap::Parser;
//! use docent::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! if let Commands::Chat { agent, message, context } = cli.command {
//!     println!("{agent}: {message} (context: {context})");
//! }
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::vector_store::DEFAULT_TOP_K;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Path to config.yaml. Defaults to the platform config directory.
    #[arg(long, global = true, env = "DOCENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Write a default configuration file.
    Init,

    /// Manage agents.
    #[command(subcommand)]
    Agent(AgentCommands),

    /// Embed a text file and attach it to an agent.
    #[clap(name = "upload", alias = "u")]
    Upload {
        agent: String,
        file: PathBuf,

        /// Document name. Defaults to the file name.
        #[arg(long, short = 'n')]
        name: Option<String>,
    },

    /// Send one message to an agent.
    #[clap(name = "chat", alias = "c")]
    Chat {
        agent: String,
        message: String,

        /// Retrieve the agent's closest documents as context.
        #[arg(long, short = 'c')]
        context: bool,
    },

    /// Print an agent's chat history.
    History { agent: String },

    /// Show the documents closest to a query without generating a reply.
    #[clap(name = "search", alias = "s")]
    Search {
        agent: String,
        query: String,

        #[arg(short = 'k', long, default_value_t = DEFAULT_TOP_K)]
        k: usize,
    },
}

#[derive(Subcommand, Debug)]
pub enum AgentCommands {
    /// Register a new agent.
    Create {
        name: String,

        /// System prompt sent before every message.
        #[arg(long, short = 'p')]
        prompt: String,

        /// Model selector. Defaults to `default_model` from the config.
        #[arg(long, short = 'm')]
        model: Option<String>,
    },

    /// List agents, oldest first.
    #[clap(alias = "ls")]
    List,

    /// Delete an agent with its documents and history.
    #[clap(alias = "rm")]
    Delete { id: String },
}

impl Commands {
    /// Whether the command changes persisted state.
    pub fn mutates_state(&self) -> bool {
        match self {
            Commands::Agent(AgentCommands::List) => false,
            Commands::Agent(_) | Commands::Upload { .. } | Commands::Chat { .. } => true,
            Commands::Init | Commands::History { .. } | Commands::Search { .. } => false,
        }
    }
}

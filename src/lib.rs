//! # Docent (library root)
//!
//! This crate provides the plumbing for the **docent** CLI and library: chat
//! agents that answer with retrieved document context.
//!
//! - Exact nearest-neighbor vector index with tombstones and persistence (`vector_store`).
//! - Context assembly and message construction (`retrieval`).
//! - Agents, documents and chat history (`store`).
//! - Embedding and generation providers over OpenAI-compatible APIs (`api`).
//! - The service facade tying them together (`service`).
//! - CLI parsing (`commands`) and YAML configuration (`config`).
//!
//! ## Layout on disk
//! - Configuration: `config_dir()/config.yaml`
//! - State: `data_dir()/index.bin` (bincode) and `data_dir()/store.yaml`,
//!   unless `data_dir` is set in the configuration.
//!
//! ## Modules
//! - [`api`], [`commands`], [`config`], [`error`], [`retrieval`], [`service`],
//!   [`store`], [`vector_store`]

use directories::ProjectDirs;
use std::error::Error;
use std::path::PathBuf;

pub mod api;
pub mod commands;
pub mod config;
pub mod error;
pub mod retrieval;
pub mod service;
pub mod store;
pub mod vector_store;

fn project_dirs() -> Result<ProjectDirs, Box<dyn Error>> {
    let proj_dirs =
        ProjectDirs::from("com", "docent", "docent").ok_or("Unable to determine home directory")?;
    Ok(proj_dirs)
}

/// Return the per-platform configuration directory used by docent.
///
/// The directory is **not** created by this function; callers that need it should
/// create it with `fs::create_dir_all`.
///
/// # Examples
/// ```rust
/// let cfg = docent::config_dir().expect("has a config dir");
/// println!("config at {}", cfg.display());
/// ```
pub fn config_dir() -> Result<PathBuf, Box<dyn Error>> {
    Ok(project_dirs()?.config_dir().to_path_buf())
}

/// Return the per-platform directory holding the index and the store.
pub fn data_dir() -> Result<PathBuf, Box<dyn Error>> {
    Ok(project_dirs()?.data_dir().to_path_buf())
}

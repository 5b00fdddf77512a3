//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the `DocentConfig` struct, which holds the configuration parameters,
//! and a `load_config` function to load the configuration from a file.
//!
//! # Examples
//!
//! Loading the configuration from a file:
//!
//! ```no_run
//! use docent::config::{DocentConfig, load_config};
//!
//! let config_file_path = "/path/to/config.yaml";
//! let config: DocentConfig = load_config(config_file_path).unwrap();
//! println!("{:?}", config);
//! ```

use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};

use tracing::*;

use crate::error::{DocentError, Result};
use crate::retrieval::{ContextBudget, RetrievalSettings};
use crate::vector_store::{DEFAULT_DIMENSION, DEFAULT_TOP_K};

/// Represents the application's configuration.
///
/// Every field except `api_key` has a default, so a minimal file only needs the key.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
#[serde(default)]
pub struct DocentConfig {
    /// The API key used to authenticate requests to the API.
    pub api_key: String,

    /// The base URL of the OpenAI-compatible API.
    pub api_base: String,

    /// Model used to embed documents and queries.
    pub embedding_model: String,

    /// Dimension of every stored embedding. Must match `embedding_model`.
    pub embedding_dimension: usize,

    // Model assigned to agents created without one.
    pub default_model: String,

    // Neighbors retrieved per context-enabled chat.
    pub top_k: usize,

    // Optional cap on the rendered context.
    pub context_budget: Option<ContextBudget>,

    // Per-request deadline for provider calls.
    pub request_timeout_secs: Option<u64>,

    // Where index.bin and store.yaml live. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
}

impl Default for DocentConfig {
    fn default() -> Self {
        Self {
            api_key: "CHANGEME".to_string(),
            api_base: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimension: DEFAULT_DIMENSION,
            default_model: "gpt-4".to_string(),
            top_k: DEFAULT_TOP_K,
            context_budget: None,
            request_timeout_secs: None,
            data_dir: None,
        }
    }
}

impl DocentConfig {
    /// Reject values that would make the index or retrieval unusable.
    pub fn validate(&self) -> Result<()> {
        if self.embedding_dimension == 0 {
            return Err(DocentError::Config(
                "embedding_dimension must be positive".into(),
            ));
        }
        if self.top_k == 0 {
            return Err(DocentError::Config("top_k must be positive".into()));
        }
        if matches!(self.context_budget, Some(budget) if budget.max_chars == 0) {
            return Err(DocentError::Config(
                "context_budget.max_chars must be positive".into(),
            ));
        }
        if self.request_timeout_secs == Some(0) {
            return Err(DocentError::Config(
                "request_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the state directory, falling back to the platform data dir.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => crate::data_dir().map_err(|e| DocentError::Config(e.to_string())),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn retrieval_settings(&self) -> RetrievalSettings {
        RetrievalSettings {
            top_k: self.top_k,
            budget: self.context_budget,
            embed_timeout: self.request_timeout(),
        }
    }
}

/// Loads the application's configuration from a YAML file.
///
/// This function reads the file at the given path, parses it as YAML, and
/// validates the result.
///
/// # Errors
///
/// - `DocentError::Io`: the file could not be read.
/// - `DocentError::Yaml`: the file is not a valid configuration.
/// - `DocentError::Config`: a value is out of range.
///
/// # Examples
///
/// ```no_run
/// use docent::config::load_config;
///
/// let config_file_path = "/path/to/config.yaml";
/// match load_config(config_file_path) {
///     Ok(config) => println!("{:?}", config),
///     Err(err) => eprintln!("Error loading config: {}", err),
/// }
/// ```
pub fn load_config(file: &str) -> Result<DocentConfig> {
    debug!("Loading config: {:?}", file);
    let content = fs::read_to_string(file)?;
    let config: DocentConfig = serde_yaml::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::BudgetPolicy;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_valid_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
api_key: "example_api_key"
api_base: "http://example.com"
embedding_model: "example-embedder"
embedding_dimension: 384
default_model: "example_model"
top_k: 5
context_budget:
  max_chars: 4000
  policy: truncate_per_document
request_timeout_secs: 30
data_dir: "/tmp/docent"
"#
        )
        .unwrap();

        let config = load_config(temp_file.path().to_str().unwrap());

        assert!(config.is_ok());
        let config = config.unwrap();
        assert_eq!(config.api_key, "example_api_key");
        assert_eq!(config.api_base, "http://example.com");
        assert_eq!(config.embedding_model, "example-embedder");
        assert_eq!(config.embedding_dimension, 384);
        assert_eq!(config.default_model, "example_model");
        assert_eq!(config.top_k, 5);
        assert_eq!(
            config.context_budget,
            Some(ContextBudget {
                max_chars: 4000,
                policy: BudgetPolicy::TruncatePerDocument
            })
        );
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.data_dir().unwrap(), PathBuf::from("/tmp/docent"));
    }

    #[test]
    fn test_minimal_file_uses_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, r#"api_key: "sk-test""#).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.api_key, "sk-test");
        assert_eq!(config.embedding_dimension, 1536);
        assert_eq!(config.top_k, 3);
        assert_eq!(config.embedding_model, "text-embedding-3-small");
        assert!(config.context_budget.is_none());

        let settings = config.retrieval_settings();
        assert_eq!(settings.top_k, 3);
        assert!(settings.embed_timeout.is_none());
    }

    #[test]
    fn test_load_config_invalid_file() {
        let config = load_config("non/existent/path");
        assert!(matches!(config, Err(DocentError::Io(_))));
    }

    #[test]
    fn test_load_config_invalid_format() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, r#"invalid: config: format"#).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap());
        assert!(config.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let zero_dim = DocentConfig {
            embedding_dimension: 0,
            ..DocentConfig::default()
        };
        assert!(matches!(zero_dim.validate(), Err(DocentError::Config(_))));

        let zero_k = DocentConfig {
            top_k: 0,
            ..DocentConfig::default()
        };
        assert!(zero_k.validate().is_err());

        let zero_budget = DocentConfig {
            context_budget: Some(ContextBudget {
                max_chars: 0,
                policy: BudgetPolicy::Reject,
            }),
            ..DocentConfig::default()
        };
        assert!(zero_budget.validate().is_err());

        assert!(DocentConfig::default().validate().is_ok());
    }
}

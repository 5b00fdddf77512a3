//! # Agent store
//!
//! In-memory bookkeeping for agents, their documents and their chat history.
//!
//! The store is created once at startup and handed to whoever needs it; there
//! is no ambient global state. All maps sit behind one `tokio` reader-writer
//! lock. A YAML snapshot ([`AgentStore::save`] / [`AgentStore::load`]) keeps
//! state between CLI invocations.
//!
//! Deleting an agent removes its documents and chats from the store. The
//! caller is responsible for tombstoning the matching index entries (see
//! [`crate::service::Docent::delete_agent`]).

use async_openai::types::Role;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::error::{DocentError, Result};
use crate::retrieval::DocumentLookup;

/// Fields supplied when registering an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAgent {
    pub name: String,
    pub system_prompt: String,
    pub model: String,
}

impl NewAgent {
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            model: model.into(),
        }
    }
}

/// A named configuration (prompt + model) that scopes documents and chat history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub name: String,
    pub system_prompt: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    /// Assign a fresh id and timestamp.
    pub fn from_new(new: NewAgent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: new.name,
            system_prompt: new.system_prompt,
            model: new.model,
            created_at: Utc::now(),
        }
    }
}

/// An uploaded document. The embedding is computed once, at upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub agent_id: String,
    pub name: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// One line of an agent's chat history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ChatEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreState {
    #[serde(default)]
    agents: HashMap<String, Agent>,
    #[serde(default)]
    documents: HashMap<String, DocumentRecord>,
    #[serde(default)]
    chats: HashMap<String, Vec<ChatEntry>>,
}

/// Process-wide store of agents, documents and chats.
#[derive(Debug, Default)]
pub struct AgentStore {
    state: RwLock<StoreState>,
}

impl AgentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the snapshot at `path`, or start empty when it does not exist.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)?;
        let state: StoreState = serde_yaml::from_str(&content)?;
        info!(
            "Loaded {} agents and {} documents from {}",
            state.agents.len(),
            state.documents.len(),
            path.display()
        );
        Ok(Self {
            state: RwLock::new(state),
        })
    }

    /// Replace the in-memory state with the snapshot at `path`.
    pub async fn load(&self, path: &Path) -> Result<()> {
        let content = fs::read_to_string(path)?;
        let state: StoreState = serde_yaml::from_str(&content)?;
        *self.state.write().await = state;
        Ok(())
    }

    /// Write a YAML snapshot to `path`, replacing any previous file atomically.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let yaml = {
            let state = self.state.read().await;
            serde_yaml::to_string(&*state)?
        };
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let mut file = NamedTempFile::new_in(dir)?;
        file.write_all(yaml.as_bytes())?;
        file.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    pub async fn create_agent(&self, new: NewAgent) -> Agent {
        let agent = Agent::from_new(new);
        self.state
            .write()
            .await
            .agents
            .insert(agent.id.clone(), agent.clone());
        info!("Created agent {} ({})", agent.name, agent.id);
        agent
    }

    /// All agents, oldest first.
    pub async fn list_agents(&self) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self.state.read().await.agents.values().cloned().collect();
        agents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        agents
    }

    pub async fn get_agent(&self, id: &str) -> Result<Agent> {
        self.state
            .read()
            .await
            .agents
            .get(id)
            .cloned()
            .ok_or_else(|| DocentError::AgentNotFound(id.to_string()))
    }

    /// Remove an agent together with its documents and chats.
    ///
    /// Returns the ids of the removed documents.
    pub async fn delete_agent(&self, id: &str) -> Result<Vec<String>> {
        let mut state = self.state.write().await;
        if state.agents.remove(id).is_none() {
            return Err(DocentError::AgentNotFound(id.to_string()));
        }

        let removed: Vec<String> = state
            .documents
            .values()
            .filter(|d| d.agent_id == id)
            .map(|d| d.id.clone())
            .collect();
        for doc_id in &removed {
            state.documents.remove(doc_id);
        }
        state.chats.remove(id);

        info!("Deleted agent {} and {} documents", id, removed.len());
        Ok(removed)
    }

    /// Store a document. Fails if its owning agent no longer exists.
    pub async fn insert_document(&self, record: DocumentRecord) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.agents.contains_key(&record.agent_id) {
            return Err(DocentError::AgentNotFound(record.agent_id));
        }
        state.documents.insert(record.id.clone(), record);
        Ok(())
    }

    pub async fn document(&self, id: &str) -> Option<DocumentRecord> {
        self.state.read().await.documents.get(id).cloned()
    }

    /// Documents of one agent, oldest first.
    pub async fn documents_for_agent(&self, agent_id: &str) -> Vec<DocumentRecord> {
        let mut documents: Vec<DocumentRecord> = self
            .state
            .read()
            .await
            .documents
            .values()
            .filter(|d| d.agent_id == agent_id)
            .cloned()
            .collect();
        documents.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        documents
    }

    /// Append entries to an agent's history.
    pub async fn append_chat(&self, agent_id: &str, entries: Vec<ChatEntry>) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.agents.contains_key(agent_id) {
            return Err(DocentError::AgentNotFound(agent_id.to_string()));
        }
        state
            .chats
            .entry(agent_id.to_string())
            .or_default()
            .extend(entries);
        Ok(())
    }

    pub async fn chat_history(&self, agent_id: &str) -> Result<Vec<ChatEntry>> {
        let state = self.state.read().await;
        if !state.agents.contains_key(agent_id) {
            return Err(DocentError::AgentNotFound(agent_id.to_string()));
        }
        Ok(state.chats.get(agent_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl DocumentLookup for AgentStore {
    async fn document_content(&self, id: &str) -> Result<String> {
        self.state
            .read()
            .await
            .documents
            .get(id)
            .map(|d| d.content.clone())
            .ok_or_else(|| DocentError::DocumentNotFound(id.to_string()))
    }
}

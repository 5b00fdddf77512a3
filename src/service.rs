//! # Service
//!
//! [`Docent`] wires the agent store, the shared vector index and the model
//! providers into the operations the CLI exposes: agent management, document
//! upload, chat with optional retrieved context, and persistence.
//!
//! Provider calls always happen before any lock is taken, so a cancelled or
//! failed embedding never leaves a half-inserted document behind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::{EmbeddingProvider, GenerationProvider, OpenAiProvider, with_cancel};
use crate::config::DocentConfig;
use crate::error::{DocentError, Result};
use crate::retrieval::{
    DocumentLookup, RetrievedDocument, Retriever, SharedIndex, build_messages,
};
use crate::store::{Agent, AgentStore, ChatEntry, DocumentRecord, NewAgent};
use crate::vector_store::{EntryMetadata, VectorIndex};
use async_openai::types::Role;

pub const INDEX_FILE: &str = "index.bin";
pub const STORE_FILE: &str = "store.yaml";

/// One chat turn from the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub use_context: bool,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, use_context: bool) -> Self {
        Self {
            message: message.into(),
            use_context,
        }
    }
}

/// The generated reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    pub message: String,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
}

pub struct Docent {
    config: DocentConfig,
    store: Arc<AgentStore>,
    index: SharedIndex,
    retriever: Retriever,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
}

impl Docent {
    /// Assemble a service from parts.
    ///
    /// # Errors
    /// `Config` if the index dimension differs from `config.embedding_dimension`.
    pub fn from_parts(
        config: DocentConfig,
        store: AgentStore,
        index: VectorIndex,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
    ) -> Result<Self> {
        config.validate()?;
        if index.dimension() != config.embedding_dimension {
            return Err(DocentError::Config(format!(
                "index dimension {} does not match embedding_dimension {}",
                index.dimension(),
                config.embedding_dimension
            )));
        }

        let store = Arc::new(store);
        let index: SharedIndex = Arc::new(RwLock::new(index));
        let lookup: Arc<dyn DocumentLookup> = store.clone();
        let retriever = Retriever::new(index.clone(), lookup, config.retrieval_settings());

        Ok(Self {
            config,
            store,
            index,
            retriever,
            embedder,
            generator,
        })
    }

    /// Fresh, empty state backed by the OpenAI-compatible provider.
    pub fn new(config: DocentConfig) -> Result<Self> {
        let provider = Arc::new(OpenAiProvider::new(&config)?);
        let index = VectorIndex::new(config.embedding_dimension)?;
        Self::from_parts(config, AgentStore::new(), index, provider.clone(), provider)
    }

    /// Load state from the data directory, backed by the OpenAI-compatible provider.
    pub fn open(config: DocentConfig) -> Result<Self> {
        let provider = Arc::new(OpenAiProvider::new(&config)?);
        Self::open_with(config, provider.clone(), provider)
    }

    /// Load state from the data directory with the given providers.
    ///
    /// Missing files mean empty state.
    pub fn open_with(
        config: DocentConfig,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
    ) -> Result<Self> {
        let dir = config.data_dir()?;
        debug!("Opening state in {}", dir.display());
        let index = VectorIndex::open(&dir.join(INDEX_FILE), config.embedding_dimension)?;
        let store = AgentStore::open(&dir.join(STORE_FILE))?;
        Self::from_parts(config, store, index, embedder, generator)
    }

    /// Write the index and the store under the data directory.
    pub async fn save(&self) -> Result<PathBuf> {
        let dir = self.config.data_dir()?;
        fs::create_dir_all(&dir)?;
        self.save_to(&dir).await?;
        Ok(dir)
    }

    async fn save_to(&self, dir: &Path) -> Result<()> {
        self.index.read().await.save(&dir.join(INDEX_FILE))?;
        self.store.save(&dir.join(STORE_FILE)).await?;
        info!("Saved state to {}", dir.display());
        Ok(())
    }

    pub fn config(&self) -> &DocentConfig {
        &self.config
    }

    pub fn index(&self) -> &SharedIndex {
        &self.index
    }

    pub fn store(&self) -> &Arc<AgentStore> {
        &self.store
    }

    /// Register an agent. An empty model falls back to `default_model`.
    pub async fn create_agent(&self, mut new: NewAgent) -> Result<Agent> {
        if new.name.trim().is_empty() {
            return Err(DocentError::InvalidArgument("agent name is empty".into()));
        }
        if new.model.trim().is_empty() {
            new.model = self.config.default_model.clone();
        }
        Ok(self.store.create_agent(new).await)
    }

    pub async fn list_agents(&self) -> Vec<Agent> {
        self.store.list_agents().await
    }

    pub async fn get_agent(&self, agent_id: &str) -> Result<Agent> {
        self.store.get_agent(agent_id).await
    }

    /// Delete an agent and tombstone its index entries.
    ///
    /// Returns the number of index entries tombstoned.
    pub async fn delete_agent(&self, agent_id: &str) -> Result<usize> {
        let removed = self.store.delete_agent(agent_id).await?;
        let tombstoned = self
            .index
            .write()
            .await
            .remove_where(|meta| meta.agent_id == agent_id);
        if tombstoned != removed.len() {
            warn!(
                "Agent {} had {} documents but {} index entries",
                agent_id,
                removed.len(),
                tombstoned
            );
        }
        Ok(tombstoned)
    }

    /// Embed `content`, index it and record it for `agent_id`.
    ///
    /// Returns the new document id.
    pub async fn upload_document(
        &self,
        agent_id: &str,
        name: &str,
        content: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.store.get_agent(agent_id).await?;

        let embedding = with_cancel(
            self.embedder.embed(content),
            cancel,
            self.config.request_timeout(),
        )
        .await?;

        let id = Uuid::new_v4().to_string();
        self.index.write().await.insert(
            id.clone(),
            embedding.clone(),
            EntryMetadata::new(agent_id, name),
        )?;

        let record = DocumentRecord {
            id: id.clone(),
            agent_id: agent_id.to_string(),
            name: name.to_string(),
            content: content.to_string(),
            embedding,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.insert_document(record).await {
            // Agent vanished while we were embedding.
            self.index.write().await.remove(&id);
            return Err(e);
        }

        info!("Uploaded {} as {} for agent {}", name, id, agent_id);
        Ok(id)
    }

    /// Generate a reply for one chat turn and record it in the agent's history.
    pub async fn chat(
        &self,
        agent_id: &str,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatReply> {
        let agent = self.store.get_agent(agent_id).await?;

        let context = if request.use_context {
            Some(
                self.retriever
                    .assemble_context(&agent, &request.message, self.embedder.as_ref(), cancel)
                    .await?,
            )
        } else {
            None
        };
        let messages = build_messages(&agent, context.as_ref(), &request.message);
        debug!("Sending {} messages to {}", messages.len(), agent.model);

        let reply = with_cancel(
            self.generator.generate(&agent.model, &messages),
            cancel,
            self.config.request_timeout(),
        )
        .await?;

        self.store
            .append_chat(
                agent_id,
                vec![
                    ChatEntry::new(Role::User, request.message),
                    ChatEntry::new(Role::Assistant, reply.clone()),
                ],
            )
            .await?;

        Ok(ChatReply {
            message: reply,
            agent_id: agent_id.to_string(),
            timestamp: Utc::now(),
        })
    }

    pub async fn chat_history(&self, agent_id: &str) -> Result<Vec<ChatEntry>> {
        self.store.chat_history(agent_id).await
    }

    /// The `k` documents of `agent_id` closest to `query`, without generating.
    pub async fn search(
        &self,
        agent_id: &str,
        query: &str,
        k: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<RetrievedDocument>> {
        let agent = self.store.get_agent(agent_id).await?;
        let retrieved = self
            .retriever
            .retrieve(&agent, query, k, self.embedder.as_ref(), cancel)
            .await?;
        Ok(retrieved.documents)
    }
}

//! # Retrieval module (context assembly & preamble builder)
//!
//! Turns one chat turn into a grounded prompt:
//!
//! 1. embed the user's question through an [`EmbeddingProvider`],
//! 2. ask the [`VectorIndex`] for the nearest documents owned by the agent,
//! 3. resolve each hit to its text through a [`DocumentLookup`] (hits that no
//!    longer resolve are skipped),
//! 4. render the surviving texts closest first into one context block,
//! 5. let the caller build the message sequence with [`build_messages`]:
//!    system prompt → optional context system message → user message.
//!
//! The rendered block is `"\nDocument: <text>"` repeated per document. It is
//! neither re-ranked nor deduplicated. Its size is unbounded unless a
//! [`ContextBudget`] is configured.
//!
//! ## Quick start
//! ```no_run
//! use std::sync::Arc;
//! use docent::retrieval::{Retriever, RetrievalSettings, SharedIndex, build_messages};
//! use docent::store::{AgentStore, NewAgent};
//! use docent::api::OpenAiProvider;
//! use docent::vector_store::VectorIndex;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(provider: OpenAiProvider) -> Result<(), docent::error::DocentError> {
//! let store = Arc::new(AgentStore::new());
//! let index: SharedIndex = Arc::new(tokio::sync::RwLock::new(VectorIndex::new(1536)?));
//! let agent = store
//!     .create_agent(NewAgent::new("Librarian", "Answer from the documents.", "gpt-4o-mini"))
//!     .await;
//!
//! let retriever = Retriever::new(index, store.clone(), RetrievalSettings::default());
//! let context = retriever
//!     .assemble_context(&agent, "Where is the fire exit?", &provider, &CancellationToken::new())
//!     .await?;
//! let messages = build_messages(&agent, Some(&context), "Where is the fire exit?");
//! assert!(messages.len() >= 2);
//! # Ok(()) }
//! ```

use async_openai::types::Role;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::{EmbeddingProvider, with_cancel};
use crate::error::{DocentError, Result};
use crate::store::Agent;
use crate::vector_store::{DEFAULT_TOP_K, VectorIndex};

/// Marker placed before every document in the context block.
pub const DOCUMENT_MARKER: &str = "Document: ";

/// Prefix of the system message that carries the context block.
pub const CONTEXT_PREFIX: &str = "Here is some relevant context: ";

/// The index as shared between request handlers: many readers, one writer.
pub type SharedIndex = Arc<RwLock<VectorIndex>>;

/// A single role-tagged message (role + content).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Resolves a document identity to its text.
#[async_trait]
pub trait DocumentLookup: Send + Sync {
    /// # Errors
    /// `DocumentNotFound` when `id` no longer resolves.
    async fn document_content(&self, id: &str) -> Result<String>;
}

/// What to do when the rendered context exceeds `max_chars`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPolicy {
    /// Keep whole documents closest first; drop the first one that no longer
    /// fits and everything ranked below it.
    DropLowestRanked,
    /// Clip every document's text to `max_chars` characters.
    TruncatePerDocument,
    /// Fail with `ContextBudgetExceeded`.
    Reject,
}

/// Upper bound on context size, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBudget {
    pub max_chars: usize,
    pub policy: BudgetPolicy,
}

/// Knobs for [`Retriever`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub budget: Option<ContextBudget>,
    /// Deadline for the query embedding call.
    pub embed_timeout: Option<Duration>,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            budget: None,
            embed_timeout: None,
        }
    }
}

/// A hit that resolved to text.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedDocument {
    pub id: String,
    pub distance: f32,
    pub content: String,
}

/// Result of [`Retriever::retrieve`], closest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Retrieved {
    pub documents: Vec<RetrievedDocument>,
    /// Hits whose identity no longer resolved.
    pub skipped: Vec<String>,
}

/// Result of [`Retriever::assemble_context`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledContext {
    /// Documents that made it into `text`, closest first.
    pub documents: Vec<RetrievedDocument>,
    /// Hits whose identity no longer resolved.
    pub skipped: Vec<String>,
    pub text: String,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// The context as a system message, or `None` when nothing resolved.
    pub fn system_message(&self) -> Option<ChatMessage> {
        if self.is_empty() {
            None
        } else {
            Some(ChatMessage::system(format!("{CONTEXT_PREFIX}{}", self.text)))
        }
    }
}

/// Retrieval orchestrator.
///
/// Holds no per-request state; every call reads the shared index under a read
/// lock and never mutates it.
pub struct Retriever {
    index: SharedIndex,
    documents: Arc<dyn DocumentLookup>,
    settings: RetrievalSettings,
}

impl Retriever {
    pub fn new(
        index: SharedIndex,
        documents: Arc<dyn DocumentLookup>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            index,
            documents,
            settings,
        }
    }

    /// The `k` documents of `agent` closest to `query_text`, resolved to text.
    ///
    /// Hits whose identity no longer resolves are reported in `skipped`.
    ///
    /// # Errors
    /// Provider errors, `Cancelled` / `Timeout`, `DimensionMismatch`, and
    /// `InvalidArgument` when `k == 0`. Lookup failures other than
    /// `DocumentNotFound` propagate.
    pub async fn retrieve(
        &self,
        agent: &Agent,
        query_text: &str,
        k: usize,
        embedder: &dyn EmbeddingProvider,
        cancel: &CancellationToken,
    ) -> Result<Retrieved> {
        let query = with_cancel(
            embedder.embed(query_text),
            cancel,
            self.settings.embed_timeout,
        )
        .await?;

        let neighbors = {
            let index = self.index.read().await;
            index.search_filtered(&query, k, |meta| meta.agent_id == agent.id)?
        };
        debug!("Agent {} has {} neighbors", agent.id, neighbors.len());

        let mut retrieved = Retrieved::default();
        for neighbor in neighbors {
            match self.documents.document_content(&neighbor.identity).await {
                Ok(content) => retrieved.documents.push(RetrievedDocument {
                    id: neighbor.identity,
                    distance: neighbor.distance,
                    content,
                }),
                Err(DocentError::DocumentNotFound(id)) => {
                    debug!("Skipping stale hit {}", id);
                    retrieved.skipped.push(neighbor.identity);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(retrieved)
    }

    /// Retrieve the documents closest to `query_text` among `agent`'s documents
    /// and render them into a context block.
    ///
    /// # Errors
    /// - provider errors from `embedder`, unchanged;
    /// - `Cancelled` / `Timeout` when the embedding call is abandoned;
    /// - `DimensionMismatch` when the embedder returns the wrong dimension;
    /// - `ContextBudgetExceeded` under [`BudgetPolicy::Reject`].
    pub async fn assemble_context(
        &self,
        agent: &Agent,
        query_text: &str,
        embedder: &dyn EmbeddingProvider,
        cancel: &CancellationToken,
    ) -> Result<AssembledContext> {
        let retrieved = self
            .retrieve(agent, query_text, self.settings.top_k, embedder, cancel)
            .await?;
        let mut context = AssembledContext {
            documents: retrieved.documents,
            skipped: retrieved.skipped,
            text: String::new(),
        };

        if let Some(budget) = self.settings.budget {
            apply_budget(&mut context.documents, budget)?;
        }
        context.text = render_context(&context.documents);

        info!(
            "Assembled context from {} documents ({} chars)",
            context.documents.len(),
            context.text.chars().count()
        );
        Ok(context)
    }
}

/// Render documents as `"\nDocument: <text>"`, in order.
pub fn render_context(documents: &[RetrievedDocument]) -> String {
    documents
        .iter()
        .map(|d| format!("\n{DOCUMENT_MARKER}{}", d.content))
        .collect()
}

fn rendered_len(content: &str) -> usize {
    1 + DOCUMENT_MARKER.len() + content.chars().count()
}

/// Enforce `budget` on closest-first `documents`.
pub fn apply_budget(documents: &mut Vec<RetrievedDocument>, budget: ContextBudget) -> Result<()> {
    match budget.policy {
        BudgetPolicy::DropLowestRanked => {
            let mut used = 0;
            let keep = documents
                .iter()
                .take_while(|d| {
                    used += rendered_len(&d.content);
                    used <= budget.max_chars
                })
                .count();
            if keep < documents.len() {
                debug!("Dropping {} documents over budget", documents.len() - keep);
            }
            documents.truncate(keep);
        }
        BudgetPolicy::TruncatePerDocument => {
            for document in documents.iter_mut() {
                if document.content.chars().count() > budget.max_chars {
                    document.content = document.content.chars().take(budget.max_chars).collect();
                }
            }
        }
        BudgetPolicy::Reject => {
            let actual: usize = documents.iter().map(|d| rendered_len(&d.content)).sum();
            if actual > budget.max_chars {
                return Err(DocentError::ContextBudgetExceeded {
                    limit: budget.max_chars,
                    actual,
                });
            }
        }
    }
    Ok(())
}

/// Build the message sequence for one turn.
///
/// The agent's system prompt comes first. The context follows as a second
/// system message only when it is present and non-empty. The user message
/// comes last.
pub fn build_messages(
    agent: &Agent,
    context: Option<&AssembledContext>,
    user_message: &str,
) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(agent.system_prompt.clone())];
    if let Some(context_message) = context.and_then(AssembledContext::system_message) {
        messages.push(context_message);
    }
    messages.push(ChatMessage::user(user_message));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewAgent;
    use crate::vector_store::EntryMetadata;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Maps known texts to fixed vectors; anything else embeds to the origin.
    struct TableEmbedder {
        table: HashMap<String, Vec<f32>>,
        calls: AtomicUsize,
    }

    impl TableEmbedder {
        fn new(entries: &[(&str, Vec<f32>)]) -> Self {
            Self {
                table: entries
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for TableEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.table.get(text).cloned().unwrap_or_else(|| vec![0.0; 2]))
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(DocentError::embedding("provider unavailable"))
        }
    }

    struct MapLookup(HashMap<String, String>);

    #[async_trait]
    impl DocumentLookup for MapLookup {
        async fn document_content(&self, id: &str) -> Result<String> {
            self.0
                .get(id)
                .cloned()
                .ok_or_else(|| DocentError::DocumentNotFound(id.to_string()))
        }
    }

    fn agent(id: &str) -> Agent {
        let mut agent = Agent::from_new(NewAgent::new("Test", "You are a test agent.", "m"));
        agent.id = id.to_string();
        agent
    }

    fn doc(id: &str, content: &str) -> RetrievedDocument {
        RetrievedDocument {
            id: id.into(),
            distance: 0.0,
            content: content.into(),
        }
    }

    async fn fixture(settings: RetrievalSettings) -> Retriever {
        let mut index = VectorIndex::new(2).unwrap();
        index
            .insert("alpha", vec![1.0, 0.0], EntryMetadata::new("a", "alpha.txt"))
            .unwrap();
        index
            .insert("beta", vec![0.0, 1.0], EntryMetadata::new("a", "beta.txt"))
            .unwrap();
        index
            .insert("gamma", vec![0.9, 0.1], EntryMetadata::new("a", "gamma.txt"))
            .unwrap();
        index
            .insert("other", vec![1.0, 0.0], EntryMetadata::new("b", "other.txt"))
            .unwrap();

        let lookup = MapLookup(
            [
                ("alpha", "first text"),
                ("beta", "second text"),
                ("gamma", "third text"),
                ("other", "someone else's text"),
            ]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        );

        Retriever::new(
            Arc::new(RwLock::new(index)),
            Arc::new(lookup),
            settings,
        )
    }

    #[tokio::test]
    async fn test_context_is_closest_first_and_scoped_to_agent() {
        let retriever = fixture(RetrievalSettings {
            top_k: 2,
            ..RetrievalSettings::default()
        })
        .await;
        let embedder = TableEmbedder::new(&[("east", vec![1.0, 0.0])]);

        let context = retriever
            .assemble_context(&agent("a"), "east", &embedder, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(context.text, "\nDocument: first text\nDocument: third text");
        let ids: Vec<_> = context.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "gamma"]);
        assert!(context.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_agent_without_documents_gets_empty_context() {
        let retriever = fixture(RetrievalSettings::default()).await;
        let embedder = TableEmbedder::new(&[("east", vec![1.0, 0.0])]);

        let context = retriever
            .assemble_context(&agent("nobody"), "east", &embedder, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(context.text, "");
        assert!(context.system_message().is_none());
    }

    #[tokio::test]
    async fn test_unresolved_hits_are_skipped() {
        let mut index = VectorIndex::new(2).unwrap();
        index
            .insert("live", vec![0.0, 1.0], EntryMetadata::new("a", "live.txt"))
            .unwrap();
        index
            .insert("stale", vec![0.0, 0.9], EntryMetadata::new("a", "stale.txt"))
            .unwrap();
        let lookup = MapLookup(HashMap::from([("live".to_string(), "still here".to_string())]));
        let retriever = Retriever::new(
            Arc::new(RwLock::new(index)),
            Arc::new(lookup),
            RetrievalSettings::default(),
        );
        let embedder = TableEmbedder::new(&[("north", vec![0.0, 1.0])]);

        let context = retriever
            .assemble_context(&agent("a"), "north", &embedder, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(context.text, "\nDocument: still here");
        assert_eq!(context.skipped, vec!["stale".to_string()]);
    }

    #[tokio::test]
    async fn test_embedding_error_propagates_unchanged() {
        let retriever = fixture(RetrievalSettings::default()).await;
        let err = retriever
            .assemble_context(&agent("a"), "q", &FailingEmbedder, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DocentError::EmbeddingProvider { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_embedding() {
        let retriever = fixture(RetrievalSettings::default()).await;
        let embedder = TableEmbedder::new(&[]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = retriever
            .assemble_context(&agent("a"), "q", &embedder, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DocentError::Cancelled));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_wrong_embedding_dimension_is_rejected() {
        let retriever = fixture(RetrievalSettings::default()).await;
        let embedder = TableEmbedder::new(&[("wide", vec![1.0, 0.0, 0.0])]);
        let err = retriever
            .assemble_context(&agent("a"), "wide", &embedder, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DocentError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_build_messages_order() {
        let agent = agent("a");
        let context = AssembledContext {
            documents: vec![doc("d", "facts")],
            skipped: vec![],
            text: render_context(&[doc("d", "facts")]),
        };

        let messages = build_messages(&agent, Some(&context), "question?");
        assert_eq!(
            messages,
            vec![
                ChatMessage::system("You are a test agent."),
                ChatMessage::system("Here is some relevant context: \nDocument: facts"),
                ChatMessage::user("question?"),
            ]
        );

        let messages = build_messages(&agent, Some(&AssembledContext::default()), "question?");
        assert_eq!(messages.len(), 2);
        let messages = build_messages(&agent, None, "question?");
        assert_eq!(messages[1], ChatMessage::user("question?"));
    }

    #[test]
    fn test_budget_drop_lowest_ranked() {
        // each rendered entry is 1 + 10 + 5 = 16 chars
        let mut docs = vec![doc("a", "aaaaa"), doc("b", "bbbbb"), doc("c", "ccccc")];
        apply_budget(
            &mut docs,
            ContextBudget {
                max_chars: 40,
                policy: BudgetPolicy::DropLowestRanked,
            },
        )
        .unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(render_context(&docs).chars().count() <= 40);
    }

    #[test]
    fn test_budget_truncate_per_document_respects_char_boundaries() {
        let mut docs = vec![doc("a", "héllo wörld"), doc("b", "ok")];
        apply_budget(
            &mut docs,
            ContextBudget {
                max_chars: 4,
                policy: BudgetPolicy::TruncatePerDocument,
            },
        )
        .unwrap();
        assert_eq!(docs[0].content, "héll");
        assert_eq!(docs[1].content, "ok");
    }

    #[test]
    fn test_budget_reject() {
        let mut docs = vec![doc("a", "aaaaa"), doc("b", "bbbbb")];
        let err = apply_budget(
            &mut docs,
            ContextBudget {
                max_chars: 20,
                policy: BudgetPolicy::Reject,
            },
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DocentError::ContextBudgetExceeded {
                limit: 20,
                actual: 32
            }
        ));

        assert!(
            apply_budget(
                &mut docs,
                ContextBudget {
                    max_chars: 32,
                    policy: BudgetPolicy::Reject,
                },
            )
            .is_ok()
        );
    }

    #[tokio::test]
    async fn test_budget_applies_during_assembly() {
        let retriever = fixture(RetrievalSettings {
            top_k: 3,
            budget: Some(ContextBudget {
                max_chars: 25,
                policy: BudgetPolicy::DropLowestRanked,
            }),
            embed_timeout: None,
        })
        .await;
        let embedder = TableEmbedder::new(&[("east", vec![1.0, 0.0])]);

        let context = retriever
            .assemble_context(&agent("a"), "east", &embedder, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(context.text, "\nDocument: first text");
    }

    struct BrokenLookup;

    #[async_trait]
    impl DocumentLookup for BrokenLookup {
        async fn document_content(&self, _id: &str) -> Result<String> {
            Err(DocentError::Persistence("store unreadable".into()))
        }
    }

    #[tokio::test]
    async fn test_retrieve_uses_requested_k() {
        let retriever = fixture(RetrievalSettings::default()).await;
        let embedder = TableEmbedder::new(&[("east", vec![1.0, 0.0])]);

        let retrieved = retriever
            .retrieve(&agent("a"), "east", 1, &embedder, &CancellationToken::new())
            .await
            .unwrap();
        let ids: Vec<_> = retrieved.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha"]);

        let err = retriever
            .retrieve(&agent("a"), "east", 0, &embedder, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DocentError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_lookup_failure_other_than_not_found_propagates() {
        let mut index = VectorIndex::new(2).unwrap();
        index
            .insert("live", vec![0.0, 1.0], EntryMetadata::new("a", "live.txt"))
            .unwrap();
        let retriever = Retriever::new(
            Arc::new(RwLock::new(index)),
            Arc::new(BrokenLookup),
            RetrievalSettings::default(),
        );
        let embedder = TableEmbedder::new(&[("north", vec![0.0, 1.0])]);

        let err = retriever
            .assemble_context(&agent("a"), "north", &embedder, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DocentError::Persistence(_)));
    }
}

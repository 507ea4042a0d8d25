//! Chat pipeline: intent routing, retrieval or whole-document collection,
//! then generation.
//!
//! The target collection travels with each request in a
//! [`SessionContext`]; nothing about the active collection is kept in
//! process-wide state, so concurrent sessions on different collections
//! never interfere.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

use hybrid_rag_core::context::{context_texts, NO_CONTEXT};
use hybrid_rag_core::embedding::Embedder;
use hybrid_rag_core::error::RetrievalError;
use hybrid_rag_core::retrieve::{HybridRetriever, RetrievalParams};
use hybrid_rag_core::store::VectorStore;
use hybrid_rag_core::summarize::{collect_document, SummarizeParams, TokenCounter};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::generation::{answer_prompt, summary_prompt, Generator, OllamaGenerator};
use crate::intent::{create_classifier, Intent, IntentClassifier};
use crate::sqlite_store::SqliteStore;
use crate::tokens::create_token_counter;

/// Per-request routing state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// Collection or alias to answer from.
    pub collection: String,
}

impl SessionContext {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub intent: Intent,
    pub text: String,
    /// Retrieved chunks (QA) or collected chunks (summary) behind the reply.
    pub contexts_used: usize,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error("generation failed: {0:#}")]
    Generation(anyhow::Error),
}

/// Limits for the chat path.
#[derive(Debug, Clone, Copy)]
pub struct ChatLimits {
    pub prefetch_limit: usize,
    pub final_limit: usize,
    pub summarize: SummarizeParams,
}

impl Default for ChatLimits {
    fn default() -> Self {
        Self {
            prefetch_limit: RetrievalParams::CHAT.prefetch_limit,
            final_limit: 5,
            summarize: SummarizeParams::default(),
        }
    }
}

pub struct ChatPipeline {
    store: Arc<dyn VectorStore>,
    embedder: Embedder,
    generator: Arc<dyn Generator>,
    classifier: Arc<dyn IntentClassifier>,
    counter: Arc<dyn TokenCounter>,
    limits: ChatLimits,
}

impl ChatPipeline {
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Embedder,
        generator: Arc<dyn Generator>,
        classifier: Arc<dyn IntentClassifier>,
        counter: Arc<dyn TokenCounter>,
        limits: ChatLimits,
    ) -> Self {
        Self {
            store,
            embedder,
            generator,
            classifier,
            counter,
            limits,
        }
    }

    pub async fn reply(
        &self,
        session: &SessionContext,
        message: &str,
    ) -> Result<ChatReply, ChatError> {
        if message.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let intent = self.classifier.classify(message).await;
        tracing::info!(collection = %session.collection, %intent, "chat message");

        match intent {
            Intent::SummarizeFullDocument => self.summarize(session, intent).await,
            _ => self.answer(session, intent, message).await,
        }
    }

    async fn answer(
        &self,
        session: &SessionContext,
        intent: Intent,
        message: &str,
    ) -> Result<ChatReply, ChatError> {
        let retriever = HybridRetriever::new(
            self.store.clone(),
            self.embedder.clone(),
            session.collection.clone(),
            RetrievalParams {
                prefetch_limit: self.limits.prefetch_limit,
            },
        );
        let payloads = retriever.retrieve(message, self.limits.final_limit).await?;
        let texts = context_texts(&payloads);

        let context = if texts.is_empty() {
            NO_CONTEXT.to_string()
        } else {
            texts.join("\n\n")
        };

        let text = self
            .generator
            .generate(&answer_prompt(&context, message))
            .await
            .map_err(ChatError::Generation)?;

        Ok(ChatReply {
            intent,
            text,
            contexts_used: texts.len(),
        })
    }

    async fn summarize(
        &self,
        session: &SessionContext,
        intent: Intent,
    ) -> Result<ChatReply, ChatError> {
        let excerpt = collect_document(
            self.store.as_ref(),
            &session.collection,
            self.counter.as_ref(),
            self.limits.summarize,
        )
        .await?;

        if excerpt.chunks_included == 0 {
            return Ok(ChatReply {
                intent,
                text: NO_CONTEXT.to_string(),
                contexts_used: 0,
            });
        }
        if excerpt.truncated {
            tracing::warn!(
                collection = %session.collection,
                chunks = excerpt.chunks_included,
                tokens = excerpt.tokens,
                "document truncated to token budget"
            );
        }

        let text = self
            .generator
            .generate(&summary_prompt(&excerpt.text))
            .await
            .map_err(ChatError::Generation)?;

        Ok(ChatReply {
            intent,
            text,
            contexts_used: excerpt.chunks_included,
        })
    }
}

fn limits_from_config(config: &Config) -> ChatLimits {
    ChatLimits {
        prefetch_limit: config.chat.prefetch_limit,
        final_limit: config.chat.final_limit,
        summarize: SummarizeParams {
            max_tokens: config.summarize.max_tokens,
            page_size: config.summarize.page_size,
        },
    }
}

/// `hrag chat`: answer one message against a collection.
pub async fn run_chat(config: &Config, collection: &str, message: &str) -> Result<()> {
    let store = Arc::new(SqliteStore::open(config).await?);
    let pipeline = ChatPipeline::new(
        store.clone(),
        create_embedder(&config.embedding)?,
        Arc::new(OllamaGenerator::new(&config.generation)?),
        create_classifier(&config.intent, &config.generation)?,
        create_token_counter(&config.summarize).await?,
        limits_from_config(config),
    );

    let result = pipeline
        .reply(&SessionContext::new(collection), message)
        .await;
    store.close().await;

    let reply = result?;
    println!("{}", reply.text);
    eprintln!("[intent: {}, contexts: {}]", reply.intent, reply.contexts_used);
    Ok(())
}

/// `hrag summarize`: summarize the whole collection, or with
/// `context_only` print the collected text without calling the model.
pub async fn run_summarize(config: &Config, collection: &str, context_only: bool) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let counter = create_token_counter(&config.summarize).await?;
    let limits = limits_from_config(config);

    let excerpt = collect_document(&store, collection, counter.as_ref(), limits.summarize).await;
    store.close().await;
    let excerpt = excerpt?;

    if excerpt.truncated {
        eprintln!(
            "Note: document truncated to {} chunks ({} tokens) to fit summarize.max_tokens = {}",
            excerpt.chunks_included, excerpt.tokens, limits.summarize.max_tokens
        );
    }

    if context_only {
        print!("{}", excerpt.text);
        return Ok(());
    }

    if excerpt.chunks_included == 0 {
        println!("{}", NO_CONTEXT);
        return Ok(());
    }

    let generator = OllamaGenerator::new(&config.generation)?;
    let summary = generator.generate(&summary_prompt(&excerpt.text)).await?;
    println!("{}", summary);
    Ok(())
}

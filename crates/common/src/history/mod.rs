//! Rolling conversation history store
//!
//! Append-only per session, capped at a fixed number of entries with a
//! 24-hour default expiry. Redis-backed in production (namespaced keys,
//! last-writer-wins), in-memory for tests. This is the only mutation the
//! engine performs anywhere.

use crate::errors::{EngineError, Result};
use crate::types::Citation;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Who produced a history entry
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryRole {
    User,
    Assistant,
}

/// One entry in the rolling conversation history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: EntryRole,
    pub content: String,
    #[serde(default)]
    pub citations: Vec<Citation>,
    pub created_at: DateTime<Utc>,
}

impl ConversationEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: EntryRole::User,
            content: content.into(),
            citations: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>, citations: Vec<Citation>) -> Self {
        Self {
            role: EntryRole::Assistant,
            content: content.into(),
            citations,
            created_at: Utc::now(),
        }
    }
}

/// Conversation history store
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Full stored history for a session, oldest first
    async fn history(&self, session_id: Uuid) -> Result<Vec<ConversationEntry>>;

    /// Append entries, trim to `cap` newest entries, refresh `ttl_secs`
    async fn append(
        &self,
        session_id: Uuid,
        entries: Vec<ConversationEntry>,
        cap: usize,
        ttl_secs: u64,
    ) -> Result<()>;
}

/// Redis-backed store
pub struct RedisConversationStore {
    connection: RwLock<redis::aio::MultiplexedConnection>,
    key_prefix: String,
}

impl RedisConversationStore {
    /// Connect to Redis and namespace keys under `key_prefix`
    pub async fn new(url: &str, key_prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(|e| EngineError::HistoryStore {
            message: format!("Failed to create Redis client: {}", e),
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| EngineError::HistoryStore {
                message: format!("Failed to connect to Redis: {}", e),
            })?;

        Ok(Self {
            connection: RwLock::new(connection),
            key_prefix: key_prefix.to_string(),
        })
    }

    fn key(&self, session_id: Uuid) -> String {
        format!("{}:history:{}", self.key_prefix, session_id)
    }
}

#[async_trait]
impl ConversationStore for RedisConversationStore {
    async fn history(&self, session_id: Uuid) -> Result<Vec<ConversationEntry>> {
        let key = self.key(session_id);
        let mut conn = self.connection.write().await;

        let raw: Option<String> = conn.get(&key).await?;
        match raw {
            Some(json) => {
                let entries = serde_json::from_str(&json)?;
                debug!(key = %key, "History hit");
                Ok(entries)
            }
            None => Ok(Vec::new()),
        }
    }

    async fn append(
        &self,
        session_id: Uuid,
        entries: Vec<ConversationEntry>,
        cap: usize,
        ttl_secs: u64,
    ) -> Result<()> {
        let key = self.key(session_id);

        // Read-modify-write; last writer wins per session, and sessions are
        // never shared across requests in flight.
        let mut history = self.history(session_id).await?;
        history.extend(entries);
        if history.len() > cap {
            history.drain(..history.len() - cap);
        }

        let json = serde_json::to_string(&history)?;
        let mut conn = self.connection.write().await;
        conn.set_ex::<_, _, ()>(&key, &json, ttl_secs).await?;

        debug!(key = %key, entries = history.len(), ttl_secs, "History appended");
        Ok(())
    }
}

/// In-memory store for tests and development
#[derive(Default)]
pub struct InMemoryConversationStore {
    sessions: RwLock<HashMap<Uuid, Vec<ConversationEntry>>>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn history(&self, session_id: Uuid) -> Result<Vec<ConversationEntry>> {
        Ok(self
            .sessions
            .read()
            .await
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn append(
        &self,
        session_id: Uuid,
        entries: Vec<ConversationEntry>,
        cap: usize,
        _ttl_secs: u64,
    ) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let history = sessions.entry(session_id).or_default();
        history.extend(entries);
        if history.len() > cap {
            history.drain(..history.len() - cap);
        }
        Ok(())
    }
}

/// Shared handle type used across the engine
pub type SharedConversationStore = Arc<dyn ConversationStore>;

//! Entity graph client abstraction
//!
//! Best-effort named-entity extraction plus document-membership,
//! traversal, importance, and relationship queries. The engine treats all
//! of these as advisory: a graph failure degrades retrieval, it never
//! fails a query.

use crate::config::GraphServiceConfig;
use crate::errors::{EngineError, Result};
use crate::types::{EntityRelation, ExtractedEntity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Read surface of the entity graph service
#[async_trait]
pub trait EntityGraph: Send + Sync {
    /// Best-effort NER over free text; no ordering guarantee
    async fn extract_entities_from_text(&self, text: &str) -> Result<Vec<ExtractedEntity>>;

    /// Documents that directly mention any of the named entities
    async fn find_documents_by_entities(&self, names: &[String]) -> Result<Vec<Uuid>>;

    /// Documents reachable within `max_hops` of the named entities
    async fn find_related_documents_by_entities(
        &self,
        names: &[String],
        max_hops: u32,
    ) -> Result<Vec<Uuid>>;

    /// Importance score per entity name; absent names default to 1.0 upstream
    async fn get_entity_importance_scores(&self, names: &[String])
        -> Result<HashMap<String, f32>>;

    /// Relationship triples and co-occurring entities for prompt context
    async fn get_entity_relationships(&self, names: &[String]) -> Result<Vec<EntityRelation>>;
}

/// HTTP client for a remote entity graph service
pub struct HttpEntityGraph {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct NamesBody<'a> {
    names: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_hops: Option<u32>,
}

#[derive(Deserialize)]
struct EntitiesResponse {
    entities: Vec<ExtractedEntity>,
}

#[derive(Deserialize)]
struct DocumentsResponse {
    document_ids: Vec<Uuid>,
}

#[derive(Deserialize)]
struct ImportanceResponse {
    scores: HashMap<String, f32>,
}

#[derive(Deserialize)]
struct RelationsResponse {
    relations: Vec<EntityRelation>,
}

impl HttpEntityGraph {
    /// Create a new client against the configured service
    pub fn new(config: &GraphServiceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EngineError::Configuration {
                message: format!("Failed to create entity graph client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post_json<B: Serialize, R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| EngineError::EntityGraph {
                message: format!("Request to {} failed: {}", url, e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::EntityGraph {
                message: format!("Graph error {}: {}", status, text),
            });
        }

        response.json().await.map_err(|e| EngineError::EntityGraph {
            message: format!("Failed to parse graph response: {}", e),
        })
    }
}

#[async_trait]
impl EntityGraph for HttpEntityGraph {
    async fn extract_entities_from_text(&self, text: &str) -> Result<Vec<ExtractedEntity>> {
        #[derive(Serialize)]
        struct TextBody<'a> {
            text: &'a str,
        }
        let parsed: EntitiesResponse = self.post_json("/v1/entities/extract", &TextBody { text }).await?;
        Ok(parsed.entities)
    }

    async fn find_documents_by_entities(&self, names: &[String]) -> Result<Vec<Uuid>> {
        let parsed: DocumentsResponse = self
            .post_json("/v1/entities/documents", &NamesBody { names, max_hops: None })
            .await?;
        Ok(parsed.document_ids)
    }

    async fn find_related_documents_by_entities(
        &self,
        names: &[String],
        max_hops: u32,
    ) -> Result<Vec<Uuid>> {
        let parsed: DocumentsResponse = self
            .post_json(
                "/v1/entities/related-documents",
                &NamesBody {
                    names,
                    max_hops: Some(max_hops),
                },
            )
            .await?;
        Ok(parsed.document_ids)
    }

    async fn get_entity_importance_scores(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, f32>> {
        let parsed: ImportanceResponse = self
            .post_json("/v1/entities/importance", &NamesBody { names, max_hops: None })
            .await?;
        Ok(parsed.scores)
    }

    async fn get_entity_relationships(&self, names: &[String]) -> Result<Vec<EntityRelation>> {
        let parsed: RelationsResponse = self
            .post_json("/v1/entities/relationships", &NamesBody { names, max_hops: None })
            .await?;
        Ok(parsed.relations)
    }
}

/// In-memory graph for tests and development
#[derive(Default)]
pub struct InMemoryEntityGraph {
    inner: RwLock<GraphData>,
}

#[derive(Default)]
struct GraphData {
    /// entity name (lowercase) -> documents that mention it
    mentions: HashMap<String, Vec<Uuid>>,
    /// entity name (lowercase) -> neighbors one hop away
    neighbors: HashMap<String, Vec<String>>,
    importance: HashMap<String, f32>,
    relations: Vec<EntityRelation>,
    /// entity names recognized by extract_entities_from_text
    vocabulary: Vec<String>,
}

impl InMemoryEntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_entity(&self, name: &str, documents: Vec<Uuid>, importance: f32) {
        let mut data = self.inner.write().await;
        let key = name.to_lowercase();
        data.mentions.insert(key.clone(), documents);
        data.importance.insert(name.to_string(), importance);
        data.vocabulary.push(name.to_string());
    }

    pub async fn link(&self, a: &str, b: &str) {
        let mut data = self.inner.write().await;
        data.neighbors
            .entry(a.to_lowercase())
            .or_default()
            .push(b.to_lowercase());
        data.neighbors
            .entry(b.to_lowercase())
            .or_default()
            .push(a.to_lowercase());
    }

    pub async fn add_relation(&self, subject: &str, relation: &str, object: &str) {
        self.inner.write().await.relations.push(EntityRelation {
            subject: subject.to_string(),
            relation: relation.to_string(),
            object: object.to_string(),
        });
    }
}

#[async_trait]
impl EntityGraph for InMemoryEntityGraph {
    async fn extract_entities_from_text(&self, text: &str) -> Result<Vec<ExtractedEntity>> {
        let data = self.inner.read().await;
        let lower = text.to_lowercase();
        Ok(data
            .vocabulary
            .iter()
            .filter(|name| lower.contains(&name.to_lowercase()))
            .map(|name| ExtractedEntity {
                name: name.clone(),
                entity_type: None,
            })
            .collect())
    }

    async fn find_documents_by_entities(&self, names: &[String]) -> Result<Vec<Uuid>> {
        let data = self.inner.read().await;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for name in names {
            if let Some(docs) = data.mentions.get(&name.to_lowercase()) {
                for doc in docs {
                    if seen.insert(*doc) {
                        out.push(*doc);
                    }
                }
            }
        }
        Ok(out)
    }

    async fn find_related_documents_by_entities(
        &self,
        names: &[String],
        max_hops: u32,
    ) -> Result<Vec<Uuid>> {
        let data = self.inner.read().await;

        // Breadth-first over the neighbor map, bounded by max_hops
        let mut frontier: HashSet<String> =
            names.iter().map(|n| n.to_lowercase()).collect();
        let mut visited = frontier.clone();
        for _ in 0..max_hops {
            let mut next = HashSet::new();
            for name in &frontier {
                if let Some(neighbors) = data.neighbors.get(name) {
                    for n in neighbors {
                        if visited.insert(n.clone()) {
                            next.insert(n.clone());
                        }
                    }
                }
            }
            frontier = next;
        }

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for name in &visited {
            if let Some(docs) = data.mentions.get(name) {
                for doc in docs {
                    if seen.insert(*doc) {
                        out.push(*doc);
                    }
                }
            }
        }
        Ok(out)
    }

    async fn get_entity_importance_scores(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, f32>> {
        let data = self.inner.read().await;
        Ok(names
            .iter()
            .filter_map(|n| data.importance.get(n).map(|v| (n.clone(), *v)))
            .collect())
    }

    async fn get_entity_relationships(&self, names: &[String]) -> Result<Vec<EntityRelation>> {
        let data = self.inner.read().await;
        let wanted: HashSet<String> = names.iter().map(|n| n.to_lowercase()).collect();
        Ok(data
            .relations
            .iter()
            .filter(|r| {
                wanted.contains(&r.subject.to_lowercase())
                    || wanted.contains(&r.object.to_lowercase())
            })
            .cloned()
            .collect())
    }
}

/// Shared handle type used across the engine
pub type SharedEntityGraph = Arc<dyn EntityGraph>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hop_traversal() {
        let graph = InMemoryEntityGraph::new();
        let doc_a = Uuid::new_v4();
        let doc_b = Uuid::new_v4();

        graph.add_entity("Alice", vec![doc_a], 2.0).await;
        graph.add_entity("Bob", vec![doc_b], 1.0).await;
        graph.link("Alice", "Bob").await;

        let direct = graph
            .find_documents_by_entities(&["Alice".to_string()])
            .await
            .unwrap();
        assert_eq!(direct, vec![doc_a]);

        let related = graph
            .find_related_documents_by_entities(&["Alice".to_string()], 1)
            .await
            .unwrap();
        assert_eq!(related.len(), 2);

        let zero_hop = graph
            .find_related_documents_by_entities(&["Alice".to_string()], 0)
            .await
            .unwrap();
        assert_eq!(zero_hop, vec![doc_a]);
    }

    #[tokio::test]
    async fn test_extraction_from_vocabulary() {
        let graph = InMemoryEntityGraph::new();
        graph.add_entity("Acme Corp", vec![], 1.5).await;

        let entities = graph
            .extract_entities_from_text("what did acme corp announce")
            .await
            .unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].name, "Acme Corp");
    }
}

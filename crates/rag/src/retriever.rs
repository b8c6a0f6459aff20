//! Qdrant-backed retriever

use async_trait::async_trait;
use qdrant_client::{
    qdrant::{
        value::Kind, Condition, FieldCondition, Filter, Match, SearchPointsBuilder,
    },
    Qdrant,
};
use std::collections::HashMap;

use crate::{HttpEmbedder, RagError};
use vaas_config::RagSettings;
use vaas_core::{ContextRetriever, Result, RetrievedChunk};

pub struct QdrantRetriever {
    client: Qdrant,
    embedder: HttpEmbedder,
}

impl QdrantRetriever {
    pub fn new(settings: &RagSettings) -> std::result::Result<Self, RagError> {
        let mut builder = Qdrant::from_url(&settings.qdrant_endpoint);
        if let Some(api_key) = &settings.qdrant_api_key {
            builder = builder.api_key(api_key.clone());
        }
        let client = builder
            .build()
            .map_err(|e| RagError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            embedder: HttpEmbedder::new(settings),
        })
    }

    fn tenant_filter(tenant_id: &str) -> Filter {
        Filter {
            must: vec![Condition {
                condition_one_of: Some(qdrant_client::qdrant::condition::ConditionOneOf::Field(
                    FieldCondition {
                        key: "tenant_id".to_string(),
                        r#match: Some(Match {
                            match_value: Some(qdrant_client::qdrant::r#match::MatchValue::Keyword(
                                tenant_id.to_string(),
                            )),
                        }),
                        ..Default::default()
                    },
                )),
            }],
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContextRetriever for QdrantRetriever {
    async fn search(
        &self,
        query: &str,
        tenant_id: &str,
        collection: &str,
        top_k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievedChunk>> {
        let embedding = self.embedder.embed(query).await?;

        let search = SearchPointsBuilder::new(collection, embedding, top_k as u64)
            .with_payload(true)
            .score_threshold(score_threshold)
            .filter(Self::tenant_filter(tenant_id));

        let results = self
            .client
            .search_points(search)
            .await
            .map_err(|e| RagError::Search(e.to_string()))?;

        let chunks = results
            .result
            .into_iter()
            .map(|point| {
                let mut metadata = HashMap::new();
                let mut content = String::new();

                for (k, v) in point.payload {
                    if k == "text" {
                        if let Some(Kind::StringValue(s)) = v.kind {
                            content = s;
                        }
                    } else if let Some(Kind::StringValue(s)) = v.kind {
                        metadata.insert(k, s);
                    }
                }

                RetrievedChunk {
                    content,
                    score: point.score,
                    metadata,
                }
            })
            .collect();

        Ok(chunks)
    }

    async fn health_check(&self) -> bool {
        self.client.health_check().await.is_ok()
    }
}

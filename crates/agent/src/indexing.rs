use std::sync::Arc;

use tracing::{info, warn};

use aide_core::domain::owner::OwnerId;
use aide_core::domain::retrieval::EntityType;
use aide_core::retrieval::Embedder;
use aide_db::repositories::{RecordRepository, RepositoryError};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub embedded: usize,
    pub failed: usize,
}

/// Computes embeddings for stored records that do not have one yet.
/// Existing embeddings are never recomputed.
pub struct EmbeddingIndexer {
    records: Arc<dyn RecordRepository>,
    embedder: Arc<dyn Embedder>,
}

impl EmbeddingIndexer {
    pub fn new(records: Arc<dyn RecordRepository>, embedder: Arc<dyn Embedder>) -> Self {
        Self { records, embedder }
    }

    /// One pass over up to `batch` records of each entity type.
    pub async fn backfill(
        &self,
        owner_id: Option<&OwnerId>,
        batch: usize,
    ) -> Result<IndexReport, RepositoryError> {
        let mut report = IndexReport::default();
        for entity_type in EntityType::ALL {
            let candidates =
                self.records.list_missing_embeddings(entity_type, owner_id, batch).await?;
            for candidate in candidates {
                match self.embedder.embed(&candidate.text).await {
                    Ok(vector) if !vector.is_empty() => {
                        self.records.set_embedding(entity_type, &candidate.id, &vector).await?;
                        report.embedded += 1;
                    }
                    Ok(_) => {
                        report.failed += 1;
                        warn!(
                            event_name = "index.embed.empty",
                            entity_type = entity_type.as_str(),
                            record_id = %candidate.id,
                            "embedder returned an empty vector"
                        );
                    }
                    Err(error) => {
                        report.failed += 1;
                        warn!(
                            event_name = "index.embed.failed",
                            entity_type = entity_type.as_str(),
                            record_id = %candidate.id,
                            error = %error,
                            "record left without embedding"
                        );
                    }
                }
            }
        }

        info!(
            event_name = "index.backfill.finished",
            embedded = report.embedded,
            failed = report.failed,
            "embedding backfill finished"
        );
        Ok(report)
    }
}

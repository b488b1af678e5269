//! Ordered-scan vector store over the embedding columns of `email`,
//! `contact` and `note`.
//!
//! Embeddings are stored as JSON arrays. Similarity is computed in process as
//! `1 - cosine_distance`, i.e. plain cosine similarity.

use std::cmp::Ordering;

use sqlx::Row;
use tracing::warn;

use aide_core::domain::owner::OwnerId;
use aide_core::domain::record::{ContactRecord, EmailRecord, NoteRecord};
use aide_core::domain::retrieval::{EntityType, RetrievedItem};
use aide_core::retrieval::{VectorStore, VectorStoreError};

use crate::repositories::decode::parse_embedding;
use crate::repositories::record::{contact_from_row, email_from_row, note_from_row};
use crate::repositories::RepositoryError;
use crate::DbPool;

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> Option<f32> {
    if left.is_empty() || left.len() != right.len() {
        return None;
    }

    let (mut dot, mut left_norm, mut right_norm) = (0.0_f32, 0.0_f32, 0.0_f32);
    for (a, b) in left.iter().zip(right) {
        dot += a * b;
        left_norm += a * a;
        right_norm += b * b;
    }
    if left_norm == 0.0 || right_norm == 0.0 {
        return None;
    }
    Some(dot / (left_norm.sqrt() * right_norm.sqrt()))
}

/// Keeps the `limit` highest scoring items, most similar first.
pub fn top_n(mut items: Vec<RetrievedItem>, limit: usize) -> Vec<RetrievedItem> {
    items.sort_by(|left, right| {
        right.similarity.partial_cmp(&left.similarity).unwrap_or(Ordering::Equal)
    });
    items.truncate(limit);
    items
}

pub fn email_item(email: &EmailRecord, similarity: f32) -> RetrievedItem {
    let date = email.sent_at.unwrap_or(email.created_at).format("%Y-%m-%d");
    RetrievedItem {
        entity_type: EntityType::Email,
        source_id: email.id.clone(),
        similarity,
        snippet: format!(
            "Email from {} ({date}):\nSubject: {}",
            email.sender_display(),
            email.subject
        ),
        body: email.body.clone(),
    }
}

pub fn contact_item(contact: &ContactRecord, similarity: f32) -> RetrievedItem {
    let mut snippet = format!(
        "Contact: {}\nEmail: {}",
        contact.name.as_deref().unwrap_or("Unknown"),
        contact.address.as_deref().unwrap_or("N/A")
    );
    if let Some(company) = contact.property("company") {
        snippet.push_str(&format!("\nCompany: {company}"));
    }
    if let Some(title) = contact.property("jobtitle") {
        snippet.push_str(&format!("\nJob Title: {title}"));
    }
    RetrievedItem {
        entity_type: EntityType::Contact,
        source_id: contact.id.clone(),
        similarity,
        snippet,
        body: String::new(),
    }
}

pub fn note_item(note: &NoteRecord, contact_name: Option<&str>, similarity: f32) -> RetrievedItem {
    RetrievedItem {
        entity_type: EntityType::Note,
        source_id: note.id.clone(),
        similarity,
        snippet: format!("Note about {}:", contact_name.unwrap_or("contact")),
        body: note.body.clone(),
    }
}

pub struct SqlVectorStore {
    pool: DbPool,
}

impl SqlVectorStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn scan(
        &self,
        owner_id: &OwnerId,
        entity_type: EntityType,
        query: &[f32],
    ) -> Result<Vec<RetrievedItem>, RepositoryError> {
        let sql = match entity_type {
            EntityType::Email => {
                "SELECT id, owner_id, external_id, subject, from_address, from_name,
                        to_addresses_json, body, sent_at, created_at, embedding
                 FROM email
                 WHERE owner_id = ? AND embedding IS NOT NULL"
            }
            EntityType::Contact => {
                "SELECT id, owner_id, crm_id, address, name, properties_json, created_at, embedding
                 FROM contact
                 WHERE owner_id = ? AND embedding IS NOT NULL"
            }
            EntityType::Note => {
                "SELECT n.id, n.owner_id, n.crm_id, n.contact_id, n.body, n.created_at,
                        n.embedding, c.name AS contact_name
                 FROM note n
                 LEFT JOIN contact c ON c.id = n.contact_id
                 WHERE n.owner_id = ? AND n.embedding IS NOT NULL"
            }
        };

        let rows = sqlx::query(sql).bind(&owner_id.0).fetch_all(&self.pool).await?;
        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            let raw_embedding = row.try_get::<String, _>("embedding")?;
            let id = row.try_get::<String, _>("id")?;
            let embedding = match parse_embedding("embedding", &raw_embedding) {
                Ok(embedding) => embedding,
                Err(error) => {
                    warn!(
                        event_name = "vector_store.embedding.undecodable",
                        entity_type = entity_type.as_str(),
                        record_id = %id,
                        error = %error,
                        "skipping record with undecodable embedding"
                    );
                    continue;
                }
            };
            let Some(similarity) = cosine_similarity(query, &embedding) else {
                continue;
            };

            let item = match entity_type {
                EntityType::Email => email_item(&email_from_row(row)?, similarity),
                EntityType::Contact => contact_item(&contact_from_row(row)?, similarity),
                EntityType::Note => {
                    let contact_name = row.try_get::<Option<String>, _>("contact_name")?;
                    note_item(&note_from_row(row)?, contact_name.as_deref(), similarity)
                }
            };
            items.push(item);
        }
        Ok(items)
    }
}

#[async_trait::async_trait]
impl VectorStore for SqlVectorStore {
    async fn nearest_neighbors(
        &self,
        owner_id: &OwnerId,
        entity_type: EntityType,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedItem>, VectorStoreError> {
        let items = self
            .scan(owner_id, entity_type, query)
            .await
            .map_err(|error| VectorStoreError(error.to_string()))?;
        Ok(top_n(items, limit))
    }
}

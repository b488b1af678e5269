use sqlx::{sqlite::SqliteRow, Row};

use aide_core::domain::owner::OwnerId;
use aide_core::domain::record::{ContactRecord, EmailRecord, NoteRecord};
use aide_core::domain::retrieval::EntityType;

use super::decode::{encode_embedding, parse_json_object, parse_optional_timestamp, parse_timestamp};
use super::{EmbeddingCandidate, RecordRepository, RepositoryError};
use crate::DbPool;

const EMAIL_COLUMNS: &str = "id, owner_id, external_id, subject, from_address, from_name,
    to_addresses_json, body, sent_at, created_at";
const CONTACT_COLUMNS: &str = "id, owner_id, crm_id, address, name, properties_json, created_at";
const NOTE_COLUMNS: &str = "id, owner_id, crm_id, contact_id, body, created_at";

pub struct SqlRecordRepository {
    pool: DbPool,
}

impl SqlRecordRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl RecordRepository for SqlRecordRepository {
    async fn save_email(&self, email: EmailRecord) -> Result<(), RepositoryError> {
        let to_addresses = serde_json::to_string(&email.to_addresses).map_err(|error| {
            RepositoryError::Decode(format!("could not encode recipients: {error}"))
        })?;

        sqlx::query(
            "INSERT INTO email (
                id, owner_id, external_id, subject, from_address, from_name,
                to_addresses_json, body, sent_at, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(owner_id, external_id) DO UPDATE SET
                subject = excluded.subject,
                from_address = excluded.from_address,
                from_name = excluded.from_name,
                to_addresses_json = excluded.to_addresses_json,
                body = excluded.body,
                sent_at = excluded.sent_at",
        )
        .bind(&email.id)
        .bind(&email.owner_id.0)
        .bind(&email.external_id)
        .bind(&email.subject)
        .bind(&email.from_address)
        .bind(email.from_name.as_deref())
        .bind(to_addresses)
        .bind(&email.body)
        .bind(email.sent_at.map(|value| value.to_rfc3339()))
        .bind(email.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_email(
        &self,
        owner_id: &OwnerId,
        id: &str,
    ) -> Result<Option<EmailRecord>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {EMAIL_COLUMNS} FROM email
             WHERE owner_id = ? AND (id = ? OR external_id = ?)"
        ))
        .bind(&owner_id.0)
        .bind(id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(email_from_row).transpose()
    }

    async fn search_emails(
        &self,
        owner_id: &OwnerId,
        query: &str,
        limit: usize,
    ) -> Result<Vec<EmailRecord>, RepositoryError> {
        let pattern = format!("%{}%", query.trim().to_lowercase());
        let rows = sqlx::query(&format!(
            "SELECT {EMAIL_COLUMNS} FROM email
             WHERE owner_id = ?
               AND (lower(subject) LIKE ?
                    OR lower(from_address) LIKE ?
                    OR lower(IFNULL(from_name, '')) LIKE ?
                    OR lower(body) LIKE ?)
             ORDER BY IFNULL(sent_at, created_at) DESC
             LIMIT ?"
        ))
        .bind(&owner_id.0)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(email_from_row).collect()
    }

    async fn save_contact(&self, contact: ContactRecord) -> Result<(), RepositoryError> {
        let properties = serde_json::to_string(&contact.properties).map_err(|error| {
            RepositoryError::Decode(format!("could not encode properties: {error}"))
        })?;

        sqlx::query(
            "INSERT INTO contact (id, owner_id, crm_id, address, name, properties_json, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                crm_id = excluded.crm_id,
                address = excluded.address,
                name = excluded.name,
                properties_json = excluded.properties_json,
                embedding = CASE
                    WHEN contact.address IS excluded.address
                     AND contact.name IS excluded.name
                     AND contact.properties_json = excluded.properties_json
                    THEN contact.embedding
                    ELSE NULL
                END",
        )
        .bind(&contact.id)
        .bind(&contact.owner_id.0)
        .bind(contact.crm_id.as_deref())
        .bind(contact.address.as_deref().map(str::to_lowercase))
        .bind(contact.name.as_deref())
        .bind(properties)
        .bind(contact.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_contact(
        &self,
        owner_id: &OwnerId,
        id: &str,
    ) -> Result<Option<ContactRecord>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contact
             WHERE owner_id = ? AND (id = ? OR crm_id = ?)"
        ))
        .bind(&owner_id.0)
        .bind(id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(contact_from_row).transpose()
    }

    async fn find_contact_by_address(
        &self,
        owner_id: &OwnerId,
        address: &str,
    ) -> Result<Option<ContactRecord>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {CONTACT_COLUMNS} FROM contact
             WHERE owner_id = ? AND address = ?
             ORDER BY created_at ASC
             LIMIT 1"
        ))
        .bind(&owner_id.0)
        .bind(address.trim().to_lowercase())
        .fetch_optional(&self.pool)
        .await?;

        row.map(contact_from_row).transpose()
    }

    async fn save_note(&self, note: NoteRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO note (id, owner_id, crm_id, contact_id, body, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                crm_id = excluded.crm_id,
                contact_id = excluded.contact_id,
                body = excluded.body,
                embedding = CASE WHEN note.body = excluded.body THEN note.embedding ELSE NULL END",
        )
        .bind(&note.id)
        .bind(&note.owner_id.0)
        .bind(note.crm_id.as_deref())
        .bind(note.contact_id.as_deref())
        .bind(&note.body)
        .bind(note.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_note(
        &self,
        owner_id: &OwnerId,
        id: &str,
    ) -> Result<Option<NoteRecord>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {NOTE_COLUMNS} FROM note WHERE owner_id = ? AND (id = ? OR crm_id = ?)"
        ))
        .bind(&owner_id.0)
        .bind(id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(note_from_row).transpose()
    }

    async fn list_missing_embeddings(
        &self,
        entity_type: EntityType,
        owner_id: Option<&OwnerId>,
        limit: usize,
    ) -> Result<Vec<EmbeddingCandidate>, RepositoryError> {
        let columns = match entity_type {
            EntityType::Email => EMAIL_COLUMNS,
            EntityType::Contact => CONTACT_COLUMNS,
            EntityType::Note => NOTE_COLUMNS,
        };
        let table = entity_type.as_str();
        let rows = sqlx::query(&format!(
            "SELECT {columns} FROM {table}
             WHERE embedding IS NULL AND (? IS NULL OR owner_id = ?)
             ORDER BY created_at ASC
             LIMIT ?"
        ))
        .bind(owner_id.map(|id| id.0.as_str()))
        .bind(owner_id.map(|id| id.0.as_str()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let (id, owner_id, text) = match entity_type {
                    EntityType::Email => {
                        let email = email_from_row(row)?;
                        (email.id.clone(), email.owner_id.clone(), email.embedding_text())
                    }
                    EntityType::Contact => {
                        let contact = contact_from_row(row)?;
                        (contact.id.clone(), contact.owner_id.clone(), contact.embedding_text())
                    }
                    EntityType::Note => {
                        let note = note_from_row(row)?;
                        (note.id, note.owner_id, note.body)
                    }
                };
                Ok(EmbeddingCandidate { entity_type, id, owner_id, text })
            })
            .collect()
    }

    async fn set_embedding(
        &self,
        entity_type: EntityType,
        id: &str,
        embedding: &[f32],
    ) -> Result<(), RepositoryError> {
        let encoded = encode_embedding(embedding)?;
        sqlx::query(&format!("UPDATE {} SET embedding = ? WHERE id = ?", entity_type.as_str()))
            .bind(encoded)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub(crate) fn email_from_row(row: SqliteRow) -> Result<EmailRecord, RepositoryError> {
    let to_raw = row.try_get::<String, _>("to_addresses_json")?;
    let to_addresses = serde_json::from_str::<Vec<String>>(&to_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid JSON in `to_addresses_json`: {error}"))
    })?;

    Ok(EmailRecord {
        id: row.try_get("id")?,
        owner_id: OwnerId(row.try_get("owner_id")?),
        external_id: row.try_get("external_id")?,
        subject: row.try_get("subject")?,
        from_address: row.try_get("from_address")?,
        from_name: row.try_get("from_name")?,
        to_addresses,
        body: row.try_get("body")?,
        sent_at: parse_optional_timestamp("sent_at", row.try_get("sent_at")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

pub(crate) fn contact_from_row(row: SqliteRow) -> Result<ContactRecord, RepositoryError> {
    Ok(ContactRecord {
        id: row.try_get("id")?,
        owner_id: OwnerId(row.try_get("owner_id")?),
        crm_id: row.try_get("crm_id")?,
        address: row.try_get("address")?,
        name: row.try_get("name")?,
        properties: parse_json_object("properties_json", row.try_get("properties_json")?)?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

pub(crate) fn note_from_row(row: SqliteRow) -> Result<NoteRecord, RepositoryError> {
    Ok(NoteRecord {
        id: row.try_get("id")?,
        owner_id: OwnerId(row.try_get("owner_id")?),
        crm_id: row.try_get("crm_id")?,
        contact_id: row.try_get("contact_id")?,
        body: row.try_get("body")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::Map;

    use aide_core::domain::owner::{Owner, OwnerId};
    use aide_core::domain::record::{ContactRecord, EmailRecord, NoteRecord};
    use aide_core::domain::retrieval::EntityType;

    use super::SqlRecordRepository;
    use crate::repositories::{OwnerRepository, RecordRepository, SqlOwnerRepository};
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        SqlOwnerRepository::new(pool.clone())
            .save(Owner::new("owner-1", "owner@corp.com"))
            .await
            .expect("seed owner");
        pool
    }

    fn owner() -> OwnerId {
        OwnerId("owner-1".to_string())
    }

    fn email(id: &str, subject: &str, body: &str) -> EmailRecord {
        EmailRecord {
            id: id.to_string(),
            owner_id: owner(),
            external_id: format!("ext-{id}"),
            subject: subject.to_string(),
            from_address: "jane@acme.com".to_string(),
            from_name: Some("Jane Doe".to_string()),
            to_addresses: vec!["owner@corp.com".to_string()],
            body: body.to_string(),
            sent_at: Some(Utc::now()),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn keyword_search_matches_subject_sender_and_body() {
        let pool = setup_pool().await;
        let repo = SqlRecordRepository::new(pool.clone());
        repo.save_email(email("e1", "Quarterly Report", "numbers attached")).await.expect("save");
        repo.save_email(email("e2", "Lunch", "see you at noon")).await.expect("save");

        let by_subject = repo.search_emails(&owner(), "report", 10).await.expect("search");
        assert_eq!(by_subject.len(), 1);
        assert_eq!(by_subject[0].id, "e1");

        let by_sender = repo.search_emails(&owner(), "JANE", 10).await.expect("search");
        assert_eq!(by_sender.len(), 2);

        let limited = repo.search_emails(&owner(), "jane", 1).await.expect("search");
        assert_eq!(limited.len(), 1);

        let by_external = repo.find_email(&owner(), "ext-e2").await.expect("find");
        assert_eq!(by_external.map(|record| record.subject), Some("Lunch".to_string()));

        pool.close().await;
    }

    #[tokio::test]
    async fn missing_embeddings_are_listed_until_set() {
        let pool = setup_pool().await;
        let repo = SqlRecordRepository::new(pool.clone());
        repo.save_contact(ContactRecord {
            id: "c1".to_string(),
            owner_id: owner(),
            crm_id: Some("hs-1".to_string()),
            address: Some("Jane@Acme.com".to_string()),
            name: Some("Jane Doe".to_string()),
            properties: Map::new(),
            created_at: Utc::now(),
        })
        .await
        .expect("save contact");
        repo.save_note(NoteRecord {
            id: "n1".to_string(),
            owner_id: owner(),
            crm_id: None,
            contact_id: Some("c1".to_string()),
            body: "Met at the conference".to_string(),
            created_at: Utc::now(),
        })
        .await
        .expect("save note");

        let found = repo.find_contact_by_address(&owner(), "jane@ACME.com").await.expect("find");
        assert_eq!(found.map(|contact| contact.id), Some("c1".to_string()));

        let pending = repo
            .list_missing_embeddings(EntityType::Note, Some(&owner()), 10)
            .await
            .expect("list pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].text, "Met at the conference");

        repo.set_embedding(EntityType::Note, "n1", &[0.1, 0.2]).await.expect("set embedding");
        let pending = repo
            .list_missing_embeddings(EntityType::Note, None, 10)
            .await
            .expect("list pending");
        assert!(pending.is_empty());

        let contacts = repo
            .list_missing_embeddings(EntityType::Contact, None, 10)
            .await
            .expect("list contacts");
        assert!(contacts[0].text.contains("Name: Jane Doe"));

        pool.close().await;
    }

    #[tokio::test]
    async fn changed_content_drops_the_stale_embedding() {
        let pool = setup_pool().await;
        let repo = SqlRecordRepository::new(pool.clone());
        let note = NoteRecord {
            id: "n1".to_string(),
            owner_id: owner(),
            crm_id: Some("hs-note-1".to_string()),
            contact_id: None,
            body: "Call in March".to_string(),
            created_at: Utc::now(),
        };
        repo.save_note(note.clone()).await.expect("save note");
        repo.set_embedding(EntityType::Note, "n1", &[0.3, 0.4]).await.expect("set embedding");

        repo.save_note(note.clone()).await.expect("resave unchanged");
        assert!(repo
            .list_missing_embeddings(EntityType::Note, None, 10)
            .await
            .expect("pending")
            .is_empty());

        repo.save_note(NoteRecord { body: "Call in April".to_string(), ..note })
            .await
            .expect("save changed");
        let pending =
            repo.list_missing_embeddings(EntityType::Note, None, 10).await.expect("pending");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].text, "Call in April");

        pool.close().await;
    }
}

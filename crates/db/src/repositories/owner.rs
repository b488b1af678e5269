use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use sqlx::{sqlite::SqliteRow, Row};

use aide_core::domain::owner::{Owner, OwnerCredentials, OwnerId};

use super::decode::{parse_optional_timestamp, parse_timestamp};
use super::{OwnerRepository, RepositoryError};
use crate::DbPool;

pub struct SqlOwnerRepository {
    pool: DbPool,
}

impl SqlOwnerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl OwnerRepository for SqlOwnerRepository {
    async fn find(&self, id: &OwnerId) -> Result<Option<Owner>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, address, mailbox_token, crm_token, last_checked_at, created_at
             FROM owner
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(owner_from_row).transpose()
    }

    async fn save(&self, owner: Owner) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO owner (id, address, mailbox_token, crm_token, last_checked_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                address = excluded.address,
                mailbox_token = excluded.mailbox_token,
                crm_token = excluded.crm_token,
                last_checked_at = excluded.last_checked_at",
        )
        .bind(&owner.id.0)
        .bind(&owner.address)
        .bind(owner.credentials.mailbox_token.as_ref().map(|token| token.expose_secret()))
        .bind(owner.credentials.crm_token.as_ref().map(|token| token.expose_secret()))
        .bind(owner.last_checked_at.map(|value| value.to_rfc3339()))
        .bind(owner.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_with_mailbox(&self) -> Result<Vec<Owner>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, address, mailbox_token, crm_token, last_checked_at, created_at
             FROM owner
             WHERE mailbox_token IS NOT NULL AND mailbox_token <> ''
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(owner_from_row).collect()
    }

    async fn list_connected(&self) -> Result<Vec<Owner>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, address, mailbox_token, crm_token, last_checked_at, created_at
             FROM owner
             WHERE (mailbox_token IS NOT NULL AND mailbox_token <> '')
                OR (crm_token IS NOT NULL AND crm_token <> '')
             ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(owner_from_row).collect()
    }

    async fn mark_checked(&self, id: &OwnerId, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE owner SET last_checked_at = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn owner_from_row(row: SqliteRow) -> Result<Owner, RepositoryError> {
    let secret = |column: &str| -> Result<Option<SecretString>, RepositoryError> {
        Ok(row
            .try_get::<Option<String>, _>(column)?
            .filter(|value| !value.is_empty())
            .map(SecretString::from))
    };

    Ok(Owner {
        id: OwnerId(row.try_get("id")?),
        address: row.try_get("address")?,
        credentials: OwnerCredentials {
            mailbox_token: secret("mailbox_token")?,
            crm_token: secret("crm_token")?,
        },
        last_checked_at: parse_optional_timestamp(
            "last_checked_at",
            row.try_get("last_checked_at")?,
        )?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use secrecy::{ExposeSecret, SecretString};

    use aide_core::domain::owner::{Owner, OwnerCredentials, OwnerId};

    use super::SqlOwnerRepository;
    use crate::repositories::OwnerRepository;
    use crate::{connect_with_settings, migrations, DbPool};

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    #[tokio::test]
    async fn owners_without_mailbox_are_not_listed() {
        let pool = setup_pool().await;
        let repo = SqlOwnerRepository::new(pool.clone());

        let connected = Owner::new("owner-a", "a@corp.com").with_credentials(OwnerCredentials {
            mailbox_token: Some(SecretString::from("mailbox-token".to_string())),
            crm_token: None,
        });
        repo.save(connected).await.expect("save connected owner");
        repo.save(Owner::new("owner-b", "b@corp.com")).await.expect("save bare owner");

        let listed = repo.list_with_mailbox().await.expect("list owners");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, OwnerId("owner-a".to_string()));
        assert_eq!(
            listed[0].credentials.mailbox_token.as_ref().map(|token| token.expose_secret().to_string()),
            Some("mailbox-token".to_string())
        );

        pool.close().await;
    }

    #[tokio::test]
    async fn connected_owners_include_crm_only_accounts() {
        let pool = setup_pool().await;
        let repo = SqlOwnerRepository::new(pool.clone());

        repo.save(Owner::new("owner-c", "c@corp.com").with_credentials(OwnerCredentials {
            mailbox_token: None,
            crm_token: Some(SecretString::from("crm-token".to_string())),
        }))
        .await
        .expect("save crm owner");
        repo.save(Owner::new("owner-a", "a@corp.com").with_credentials(OwnerCredentials {
            mailbox_token: Some(SecretString::from("mailbox-token".to_string())),
            crm_token: None,
        }))
        .await
        .expect("save mailbox owner");
        repo.save(Owner::new("owner-b", "b@corp.com")).await.expect("save bare owner");

        let ids: Vec<String> =
            repo.list_connected().await.expect("list").into_iter().map(|owner| owner.id.0).collect();
        assert_eq!(ids, vec!["owner-a".to_string(), "owner-c".to_string()]);

        pool.close().await;
    }

    #[tokio::test]
    async fn mark_checked_persists_timestamp() {
        let pool = setup_pool().await;
        let repo = SqlOwnerRepository::new(pool.clone());
        let owner = Owner::new("owner-a", "a@corp.com");
        repo.save(owner.clone()).await.expect("save owner");

        let at: DateTime<Utc> = DateTime::parse_from_rfc3339("2026-03-01T10:00:00Z")
            .expect("valid rfc3339")
            .with_timezone(&Utc);
        repo.mark_checked(&owner.id, at).await.expect("mark checked");

        let found = repo.find(&owner.id).await.expect("find owner").expect("owner exists");
        assert_eq!(found.last_checked_at, Some(at));
        assert!(found.credentials.mailbox_token.is_none());

        pool.close().await;
    }
}

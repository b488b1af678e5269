//! Periodic per-owner sync: imports CRM contacts and notes into the local
//! store, then embeds whatever is still missing a vector.
//!
//! Runs on its own cadence beside the ingestion loop and shares its guard
//! semantics: an overlapping run returns a skipped report.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use aide_core::config::SyncConfig;
use aide_core::domain::owner::Owner;
use aide_core::domain::record::{ContactRecord, NoteRecord};
use aide_db::repositories::{OwnerRepository, RecordRepository, RepositoryError};

use crate::capabilities::{CapabilityError, Crm, CrmContact, CrmNote};
use crate::indexing::EmbeddingIndexer;
use crate::ingestion::CycleGuard;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SyncSettings {
    pub embed_batch: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self { embed_batch: 100 }
    }
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self { embed_batch: config.embed_batch.max(1) }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub skipped: bool,
    pub owners_processed: usize,
    pub contacts_imported: usize,
    pub notes_imported: usize,
    pub embedded: usize,
    pub failures: usize,
}

#[derive(Debug, Error)]
enum ImportError {
    #[error(transparent)]
    Crm(#[from] CapabilityError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

pub struct SyncJob {
    owners: Arc<dyn OwnerRepository>,
    crm: Arc<dyn Crm>,
    records: Arc<dyn RecordRepository>,
    indexer: Arc<EmbeddingIndexer>,
    settings: SyncSettings,
    running: AtomicBool,
}

impl SyncJob {
    pub fn new(
        owners: Arc<dyn OwnerRepository>,
        crm: Arc<dyn Crm>,
        records: Arc<dyn RecordRepository>,
        indexer: Arc<EmbeddingIndexer>,
        settings: SyncSettings,
    ) -> Self {
        Self { owners, crm, records, indexer, settings, running: AtomicBool::new(false) }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Syncs every owner holding a credential. A failing step is logged and
    /// counted; the remaining steps and owners still run.
    pub async fn run(&self) -> SyncReport {
        if self.running.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            info!(event_name = "sync.run.skipped", "previous sync still running");
            return SyncReport { skipped: true, ..SyncReport::default() };
        }
        let _guard = CycleGuard(&self.running);

        let mut report = SyncReport::default();
        let owners = match self.owners.list_connected().await {
            Ok(owners) => owners,
            Err(error) => {
                warn!(event_name = "sync.run.owners_failed", error = %error, "could not list owners");
                report.failures += 1;
                return report;
            }
        };

        for owner in &owners {
            let mut clean = true;

            if owner.credentials.has_crm() {
                if let Err(error) = self.import_crm(owner, &mut report).await {
                    clean = false;
                    report.failures += 1;
                    warn!(
                        event_name = "sync.crm.failed",
                        owner_id = %owner.id,
                        error = %error,
                        "CRM import skipped this run"
                    );
                }
            }

            match self.indexer.backfill(Some(&owner.id), self.settings.embed_batch).await {
                Ok(indexed) => report.embedded += indexed.embedded,
                Err(error) => {
                    clean = false;
                    report.failures += 1;
                    warn!(
                        event_name = "sync.embeddings.failed",
                        owner_id = %owner.id,
                        error = %error,
                        "embedding backfill skipped this run"
                    );
                }
            }

            if clean {
                report.owners_processed += 1;
            }
        }

        info!(
            event_name = "sync.run.finished",
            owners = report.owners_processed,
            contacts = report.contacts_imported,
            notes = report.notes_imported,
            embedded = report.embedded,
            failures = report.failures,
            "sync finished"
        );
        report
    }

    async fn import_crm(&self, owner: &Owner, report: &mut SyncReport) -> Result<(), ImportError> {
        for contact in self.crm.list_contacts(owner).await? {
            self.save_contact(owner, contact).await?;
            report.contacts_imported += 1;
        }
        for note in self.crm.list_notes(owner).await? {
            self.save_note(owner, note).await?;
            report.notes_imported += 1;
        }
        Ok(())
    }

    /// Upserts keyed on the CRM id so repeated runs keep the local id.
    async fn save_contact(&self, owner: &Owner, contact: CrmContact) -> Result<(), RepositoryError> {
        let existing = self.records.find_contact(&owner.id, &contact.id).await?;
        let (id, created_at) = match existing {
            Some(stored) => (stored.id, stored.created_at),
            None => (Uuid::new_v4().to_string(), Utc::now()),
        };

        self.records
            .save_contact(ContactRecord {
                id,
                owner_id: owner.id.clone(),
                crm_id: Some(contact.id),
                address: contact.email.map(|email| email.trim().to_lowercase()),
                name: contact.name,
                properties: contact.properties,
                created_at,
            })
            .await
    }

    async fn save_note(&self, owner: &Owner, note: CrmNote) -> Result<(), RepositoryError> {
        let existing = self.records.find_note(&owner.id, &note.id).await?;
        let (id, created_at) = match existing {
            Some(stored) => (stored.id, stored.created_at),
            None => (Uuid::new_v4().to_string(), note.timestamp.unwrap_or_else(Utc::now)),
        };
        let contact_id = match &note.contact_id {
            Some(crm_contact) => {
                self.records.find_contact(&owner.id, crm_contact).await?.map(|contact| contact.id)
            }
            None => None,
        };

        self.records
            .save_note(NoteRecord {
                id,
                owner_id: owner.id.clone(),
                crm_id: Some(note.id),
                contact_id,
                body: note.body,
                created_at,
            })
            .await
    }
}

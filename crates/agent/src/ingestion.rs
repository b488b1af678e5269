//! Periodic mailbox sweep that stores new mail, enriches unknown senders and
//! completes waiting tasks.
//!
//! The loop owns no timer. The server calls [`IngestionLoop::run_cycle`] on its
//! own interval; a call that arrives while a cycle is still running returns a
//! skipped report immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use aide_core::config::IngestionConfig;
use aide_core::domain::event::InboundEvent;
use aide_core::domain::owner::Owner;
use aide_core::domain::record::EmailRecord;
use aide_core::tasks::CompletionOutcome;
use aide_db::repositories::{OwnerRepository, RecordRepository, RepositoryError};

use crate::capabilities::{CapabilityError, Mailbox};
use crate::correlation::{CorrelationError, TaskCorrelationEngine};
use crate::enrichment::ContactEnricher;

const MAX_LOOKBACK_SECS: u64 = 30 * 24 * 3600;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IngestionSettings {
    pub lookback: Duration,
    pub max_events: usize,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self { lookback: Duration::hours(1), max_events: 50 }
    }
}

impl From<&IngestionConfig> for IngestionSettings {
    fn from(config: &IngestionConfig) -> Self {
        Self {
            lookback: Duration::seconds(
                i64::try_from(config.lookback_secs.min(MAX_LOOKBACK_SECS)).unwrap_or(3600),
            ),
            max_events: usize::try_from(config.max_events).unwrap_or(usize::MAX),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Another cycle was already running; nothing was done.
    pub skipped: bool,
    pub owners_processed: usize,
    pub events_seen: usize,
    pub tasks_completed: usize,
    pub contacts_created: usize,
    /// Owners whose fetch returned a full page; mail past the cap is not seen.
    pub capped_owners: usize,
    pub failures: usize,
}

#[derive(Debug, Error)]
enum OwnerSweepError {
    #[error(transparent)]
    Mailbox(#[from] CapabilityError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Debug, Error)]
enum EventError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
}

pub struct IngestionLoop {
    owners: Arc<dyn OwnerRepository>,
    mailbox: Arc<dyn Mailbox>,
    records: Arc<dyn RecordRepository>,
    correlation: Arc<TaskCorrelationEngine>,
    enricher: Option<ContactEnricher>,
    settings: IngestionSettings,
    running: AtomicBool,
}

/// Clears the running flag when the cycle ends, including on panic.
pub(crate) struct CycleGuard<'a>(pub(crate) &'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl IngestionLoop {
    pub fn new(
        owners: Arc<dyn OwnerRepository>,
        mailbox: Arc<dyn Mailbox>,
        records: Arc<dyn RecordRepository>,
        correlation: Arc<TaskCorrelationEngine>,
        settings: IngestionSettings,
    ) -> Self {
        Self {
            owners,
            mailbox,
            records,
            correlation,
            enricher: None,
            settings,
            running: AtomicBool::new(false),
        }
    }

    pub fn with_contact_enrichment(mut self, enricher: ContactEnricher) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub async fn run_cycle(&self) -> CycleReport {
        if self.running.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            info!(event_name = "ingestion.cycle.skipped", "previous ingestion cycle still running");
            return CycleReport { skipped: true, ..CycleReport::default() };
        }
        let _guard = CycleGuard(&self.running);

        let cycle_start = Utc::now();
        let mut report = CycleReport::default();

        let owners = match self.owners.list_with_mailbox().await {
            Ok(owners) => owners,
            Err(error) => {
                warn!(
                    event_name = "ingestion.cycle.owners_failed",
                    error = %error,
                    "could not list owners; cycle aborted"
                );
                report.failures += 1;
                return report;
            }
        };

        for owner in &owners {
            match self.sweep_owner(owner, cycle_start, &mut report).await {
                Ok(()) => report.owners_processed += 1,
                Err(error) => {
                    report.failures += 1;
                    warn!(
                        event_name = "ingestion.owner.failed",
                        owner_id = %owner.id,
                        error = %error,
                        "owner skipped this cycle"
                    );
                }
            }
        }

        info!(
            event_name = "ingestion.cycle.finished",
            owners = report.owners_processed,
            events = report.events_seen,
            tasks_completed = report.tasks_completed,
            contacts_created = report.contacts_created,
            capped_owners = report.capped_owners,
            failures = report.failures,
            "ingestion cycle finished"
        );
        report
    }

    async fn sweep_owner(
        &self,
        owner: &Owner,
        cycle_start: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<(), OwnerSweepError> {
        let since = owner.last_checked_at.unwrap_or(cycle_start - self.settings.lookback);
        let events =
            self.mailbox.fetch_events_since(owner, since, self.settings.max_events).await?;
        report.events_seen += events.len();
        if events.len() >= self.settings.max_events {
            report.capped_owners += 1;
            warn!(
                event_name = "ingestion.owner.capped",
                owner_id = %owner.id,
                max_events = self.settings.max_events,
                "fetch hit the per-cycle cap; older mail in this window is skipped"
            );
        }

        for event in &events {
            if let Err(error) = self.process_event(owner, event, report).await {
                report.failures += 1;
                warn!(
                    event_name = "ingestion.event.failed",
                    owner_id = %owner.id,
                    event_id = %event.external_id,
                    error = %error,
                    "event skipped"
                );
            }
        }

        self.owners.mark_checked(&owner.id, cycle_start).await?;
        Ok(())
    }

    async fn process_event(
        &self,
        owner: &Owner,
        event: &InboundEvent,
        report: &mut CycleReport,
    ) -> Result<(), EventError> {
        self.records.save_email(email_from_event(owner, event)).await?;

        if let Some(enricher) = &self.enricher {
            match enricher.ensure_contact(owner, event).await {
                Ok(true) => report.contacts_created += 1,
                Ok(false) => {}
                Err(error) => warn!(
                    event_name = "ingestion.enrich.failed",
                    owner_id = %owner.id,
                    event_id = %event.external_id,
                    error = %error,
                    "contact auto-creation skipped"
                ),
            }
        }

        for task in self.correlation.match_event(event, &owner.id).await? {
            if let CompletionOutcome::Completed(_) = self.correlation.complete(&task.id, event).await? {
                report.tasks_completed += 1;
            }
        }
        Ok(())
    }
}

fn email_from_event(owner: &Owner, event: &InboundEvent) -> EmailRecord {
    EmailRecord {
        id: Uuid::new_v4().to_string(),
        owner_id: owner.id.clone(),
        external_id: event.external_id.clone(),
        subject: event.subject.clone(),
        from_address: event.sender_key(),
        from_name: event.sender_name.clone(),
        to_addresses: vec![owner.address.clone()],
        body: event.body.clone(),
        sent_at: Some(event.received_at),
        created_at: Utc::now(),
    }
}

//! Wires repositories, providers and agent services from one [`AppConfig`].

use std::sync::Arc;

use thiserror::Error;

use aide_agent::capabilities::{Crm, DisabledCrm, DisabledMailbox, Mailbox};
use aide_agent::correlation::CorrelationError;
use aide_agent::enrichment::ContactEnricher;
use aide_agent::indexing::EmbeddingIndexer;
use aide_agent::llm::LlmClient;
use aide_agent::{
    AgentRuntime, ConversationService, IngestionLoop, IngestionSettings, RuntimeSettings, SyncJob,
    SyncSettings, TaskCorrelationEngine, ToolDependencies, ToolRegistry,
};
use aide_core::config::AppConfig;
use aide_core::retrieval::{Embedder, RetrievalEngine, SearchOptions};
use aide_db::repositories::{
    ConversationRepository, MessageRepository, OwnerRepository, RecordRepository,
    SqlConversationRepository, SqlMessageRepository, SqlOwnerRepository, SqlRecordRepository,
    SqlTaskRepository, TaskRepository,
};
use aide_db::{DbPool, SqlVectorStore};

use crate::{GmailMailbox, HubSpotCrm, OpenAiChatClient, OpenAiEmbedder, ProviderError};

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Correlation(#[from] CorrelationError),
}

pub struct Services {
    pub owners: Arc<dyn OwnerRepository>,
    pub conversations: Arc<ConversationService>,
    pub correlation: Arc<TaskCorrelationEngine>,
    pub runtime: Arc<AgentRuntime>,
    pub ingestion: Arc<IngestionLoop>,
    pub indexer: Arc<EmbeddingIndexer>,
    pub sync: Arc<SyncJob>,
}

impl Services {
    pub fn assemble(config: &AppConfig, pool: DbPool) -> Result<Self, AssemblyError> {
        let owners: Arc<dyn OwnerRepository> = Arc::new(SqlOwnerRepository::new(pool.clone()));
        let conversation_repo: Arc<dyn ConversationRepository> =
            Arc::new(SqlConversationRepository::new(pool.clone()));
        let messages: Arc<dyn MessageRepository> = Arc::new(SqlMessageRepository::new(pool.clone()));
        let tasks: Arc<dyn TaskRepository> = Arc::new(SqlTaskRepository::new(pool.clone()));
        let records: Arc<dyn RecordRepository> = Arc::new(SqlRecordRepository::new(pool.clone()));

        let llm: Arc<dyn LlmClient> = Arc::new(OpenAiChatClient::new(&config.llm)?);
        let embedder: Arc<dyn Embedder> = Arc::new(OpenAiEmbedder::new(&config.embedding)?);
        let retrieval = RetrievalEngine::new(embedder.clone(), Arc::new(SqlVectorStore::new(pool)));

        let mailbox: Arc<dyn Mailbox> = if config.mailbox.enabled {
            Arc::new(GmailMailbox::new(&config.mailbox)?)
        } else {
            Arc::new(DisabledMailbox)
        };
        let crm: Arc<dyn Crm> = if config.crm.enabled {
            Arc::new(HubSpotCrm::new(&config.crm)?)
        } else {
            Arc::new(DisabledCrm)
        };

        let correlation = Arc::new(TaskCorrelationEngine::new(
            tasks.clone(),
            messages.clone(),
            conversation_repo.clone(),
            llm.clone(),
        )?);
        let conversations = Arc::new(ConversationService::new(
            conversation_repo.clone(),
            messages.clone(),
            tasks,
            llm.clone(),
        ));

        let tools = Arc::new(ToolRegistry::with_catalog(ToolDependencies {
            records: records.clone(),
            retrieval: retrieval.clone(),
            mailbox: mailbox.clone(),
            crm: crm.clone(),
            tasks: correlation.clone(),
        }));
        let settings = RuntimeSettings {
            grounding: SearchOptions::with_limit(
                config.retrieval.top_k,
                config.retrieval.min_similarity,
            ),
            history_limit: config.retrieval.history_limit,
            temperature: config.llm.temperature,
        };
        let runtime = AgentRuntime::new(
            conversation_repo,
            messages,
            retrieval,
            llm.clone(),
            tools,
            settings,
        )
        .with_auto_naming(conversations.clone());

        let mut ingestion = IngestionLoop::new(
            owners.clone(),
            mailbox,
            records.clone(),
            correlation.clone(),
            IngestionSettings::from(&config.ingestion),
        );
        if config.ingestion.auto_create_contacts {
            ingestion = ingestion.with_contact_enrichment(ContactEnricher::new(
                records.clone(),
                crm.clone(),
                llm,
            ));
        }

        let indexer = Arc::new(EmbeddingIndexer::new(records.clone(), embedder));
        let sync = SyncJob::new(
            owners.clone(),
            crm,
            records,
            indexer.clone(),
            SyncSettings::from(&config.sync),
        );

        Ok(Self {
            owners,
            conversations,
            correlation,
            runtime: Arc::new(runtime),
            ingestion: Arc::new(ingestion),
            indexer,
            sync: Arc::new(sync),
        })
    }
}

#[cfg(test)]
mod tests {
    use aide_core::config::AppConfig;
    use aide_core::domain::owner::Owner;
    use aide_db::{connect_with_settings, migrations};

    use super::Services;

    #[tokio::test]
    async fn assembled_services_share_one_database() {
        let pool = connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool");
        migrations::run_pending(&pool).await.expect("migrations");

        let services = Services::assemble(&AppConfig::default(), pool).expect("assemble");
        services.owners.save(Owner::new("owner-1", "owner@corp.com")).await.expect("save owner");

        let conversation = services
            .conversations
            .get_or_create_default(&Owner::new("owner-1", "owner@corp.com").id)
            .await
            .expect("default conversation");
        assert_eq!(conversation.name, "Default Chat");

        // Mailbox is disabled by default, so the owner has nothing to sweep.
        let report = services.ingestion.run_cycle().await;
        assert!(!report.skipped);
        assert_eq!(report.owners_processed, 0);

        // A credential-less owner is not a sync target either.
        let synced = services.sync.run().await;
        assert_eq!((synced.owners_processed, synced.failures), (0, 0));
    }
}

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use aide_core::domain::conversation::{Conversation, ConversationId, Message};
use aide_core::domain::owner::{Owner, OwnerId};
use aide_core::domain::record::{ContactRecord, EmailRecord, NoteRecord};
use aide_core::domain::retrieval::{EntityType, RetrievedItem};
use aide_core::domain::task::{Task, TaskId, TaskStatistics, TaskStatus};
use aide_core::retrieval::{VectorStore, VectorStoreError};

use super::{
    ConversationRepository, EmbeddingCandidate, MessageRepository, OwnerRepository,
    RecordRepository, RepositoryError, TaskRepository,
};
use crate::vector::{contact_item, cosine_similarity, email_item, note_item, top_n};

#[derive(Default)]
pub struct InMemoryOwnerRepository {
    owners: RwLock<HashMap<String, Owner>>,
}

#[async_trait::async_trait]
impl OwnerRepository for InMemoryOwnerRepository {
    async fn find(&self, id: &OwnerId) -> Result<Option<Owner>, RepositoryError> {
        let owners = self.owners.read().await;
        Ok(owners.get(&id.0).cloned())
    }

    async fn save(&self, owner: Owner) -> Result<(), RepositoryError> {
        let mut owners = self.owners.write().await;
        owners.insert(owner.id.0.clone(), owner);
        Ok(())
    }

    async fn list_with_mailbox(&self) -> Result<Vec<Owner>, RepositoryError> {
        let owners = self.owners.read().await;
        let mut listed: Vec<Owner> =
            owners.values().filter(|owner| owner.credentials.has_mailbox()).cloned().collect();
        listed.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(listed)
    }

    async fn list_connected(&self) -> Result<Vec<Owner>, RepositoryError> {
        let owners = self.owners.read().await;
        let mut listed: Vec<Owner> = owners
            .values()
            .filter(|owner| owner.credentials.has_mailbox() || owner.credentials.has_crm())
            .cloned()
            .collect();
        listed.sort_by(|left, right| left.id.cmp(&right.id));
        Ok(listed)
    }

    async fn mark_checked(&self, id: &OwnerId, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut owners = self.owners.write().await;
        if let Some(owner) = owners.get_mut(&id.0) {
            owner.last_checked_at = Some(at);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: RwLock<HashMap<String, Conversation>>,
}

#[async_trait::async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find(&self, id: &ConversationId) -> Result<Option<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations.get(&id.0).cloned())
    }

    async fn list_for_owner(
        &self,
        owner_id: &OwnerId,
    ) -> Result<Vec<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        let mut listed: Vec<Conversation> = conversations
            .values()
            .filter(|conversation| &conversation.owner_id == owner_id)
            .cloned()
            .collect();
        listed.sort_by(|left, right| {
            right
                .last_activity_at
                .cmp(&left.last_activity_at)
                .then_with(|| right.created_at.cmp(&left.created_at))
        });
        Ok(listed)
    }

    async fn find_by_name(
        &self,
        owner_id: &OwnerId,
        name: &str,
    ) -> Result<Option<Conversation>, RepositoryError> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .values()
            .filter(|conversation| &conversation.owner_id == owner_id && conversation.name == name)
            .min_by_key(|conversation| conversation.created_at)
            .cloned())
    }

    async fn save(&self, conversation: Conversation) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        conversations.insert(conversation.id.0.clone(), conversation);
        Ok(())
    }

    async fn touch(&self, id: &ConversationId, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut conversations = self.conversations.write().await;
        if let Some(conversation) = conversations.get_mut(&id.0) {
            conversation.last_activity_at = at;
        }
        Ok(())
    }

    async fn delete(&self, id: &ConversationId) -> Result<bool, RepositoryError> {
        let mut conversations = self.conversations.write().await;
        Ok(conversations.remove(&id.0).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: RwLock<Vec<Message>>,
}

#[async_trait::async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn append(&self, message: Message) -> Result<(), RepositoryError> {
        let mut messages = self.messages.write().await;
        messages.push(message);
        Ok(())
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
        limit: Option<usize>,
    ) -> Result<Vec<Message>, RepositoryError> {
        let messages = self.messages.read().await;
        let mut listed: Vec<Message> = messages
            .iter()
            .filter(|message| &message.conversation_id == conversation_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        listed.sort_by_key(|message| message.created_at);
        if let Some(limit) = limit {
            let skip = listed.len().saturating_sub(limit);
            listed.drain(..skip);
        }
        Ok(listed)
    }

    async fn count_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<u32, RepositoryError> {
        let messages = self.messages.read().await;
        let count = messages.iter().filter(|message| &message.conversation_id == conversation_id).count();
        u32::try_from(count)
            .map_err(|_| RepositoryError::Decode(format!("message count overflow: {count}")))
    }
}

#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<String, Task>>,
}

impl InMemoryTaskRepository {
    async fn collect_sorted(&self, filter: impl Fn(&Task) -> bool, newest_first: bool) -> Vec<Task> {
        let tasks = self.tasks.read().await;
        let mut listed: Vec<Task> = tasks.values().filter(|task| filter(task)).cloned().collect();
        listed.sort_by(|left, right| {
            let order = left.created_at.cmp(&right.created_at).then_with(|| left.id.0.cmp(&right.id.0));
            if newest_first {
                order.reverse()
            } else {
                order
            }
        });
        listed
    }
}

#[async_trait::async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn find(&self, id: &TaskId) -> Result<Option<Task>, RepositoryError> {
        let tasks = self.tasks.read().await;
        Ok(tasks.get(&id.0).cloned())
    }

    async fn save(&self, task: Task) -> Result<(), RepositoryError> {
        let mut tasks = self.tasks.write().await;
        tasks.insert(task.id.0.clone(), task);
        Ok(())
    }

    async fn list_for_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Task>, RepositoryError> {
        Ok(self.collect_sorted(|task| &task.conversation_id == conversation_id, true).await)
    }

    async fn list_for_owner(
        &self,
        owner_id: &OwnerId,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, RepositoryError> {
        Ok(self
            .collect_sorted(
                |task| &task.owner_id == owner_id && status.map_or(true, |wanted| task.status == wanted),
                true,
            )
            .await)
    }

    async fn list_waiting_for_counterparty(
        &self,
        owner_id: &OwnerId,
        counterparty: &str,
    ) -> Result<Vec<Task>, RepositoryError> {
        let counterparty = counterparty.trim().to_lowercase();
        Ok(self
            .collect_sorted(
                |task| {
                    &task.owner_id == owner_id
                        && task.status == TaskStatus::Waiting
                        && task.expected_counterparty.to_lowercase() == counterparty
                },
                false,
            )
            .await)
    }

    async fn statistics(&self, owner_id: &OwnerId) -> Result<TaskStatistics, RepositoryError> {
        let tasks = self.tasks.read().await;
        let mut statistics = TaskStatistics::default();
        for task in tasks.values().filter(|task| &task.owner_id == owner_id) {
            statistics.record(task.status, 1);
        }
        Ok(statistics)
    }
}

#[derive(Default)]
struct RecordTables {
    emails: HashMap<String, EmailRecord>,
    contacts: HashMap<String, ContactRecord>,
    notes: HashMap<String, NoteRecord>,
    embeddings: HashMap<(EntityType, String), Vec<f32>>,
}

impl RecordTables {
    fn owner_of(&self, entity_type: EntityType, id: &str) -> Option<&OwnerId> {
        match entity_type {
            EntityType::Email => self.emails.get(id).map(|email| &email.owner_id),
            EntityType::Contact => self.contacts.get(id).map(|contact| &contact.owner_id),
            EntityType::Note => self.notes.get(id).map(|note| &note.owner_id),
        }
    }
}

/// Record store and vector store in one, for tests and local runs without a
/// database file.
#[derive(Default)]
pub struct InMemoryRecordRepository {
    tables: RwLock<RecordTables>,
}

#[async_trait::async_trait]
impl RecordRepository for InMemoryRecordRepository {
    async fn save_email(&self, email: EmailRecord) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        let existing = tables
            .emails
            .values()
            .find(|stored| stored.owner_id == email.owner_id && stored.external_id == email.external_id)
            .map(|stored| stored.id.clone());
        match existing {
            Some(id) => {
                tables.emails.insert(id.clone(), EmailRecord { id, ..email });
            }
            None => {
                tables.emails.insert(email.id.clone(), email);
            }
        }
        Ok(())
    }

    async fn find_email(
        &self,
        owner_id: &OwnerId,
        id: &str,
    ) -> Result<Option<EmailRecord>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .emails
            .values()
            .find(|email| &email.owner_id == owner_id && (email.id == id || email.external_id == id))
            .cloned())
    }

    async fn search_emails(
        &self,
        owner_id: &OwnerId,
        query: &str,
        limit: usize,
    ) -> Result<Vec<EmailRecord>, RepositoryError> {
        let needle = query.trim().to_lowercase();
        let tables = self.tables.read().await;
        let mut matches: Vec<EmailRecord> = tables
            .emails
            .values()
            .filter(|email| &email.owner_id == owner_id)
            .filter(|email| {
                [
                    email.subject.as_str(),
                    email.from_address.as_str(),
                    email.from_name.as_deref().unwrap_or(""),
                    email.body.as_str(),
                ]
                .iter()
                .any(|field| field.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect();
        matches.sort_by(|left, right| {
            right.sent_at.unwrap_or(right.created_at).cmp(&left.sent_at.unwrap_or(left.created_at))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    async fn save_contact(&self, mut contact: ContactRecord) -> Result<(), RepositoryError> {
        contact.address = contact.address.map(|address| address.to_lowercase());
        let mut tables = self.tables.write().await;
        let changed = tables.contacts.get(&contact.id).is_some_and(|stored| {
            stored.address != contact.address
                || stored.name != contact.name
                || stored.properties != contact.properties
        });
        if changed {
            tables.embeddings.remove(&(EntityType::Contact, contact.id.clone()));
        }
        tables.contacts.insert(contact.id.clone(), contact);
        Ok(())
    }

    async fn find_contact(
        &self,
        owner_id: &OwnerId,
        id: &str,
    ) -> Result<Option<ContactRecord>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .contacts
            .values()
            .find(|contact| {
                &contact.owner_id == owner_id
                    && (contact.id == id || contact.crm_id.as_deref() == Some(id))
            })
            .cloned())
    }

    async fn find_contact_by_address(
        &self,
        owner_id: &OwnerId,
        address: &str,
    ) -> Result<Option<ContactRecord>, RepositoryError> {
        let address = address.trim().to_lowercase();
        let tables = self.tables.read().await;
        Ok(tables
            .contacts
            .values()
            .filter(|contact| {
                &contact.owner_id == owner_id && contact.address.as_deref() == Some(address.as_str())
            })
            .min_by_key(|contact| contact.created_at)
            .cloned())
    }

    async fn save_note(&self, note: NoteRecord) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.notes.get(&note.id).is_some_and(|stored| stored.body != note.body) {
            tables.embeddings.remove(&(EntityType::Note, note.id.clone()));
        }
        tables.notes.insert(note.id.clone(), note);
        Ok(())
    }

    async fn find_note(
        &self,
        owner_id: &OwnerId,
        id: &str,
    ) -> Result<Option<NoteRecord>, RepositoryError> {
        let tables = self.tables.read().await;
        Ok(tables
            .notes
            .values()
            .find(|note| {
                &note.owner_id == owner_id && (note.id == id || note.crm_id.as_deref() == Some(id))
            })
            .cloned())
    }

    async fn list_missing_embeddings(
        &self,
        entity_type: EntityType,
        owner_id: Option<&OwnerId>,
        limit: usize,
    ) -> Result<Vec<EmbeddingCandidate>, RepositoryError> {
        let tables = self.tables.read().await;
        let wanted = |candidate_owner: &OwnerId, id: &str| {
            owner_id.map_or(true, |owner_id| owner_id == candidate_owner)
                && !tables.embeddings.contains_key(&(entity_type, id.to_string()))
        };

        let mut candidates: Vec<(DateTime<Utc>, EmbeddingCandidate)> = match entity_type {
            EntityType::Email => tables
                .emails
                .values()
                .filter(|email| wanted(&email.owner_id, &email.id))
                .map(|email| {
                    (
                        email.created_at,
                        EmbeddingCandidate {
                            entity_type,
                            id: email.id.clone(),
                            owner_id: email.owner_id.clone(),
                            text: email.embedding_text(),
                        },
                    )
                })
                .collect(),
            EntityType::Contact => tables
                .contacts
                .values()
                .filter(|contact| wanted(&contact.owner_id, &contact.id))
                .map(|contact| {
                    (
                        contact.created_at,
                        EmbeddingCandidate {
                            entity_type,
                            id: contact.id.clone(),
                            owner_id: contact.owner_id.clone(),
                            text: contact.embedding_text(),
                        },
                    )
                })
                .collect(),
            EntityType::Note => tables
                .notes
                .values()
                .filter(|note| wanted(&note.owner_id, &note.id))
                .map(|note| {
                    (
                        note.created_at,
                        EmbeddingCandidate {
                            entity_type,
                            id: note.id.clone(),
                            owner_id: note.owner_id.clone(),
                            text: note.body.clone(),
                        },
                    )
                })
                .collect(),
        };

        candidates.sort_by(|left, right| left.0.cmp(&right.0).then_with(|| left.1.id.cmp(&right.1.id)));
        Ok(candidates.into_iter().take(limit).map(|(_, candidate)| candidate).collect())
    }

    async fn set_embedding(
        &self,
        entity_type: EntityType,
        id: &str,
        embedding: &[f32],
    ) -> Result<(), RepositoryError> {
        let mut tables = self.tables.write().await;
        if tables.owner_of(entity_type, id).is_some() {
            tables.embeddings.insert((entity_type, id.to_string()), embedding.to_vec());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl VectorStore for InMemoryRecordRepository {
    async fn nearest_neighbors(
        &self,
        owner_id: &OwnerId,
        entity_type: EntityType,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedItem>, VectorStoreError> {
        let tables = self.tables.read().await;
        let mut items = Vec::new();
        for ((kind, id), embedding) in &tables.embeddings {
            if *kind != entity_type || tables.owner_of(*kind, id) != Some(owner_id) {
                continue;
            }
            let Some(similarity) = cosine_similarity(query, embedding) else {
                continue;
            };
            let item = match entity_type {
                EntityType::Email => tables.emails.get(id).map(|email| email_item(email, similarity)),
                EntityType::Contact => {
                    tables.contacts.get(id).map(|contact| contact_item(contact, similarity))
                }
                EntityType::Note => tables.notes.get(id).map(|note| {
                    let contact_name = note
                        .contact_id
                        .as_ref()
                        .and_then(|contact_id| tables.contacts.get(contact_id))
                        .and_then(|contact| contact.name.as_deref());
                    note_item(note, contact_name, similarity)
                }),
            };
            items.extend(item);
        }
        Ok(top_n(items, limit))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use serde_json::Map;

    use aide_core::domain::conversation::{Conversation, Message, MessageRole};
    use aide_core::domain::owner::OwnerId;
    use aide_core::domain::record::{ContactRecord, EmailRecord};
    use aide_core::domain::retrieval::EntityType;
    use aide_core::retrieval::VectorStore;
    use aide_core::tasks::{NewTask, TaskLifecycle};

    use crate::repositories::{
        ConversationRepository, InMemoryConversationRepository, InMemoryMessageRepository,
        InMemoryRecordRepository, InMemoryTaskRepository, MessageRepository, RecordRepository,
        TaskRepository,
    };

    fn owner() -> OwnerId {
        OwnerId("owner-1".to_string())
    }

    #[tokio::test]
    async fn in_memory_messages_respect_limit_and_order() {
        let conversations = InMemoryConversationRepository::default();
        let messages = InMemoryMessageRepository::default();
        let conversation = Conversation::new(owner(), "Planning");
        conversations.save(conversation.clone()).await.expect("save");

        let base = Utc::now();
        for (offset, content) in ["a", "b", "c"].iter().enumerate() {
            let mut message =
                Message::new(conversation.id.clone(), owner(), MessageRole::User, *content, None);
            message.created_at = base + Duration::seconds(offset as i64);
            messages.append(message).await.expect("append");
        }

        let recent = messages.list_for_conversation(&conversation.id, Some(2)).await.expect("list");
        let contents: Vec<&str> = recent.iter().map(|message| message.content.as_str()).collect();
        assert_eq!(contents, vec!["b", "c"]);
        assert_eq!(messages.count_for_conversation(&conversation.id).await.expect("count"), 3);
    }

    #[tokio::test]
    async fn in_memory_tasks_match_counterparty_case_insensitively() {
        let repo = InMemoryTaskRepository::default();
        let conversation = Conversation::new(owner(), "Planning");
        let task = TaskLifecycle::new()
            .register(NewTask {
                conversation_id: conversation.id.clone(),
                owner_id: owner(),
                description: "Wait for Jane".to_string(),
                expected_counterparty: "Jane@Acme.com".to_string(),
                counterparty_name: Some("Jane".to_string()),
                task_type: None,
                context: Map::new(),
            })
            .expect("register");
        repo.save(task.clone()).await.expect("save");

        let matched =
            repo.list_waiting_for_counterparty(&owner(), "JANE@acme.com ").await.expect("lookup");
        assert_eq!(matched, vec![task]);
        let other =
            repo.list_waiting_for_counterparty(&OwnerId("owner-2".to_string()), "jane@acme.com")
                .await
                .expect("lookup");
        assert!(other.is_empty());
        assert_eq!(repo.statistics(&owner()).await.expect("stats").waiting, 1);
    }

    #[tokio::test]
    async fn in_memory_vector_store_scopes_by_owner_and_type() {
        let repo = InMemoryRecordRepository::default();
        repo.save_email(EmailRecord {
            id: "e1".to_string(),
            owner_id: owner(),
            external_id: "ext-1".to_string(),
            subject: "Contract".to_string(),
            from_address: "jane@acme.com".to_string(),
            from_name: Some("Jane".to_string()),
            to_addresses: Vec::new(),
            body: "Signed copy attached".to_string(),
            sent_at: None,
            created_at: Utc::now(),
        })
        .await
        .expect("save email");
        repo.save_contact(ContactRecord {
            id: "c1".to_string(),
            owner_id: OwnerId("owner-2".to_string()),
            crm_id: None,
            address: Some("bob@x.com".to_string()),
            name: Some("Bob".to_string()),
            properties: Map::new(),
            created_at: Utc::now(),
        })
        .await
        .expect("save contact");
        repo.set_embedding(EntityType::Email, "e1", &[1.0, 0.0]).await.expect("embed");
        repo.set_embedding(EntityType::Contact, "c1", &[1.0, 0.0]).await.expect("embed");

        let emails = repo
            .nearest_neighbors(&owner(), EntityType::Email, &[1.0, 0.0], 5)
            .await
            .expect("search");
        assert_eq!(emails.len(), 1);
        assert_eq!(emails[0].snippet.lines().nth(1), Some("Subject: Contract"));

        let contacts = repo
            .nearest_neighbors(&owner(), EntityType::Contact, &[1.0, 0.0], 5)
            .await
            .expect("search");
        assert!(contacts.is_empty());

        let pending =
            repo.list_missing_embeddings(EntityType::Email, None, 10).await.expect("pending");
        assert!(pending.is_empty());
    }
}

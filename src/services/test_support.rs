//! In-memory collaborators for unit tests.

use crate::adapters::storage::ObjectStorage;
use crate::domain::conversation::{Conversation, ConversationKey, LastMessage};
use crate::domain::message::{Message, NewMessage};
use crate::domain::notification::NewNotification;
use crate::domain::user::UserSummary;
use crate::error::{AppError, Result};
use crate::services::eligibility::EligibilityGate;
use crate::services::notification::NotificationSink;
use crate::services::store::{ConversationStore, MessageStore, MessagingStore, UserDirectory};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Default)]
struct StoreState {
    conversations: HashMap<ConversationKey, Conversation>,
    messages: Vec<Message>,
}

#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    state: Mutex<StoreState>,
    fail_appends: AtomicBool,
}

impl MemoryStore {
    pub(crate) fn set_fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn conversation_count(&self) -> usize {
        self.state.lock().unwrap().conversations.len()
    }

    /// Every stored message, including hidden ones.
    pub(crate) fn raw_message(&self, id: Uuid) -> Option<Message> {
        self.state.lock().unwrap().messages.iter().find(|m| m.id == id).cloned()
    }
}

fn newest_first(messages: &mut [Message]) {
    messages.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn find_or_create(&self, a: Uuid, b: Uuid) -> Result<Conversation> {
        let key = ConversationKey::for_pair(a, b);
        let mut state = self.state.lock().unwrap();
        let conversation = state.conversations.entry(key.clone()).or_insert_with(|| {
            let now = OffsetDateTime::now_utc();
            let (low, high) = key.participants().unwrap();
            Conversation {
                id: Uuid::new_v4(),
                key,
                participants: [low, high],
                last_message: None,
                last_activity_at: now,
                unread: HashMap::from([(low, 0), (high, 0)]),
                created_at: now,
                updated_at: now,
            }
        });
        Ok(conversation.clone())
    }

    async fn find_conversation(&self, key: &ConversationKey) -> Result<Option<Conversation>> {
        Ok(self.state.lock().unwrap().conversations.get(key).cloned())
    }

    async fn record_message_sent(&self, conversation_id: Uuid, last: &LastMessage, recipient_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let conversation = state
            .conversations
            .values_mut()
            .find(|c| c.id == conversation_id)
            .ok_or(AppError::NotFound("Conversation"))?;
        conversation.last_message = Some(last.clone());
        conversation.last_activity_at = last.sent_at;
        conversation.updated_at = OffsetDateTime::now_utc();
        *conversation.unread.entry(recipient_id).or_insert(0) += 1;
        Ok(())
    }

    async fn mark_read(&self, conversation_id: Uuid, reader_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if let Some(conversation) = state.conversations.values_mut().find(|c| c.id == conversation_id) {
            conversation.unread.insert(reader_id, 0);
        }
        Ok(())
    }

    async fn list_for_user(&self, user_id: Uuid, limit: i64, offset: i64) -> Result<Vec<Conversation>> {
        let state = self.state.lock().unwrap();
        let mut conversations: Vec<_> = state.conversations.values().filter(|c| c.includes(user_id)).cloned().collect();
        conversations.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at).then(b.id.cmp(&a.id)));
        Ok(conversations
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .collect())
    }

    async fn unread_total(&self, user_id: Uuid) -> Result<i64> {
        let state = self.state.lock().unwrap();
        Ok(state.conversations.values().filter(|c| c.includes(user_id)).map(|c| c.unread_for(user_id)).sum())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, key: &ConversationKey, message: NewMessage) -> Result<Message> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(AppError::InternalMsg("append failed".into()));
        }
        let stored = Message {
            id: Uuid::now_v7(),
            conversation_key: key.clone(),
            sender_id: message.sender_id,
            recipient_id: message.recipient_id,
            message_type: message.message_type,
            content: message.content,
            attachments: message.attachments,
            is_read: false,
            read_at: None,
            deleted_by: Vec::new(),
            is_hidden: false,
            created_at: OffsetDateTime::now_utc(),
        };
        self.state.lock().unwrap().messages.push(stored.clone());
        Ok(stored)
    }

    async fn find_message(&self, id: Uuid) -> Result<Option<Message>> {
        Ok(self.raw_message(id))
    }

    async fn list_by_conversation(
        &self,
        key: &ConversationKey,
        viewer: Uuid,
        limit: i64,
        before: Option<OffsetDateTime>,
    ) -> Result<Vec<Message>> {
        let state = self.state.lock().unwrap();
        let mut page: Vec<_> = state
            .messages
            .iter()
            .filter(|m| &m.conversation_key == key && m.is_visible_to(viewer))
            .filter(|m| before.is_none_or(|b| m.created_at < b))
            .cloned()
            .collect();
        newest_first(&mut page);
        page.truncate(usize::try_from(limit).unwrap_or(0));
        page.reverse();
        Ok(page)
    }

    async fn mark_many_read(&self, key: &ConversationKey, recipient_id: Uuid, sender_id: Uuid) -> Result<u64> {
        let mut state = self.state.lock().unwrap();
        let now = OffsetDateTime::now_utc();
        let mut count = 0;
        for message in state.messages.iter_mut().filter(|m| {
            &m.conversation_key == key && m.recipient_id == recipient_id && m.sender_id == sender_id && !m.is_read
        }) {
            message.is_read = true;
            message.read_at = Some(now);
            count += 1;
        }
        Ok(count)
    }

    async fn soft_delete(&self, id: Uuid, requester: Uuid) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let message = state.messages.iter_mut().find(|m| m.id == id).ok_or(AppError::NotFound("Message"))?;
        Ok(message.mark_deleted_by(requester))
    }

    async fn search(&self, user_id: Uuid, query: &str, limit: i64) -> Result<Vec<Message>> {
        let needle = query.to_lowercase();
        let state = self.state.lock().unwrap();
        let mut hits: Vec<_> = state
            .messages
            .iter()
            .filter(|m| m.is_participant(user_id) && m.is_visible_to(user_id))
            .filter(|m| m.content.as_deref().is_some_and(|c| c.to_lowercase().contains(&needle)))
            .cloned()
            .collect();
        newest_first(&mut hits);
        hits.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(hits)
    }
}

impl MessagingStore for MemoryStore {}

#[derive(Debug, Default)]
pub(crate) struct MemoryEligibility {
    pairs: Mutex<HashSet<(Uuid, Uuid)>>,
    failing: AtomicBool,
}

fn pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b { (a, b) } else { (b, a) }
}

impl MemoryEligibility {
    pub(crate) fn connect(&self, a: Uuid, b: Uuid) {
        self.pairs.lock().unwrap().insert(pair(a, b));
    }

    pub(crate) fn revoke(&self, a: Uuid, b: Uuid) {
        self.pairs.lock().unwrap().remove(&pair(a, b));
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EligibilityGate for MemoryEligibility {
    async fn is_eligible(&self, a: Uuid, b: Uuid) -> anyhow::Result<bool> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("connection store unavailable");
        }
        Ok(self.pairs.lock().unwrap().contains(&pair(a, b)))
    }
}

#[derive(Debug, Default)]
pub(crate) struct MemoryUsers {
    users: Mutex<HashMap<Uuid, UserSummary>>,
}

impl MemoryUsers {
    pub(crate) fn add(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        let summary = UserSummary { id, name: name.to_string(), avatar_url: None, role: Some("student".into()) };
        self.users.lock().unwrap().insert(id, summary);
        id
    }
}

#[async_trait]
impl UserDirectory for MemoryUsers {
    async fn exists(&self, user_id: Uuid) -> Result<bool> {
        Ok(self.users.lock().unwrap().contains_key(&user_id))
    }

    async fn summaries(&self, ids: &[Uuid]) -> Result<HashMap<Uuid, UserSummary>> {
        let users = self.users.lock().unwrap();
        Ok(ids.iter().filter_map(|id| users.get(id).map(|u| (*id, u.clone()))).collect())
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingNotifications {
    records: Mutex<Vec<NewNotification>>,
}

impl RecordingNotifications {
    /// Waits for spawned notification tasks to land.
    pub(crate) async fn wait_for(&self, count: usize) -> Vec<NewNotification> {
        for _ in 0..100 {
            {
                let records = self.records.lock().unwrap();
                if records.len() >= count {
                    return records.clone();
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifications {
    async fn create(&self, notification: NewNotification) -> anyhow::Result<()> {
        self.records.lock().unwrap().push(notification);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct MemoryObjectStorage {
    objects: Mutex<HashMap<String, (Bytes, String)>>,
}

impl MemoryObjectStorage {
    pub(crate) fn get(&self, key: &str) -> Option<(Bytes, String)> {
        self.objects.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn put(&self, key: &str, body: Bytes, content_type: &str) -> Result<()> {
        self.objects.lock().unwrap().insert(key.to_string(), (body, content_type.to_string()));
        Ok(())
    }
}

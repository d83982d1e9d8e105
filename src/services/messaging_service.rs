use crate::config::MessagingConfig;
use crate::domain::conversation::{Conversation, ConversationKey};
use crate::domain::message::{Attachment, Message, MessageType, MessageView, NewMessage};
use crate::domain::notification::{NewNotification, NotificationKind};
use crate::domain::realtime::ServerEvent;
use crate::domain::user::UserSummary;
use crate::error::{AppError, ForbiddenReason, Result};
use crate::services::eligibility::EligibilityService;
use crate::services::gateway::GatewayService;
use crate::services::notification::NotificationSink;
use crate::services::store::{MessagingStore, UserDirectory};
use opentelemetry::{KeyValue, global, metrics::Counter};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

const MAX_QUERY_CHARS: usize = 200;

#[derive(Clone, Debug)]
struct Metrics {
    sent_total: Counter<u64>,
    realtime_pushes_total: Counter<u64>,
    deleted_total: Counter<u64>,
}

impl Metrics {
    fn new() -> Self {
        let meter = global::meter("mentorlink-server");
        Self {
            sent_total: meter
                .u64_counter("messages_sent_total")
                .with_description("Send attempts by outcome")
                .build(),
            realtime_pushes_total: meter
                .u64_counter("messages_realtime_push_total")
                .with_description("New messages pushed to an online recipient")
                .build(),
            deleted_total: meter
                .u64_counter("messages_deleted_total")
                .with_description("Soft deletes, labelled by whether the message became hidden")
                .build(),
        }
    }
}

/// A message as submitted by a client.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub recipient_id: Uuid,
    pub content: Option<String>,
    pub message_type: MessageType,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message: MessageView,
    pub conversation_key: ConversationKey,
}

/// A conversation as seen by one of its participants.
#[derive(Debug, Clone)]
pub struct ConversationEntry {
    pub conversation: Conversation,
    pub participant: UserSummary,
    pub unread_count: i64,
}

#[derive(Debug, Clone)]
pub struct MessagePage {
    pub messages: Vec<MessageView>,
    pub has_more: bool,
}

#[derive(Clone, Debug)]
pub struct MessagingService {
    store: Arc<dyn MessagingStore>,
    users: Arc<dyn UserDirectory>,
    eligibility: EligibilityService,
    notifications: Arc<dyn NotificationSink>,
    gateway: GatewayService,
    config: MessagingConfig,
    metrics: Metrics,
}

impl MessagingService {
    #[must_use]
    pub fn new(
        store: Arc<dyn MessagingStore>,
        users: Arc<dyn UserDirectory>,
        eligibility: EligibilityService,
        notifications: Arc<dyn NotificationSink>,
        gateway: GatewayService,
        config: MessagingConfig,
    ) -> Self {
        Self { store, users, eligibility, notifications, gateway, config, metrics: Metrics::new() }
    }

    /// Stores a message, then notifies and pushes it to the recipient.
    ///
    /// # Errors
    /// Returns `BadRequest` for invalid input, `NotFound` for an unknown recipient and
    /// `Forbidden` when the pair has no accepted mentorship connection.
    #[tracing::instrument(
        err(level = "warn"),
        skip(self, outgoing),
        fields(recipient_id = %outgoing.recipient_id, message_type = %outgoing.message_type, message_id = tracing::field::Empty)
    )]
    pub async fn send(&self, sender_id: Uuid, outgoing: OutgoingMessage) -> Result<SentMessage> {
        let result = self.send_inner(sender_id, outgoing).await;
        let status = match &result {
            Ok(_) => "ok",
            Err(AppError::Forbidden(_)) => "forbidden",
            Err(AppError::BadRequest { .. } | AppError::NotFound(_)) => "rejected",
            Err(_) => "error",
        };
        self.metrics.sent_total.add(1, &[KeyValue::new("status", status)]);
        result
    }

    async fn send_inner(&self, sender_id: Uuid, outgoing: OutgoingMessage) -> Result<SentMessage> {
        let recipient_id = outgoing.recipient_id;
        if recipient_id == sender_id {
            return Err(AppError::bad_request("CANNOT_MESSAGE_SELF", "You cannot message yourself"));
        }

        let draft = NewMessage {
            sender_id,
            recipient_id,
            message_type: outgoing.message_type,
            content: outgoing.content,
            attachments: outgoing.attachments,
        }
        .validate(self.config.max_content_length)?;

        if !self.users.exists(recipient_id).await? {
            return Err(AppError::NotFound("Recipient"));
        }

        self.eligibility.ensure_eligible(sender_id, recipient_id).await?;

        let conversation = self.store.find_or_create(sender_id, recipient_id).await?;
        let stored = self.store.commit_message(&conversation, draft, self.config.snippet_length).await?;
        tracing::Span::current().record("message_id", tracing::field::display(stored.id));

        let summaries = self.summaries(&[sender_id, recipient_id]).await;
        self.spawn_notification(&stored, &summaries);

        let view = to_view(stored, &summaries);
        let delivered = self
            .gateway
            .push_to_user(recipient_id, ServerEvent::ReceiveMessage { message: Box::new(view.clone()) })
            .await;
        if delivered {
            self.metrics.realtime_pushes_total.add(1, &[]);
        }

        Ok(SentMessage { message: view, conversation_key: conversation.key })
    }

    fn spawn_notification(&self, message: &Message, summaries: &HashMap<Uuid, UserSummary>) {
        let sender_name = summaries
            .get(&message.sender_id)
            .map(|u| u.name.clone())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "Someone".to_string());
        let body = match message.message_type {
            MessageType::Text => message.content.clone().unwrap_or_default().chars().take(self.config.snippet_length).collect(),
            other => other.media_label().to_string(),
        };

        let notification = NewNotification {
            user_id: message.recipient_id,
            kind: NotificationKind::Message,
            title: format!("New message from {sender_name}"),
            body,
            data: json!({
                "conversationId": message.conversation_key.as_str(),
                "messageId": message.id,
                "senderId": message.sender_id,
            }),
        };

        let sink = Arc::clone(&self.notifications);
        tokio::spawn(
            async move {
                if let Err(e) = sink.create(notification).await {
                    tracing::warn!(error = %e, "Failed to create message notification");
                }
            }
            .instrument(tracing::debug_span!("message_notification")),
        );
    }

    /// Up to `conversation_list_limit` conversations of `user_id` whose other participant is still an eligible peer.
    ///
    /// Pages through the store until enough eligible conversations are found, so ineligible ones never
    /// push older eligible ones out of the list.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the store fails.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn list_conversations(&self, user_id: Uuid) -> Result<Vec<ConversationEntry>> {
        let limit = self.config.conversation_list_limit.max(1);
        let wanted = usize::try_from(limit).unwrap_or(usize::MAX);
        let mut listed = Vec::new();
        let mut offset = 0;

        loop {
            let page = self.store.list_for_user(user_id, limit, offset).await?;
            let exhausted = page.len() < wanted;
            offset += limit;

            let others: Vec<Uuid> = page.iter().filter_map(|c| c.other_participant(user_id)).collect();
            let eligible = self.eligibility.filter(user_id, &others).await;
            listed.extend(page.into_iter().filter_map(|conversation| {
                let other = conversation.other_participant(user_id)?;
                eligible.contains(&other).then_some((conversation, other))
            }));

            if exhausted || listed.len() >= wanted {
                break;
            }
        }
        listed.truncate(wanted);

        let others: Vec<Uuid> = listed.iter().map(|(_, other)| *other).collect();
        let summaries = self.summaries(&others).await;

        Ok(listed
            .into_iter()
            .map(|(conversation, other)| {
                let participant = summaries.get(&other).cloned().unwrap_or_else(|| UserSummary::unknown(other));
                let unread_count = conversation.unread_for(user_id);
                ConversationEntry { conversation, participant, unread_count }
            })
            .collect())
    }

    /// A page of the conversation with `other_id`, oldest message first.
    ///
    /// # Errors
    /// Returns `Forbidden` if the users are no longer connected.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn list_messages(
        &self,
        user_id: Uuid,
        other_id: Uuid,
        limit: Option<i64>,
        before: Option<OffsetDateTime>,
    ) -> Result<MessagePage> {
        if user_id == other_id {
            return Err(AppError::bad_request("INVALID_RECIPIENT", "Cannot open a conversation with yourself"));
        }
        self.eligibility.ensure_eligible(user_id, other_id).await?;

        let limit = limit.unwrap_or(self.config.default_page_size).clamp(1, self.config.max_page_size);
        let key = ConversationKey::for_pair(user_id, other_id);

        let mut messages = self.store.list_by_conversation(&key, user_id, limit + 1, before).await?;
        let has_more = messages.len() > usize::try_from(limit).unwrap_or(usize::MAX);
        if has_more {
            // Oldest-first, so the extra probe row is at the front.
            messages.remove(0);
        }

        let summaries = self.summaries(&[user_id, other_id]).await;
        Ok(MessagePage { messages: messages.into_iter().map(|m| to_view(m, &summaries)).collect(), has_more })
    }

    /// Resets the reader's counter, then marks everything `other_id` sent as read and notifies them.
    ///
    /// The second step only happens while the two users are still connected.
    ///
    /// # Errors
    /// Returns `AppError::Database` if the store fails.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn mark_read(&self, user_id: Uuid, other_id: Uuid) -> Result<u64> {
        let key = ConversationKey::for_pair(user_id, other_id);

        // The reader's own counter is always cleared; rows and receipts need a live connection.
        if let Some(conversation) = self.store.find_conversation(&key).await? {
            self.store.mark_read(conversation.id, user_id).await?;
        }

        if !self.eligibility.is_eligible(user_id, other_id).await {
            tracing::debug!("Peer not eligible, skipping read receipt");
            return Ok(0);
        }

        let updated = self.store.mark_many_read(&key, user_id, other_id).await?;
        self.gateway
            .push_to_user(other_id, ServerEvent::MessagesMarkedRead { read_by: user_id, timestamp: OffsetDateTime::now_utc() })
            .await;

        Ok(updated)
    }

    /// Hides a message from the requester's view. It disappears for good once both participants delete it.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown or already deleted messages and `Forbidden` for non-participants.
    #[tracing::instrument(err(level = "warn"), skip(self))]
    pub async fn delete_message(&self, user_id: Uuid, message_id: Uuid) -> Result<()> {
        let message = self.store.find_message(message_id).await?.ok_or(AppError::NotFound("Message"))?;

        if !message.is_participant(user_id) {
            return Err(AppError::Forbidden(ForbiddenReason::NotMessageParticipant));
        }
        if !message.is_visible_to(user_id) {
            return Err(AppError::NotFound("Message"));
        }

        let hidden = self.store.soft_delete(message_id, user_id).await?;
        self.metrics.deleted_total.add(1, &[KeyValue::new("hidden", hidden)]);
        Ok(())
    }

    /// # Errors
    /// Returns `AppError::Database` if the store fails.
    pub async fn unread_count(&self, user_id: Uuid) -> Result<i64> {
        self.store.unread_total(user_id).await
    }

    /// Case-insensitive search over the user's visible messages.
    ///
    /// # Errors
    /// Returns `BadRequest` for an empty or oversize query.
    #[tracing::instrument(err(level = "warn"), skip(self, query))]
    pub async fn search(&self, user_id: Uuid, query: &str) -> Result<Vec<MessageView>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(AppError::bad_request("QUERY_REQUIRED", "Search query is required"));
        }
        if query.chars().count() > MAX_QUERY_CHARS {
            return Err(AppError::bad_request(
                "QUERY_TOO_LONG",
                format!("Search query exceeds {MAX_QUERY_CHARS} characters"),
            ));
        }

        let hits = self.store.search(user_id, query, self.config.search_limit).await?;

        let mut ids: Vec<Uuid> = hits.iter().flat_map(|m| [m.sender_id, m.recipient_id]).collect();
        ids.sort_unstable();
        ids.dedup();
        let summaries = self.summaries(&ids).await;

        Ok(hits.into_iter().map(|m| to_view(m, &summaries)).collect())
    }

    pub async fn can_message(&self, user_id: Uuid, other_id: Uuid) -> bool {
        user_id != other_id && self.eligibility.is_eligible(user_id, other_id).await
    }

    pub async fn online_users(&self) -> Vec<Uuid> {
        self.gateway.online_users().await
    }

    // Profiles are decoration; a lookup failure must not fail the request.
    async fn summaries(&self, ids: &[Uuid]) -> HashMap<Uuid, UserSummary> {
        match self.users.summaries(ids).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to resolve user summaries");
                HashMap::new()
            }
        }
    }
}

fn to_view(message: Message, summaries: &HashMap<Uuid, UserSummary>) -> MessageView {
    let resolve = |id: Uuid| summaries.get(&id).cloned().unwrap_or_else(|| UserSummary::unknown(id));
    let sender = resolve(message.sender_id);
    let recipient = resolve(message.recipient_id);
    MessageView::new(message, sender, recipient)
}

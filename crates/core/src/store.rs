//! Message store contract: the append-only turn history per conversation,
//! plus the running summary of content that no longer fits the context window.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::message::{ConversationId, Message};

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// The backend name (e.g., "in_memory", "jsonl").
    fn name(&self) -> &str;

    /// Append a turn to a conversation.
    async fn append(
        &self,
        conversation_id: &ConversationId,
        message: Message,
    ) -> std::result::Result<(), StoreError>;

    /// All turns of a conversation, oldest first.
    async fn history(
        &self,
        conversation_id: &ConversationId,
    ) -> std::result::Result<Vec<Message>, StoreError>;

    async fn summary(
        &self,
        conversation_id: &ConversationId,
    ) -> std::result::Result<Option<String>, StoreError>;

    async fn set_summary(
        &self,
        conversation_id: &ConversationId,
        summary: String,
    ) -> std::result::Result<(), StoreError>;
}

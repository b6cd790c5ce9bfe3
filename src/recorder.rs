use serde_json::Value;
use thiserror::Error;

use crate::store::{SqliteStore, StoreError, TurnType};

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("conversation {conversation_id} is not owned by user {user_id}")]
    NotOwned { user_id: i64, conversation_id: i64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One generation call worth of history.
#[derive(Debug, Clone)]
pub struct Turn<'a> {
    pub turn_type: TurnType,
    pub prompt: &'a str,
    pub images: &'a [String],
    pub texts: &'a [String],
    pub params: Value,
}

/// Writes user/assistant turn pairs into conversations the caller owns.
#[derive(Clone)]
pub struct ConversationRecorder {
    store: SqliteStore,
}

impl ConversationRecorder {
    pub fn new(store: SqliteStore) -> Self {
        Self { store }
    }

    pub async fn record(&self, user_id: i64, conversation_id: i64, turn: Turn<'_>) -> Result<(), RecordError> {
        if !self.store.owns_conversation(user_id, conversation_id).await? {
            return Err(RecordError::NotOwned { user_id, conversation_id });
        }
        self.store
            .insert_turn(
                conversation_id,
                turn.turn_type,
                turn.prompt,
                turn.images,
                turn.texts,
                &turn.params,
            )
            .await?;
        Ok(())
    }
}

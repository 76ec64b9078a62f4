//! `analytics_chats` writes.

use crate::client::SupabaseClient;
use crate::models::ChatRow;
use crate::PersistenceError;

/// One row per inbound message; no dedupe at the store level.
pub async fn insert_chat(client: &SupabaseClient, row: &ChatRow) -> Result<(), PersistenceError> {
    client.insert("analytics_chats", row).await
}

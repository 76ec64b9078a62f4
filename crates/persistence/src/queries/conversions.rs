//! `analytics_conversions` writes.

use crate::client::SupabaseClient;
use crate::models::ConversionRow;
use crate::PersistenceError;

/// Record an accepted receipt. Replays across processes insert twice;
/// dedupe is intra-process only.
pub async fn insert_conversion(
    client: &SupabaseClient,
    row: &ConversionRow,
) -> Result<(), PersistenceError> {
    client.insert("analytics_conversions", row).await
}

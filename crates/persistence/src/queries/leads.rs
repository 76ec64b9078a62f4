//! `analytics_leads` writes.
//!
//! A lead is recorded once per `(project_id, contact)`. The discount-code
//! trigger path reuses the same upsert with merge semantics so the trigger
//! message overwrites `first_message` — one deterministic code path, one
//! conflict target.

use crate::client::{OnConflict, SupabaseClient};
use crate::models::LeadRow;
use crate::PersistenceError;

pub async fn upsert_lead(
    client: &SupabaseClient,
    row: &LeadRow,
    overwrite: bool,
) -> Result<(), PersistenceError> {
    let resolution = if overwrite {
        OnConflict::Merge
    } else {
        OnConflict::Ignore
    };
    client
        .upsert("analytics_leads", row, "project_id,contact", resolution)
        .await
}

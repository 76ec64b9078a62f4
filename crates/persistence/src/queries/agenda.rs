//! `agenda` writes.
//!
//! The funnel status only ever moves `new → conversion`. A routine message
//! touch must therefore never write `new` over an existing `conversion`:
//! the current status is read first and preserved.

use chrono::Utc;

use crate::client::{OnConflict, SupabaseClient};
use crate::models::AgendaRow;
use crate::PersistenceError;

pub const STATUS_NEW: &str = "new";
pub const STATUS_CONVERSION: &str = "conversion";

/// Record message activity for a contact. Source fields are
/// last-write-wins; the status is preserved once it reached `conversion`.
pub async fn touch_agenda(
    client: &SupabaseClient,
    project_id: &str,
    contact: &str,
    wa_phone: Option<&str>,
    source_slug: Option<&str>,
    source_page_id: Option<&str>,
) -> Result<(), PersistenceError> {
    let status = match current_status(client, project_id, contact).await? {
        Some(s) if s == STATUS_CONVERSION => STATUS_CONVERSION,
        _ => STATUS_NEW,
    };
    upsert(
        client,
        project_id,
        contact,
        wa_phone,
        source_slug,
        source_page_id,
        status,
    )
    .await
}

/// Promote a contact to `conversion` after an accepted receipt.
pub async fn mark_conversion(
    client: &SupabaseClient,
    project_id: &str,
    contact: &str,
    wa_phone: Option<&str>,
) -> Result<(), PersistenceError> {
    upsert(
        client,
        project_id,
        contact,
        wa_phone,
        None,
        None,
        STATUS_CONVERSION,
    )
    .await
}

async fn upsert(
    client: &SupabaseClient,
    project_id: &str,
    contact: &str,
    wa_phone: Option<&str>,
    source_slug: Option<&str>,
    source_page_id: Option<&str>,
    status: &str,
) -> Result<(), PersistenceError> {
    let now = Utc::now();
    let row = AgendaRow {
        project_id: project_id.to_string(),
        contact: contact.to_string(),
        wa_phone: wa_phone.map(str::to_string),
        source_slug: source_slug.map(str::to_string),
        source_page_id: source_page_id.map(str::to_string),
        status: status.to_string(),
        last_message_at: now,
        updated_at: now,
    };
    client
        .upsert("agenda", &row, "project_id,contact", OnConflict::Merge)
        .await
}

async fn current_status(
    client: &SupabaseClient,
    project_id: &str,
    contact: &str,
) -> Result<Option<String>, PersistenceError> {
    let rows = client
        .select(
            "agenda",
            &[("project_id", project_id), ("contact", contact)],
            "status",
        )
        .await?;
    Ok(rows
        .first()
        .and_then(|r| r.get("status"))
        .and_then(|v| v.as_str())
        .map(str::to_string))
}

//! `whatsapp_sessions` and `lines` writes.

use chrono::Utc;

use crate::client::{OnConflict, SupabaseClient};
use crate::models::{LineRow, SessionRow};
use crate::PersistenceError;

/// Mirror the live session state, keyed on `line_id`.
pub async fn upsert_session(
    client: &SupabaseClient,
    line_id: &str,
    project_id: &str,
    wa_status: &str,
    wa_phone: Option<&str>,
) -> Result<(), PersistenceError> {
    let row = SessionRow {
        line_id: line_id.to_string(),
        project_id: project_id.to_string(),
        wa_status: wa_status.to_string(),
        wa_phone: wa_phone.map(str::to_string),
        updated_at: Utc::now(),
    };
    client
        .upsert("whatsapp_sessions", &row, "line_id", OnConflict::Merge)
        .await
}

/// Upsert the line row (status + phone).
pub async fn upsert_line(
    client: &SupabaseClient,
    line_id: &str,
    project_id: &str,
    status: &str,
    phone: Option<&str>,
) -> Result<(), PersistenceError> {
    let row = LineRow {
        id: line_id.to_string(),
        project_id: project_id.to_string(),
        status: status.to_string(),
        phone: phone.map(str::to_string),
    };
    client.upsert("lines", &row, "id", OnConflict::Merge).await
}

/// Patch only the status column of an existing line row.
pub async fn mark_line_status(
    client: &SupabaseClient,
    line_id: &str,
    status: &str,
) -> Result<(), PersistenceError> {
    client
        .update(
            "lines",
            &[("id", line_id)],
            &serde_json::json!({ "status": status }),
        )
        .await
}

/// Resolve the project a line belongs to from its row.
pub async fn project_of_line(
    client: &SupabaseClient,
    line_id: &str,
) -> Result<Option<String>, PersistenceError> {
    let rows = client
        .select("lines", &[("id", line_id)], "project_id")
        .await?;
    Ok(rows
        .first()
        .and_then(|r| r.get("project_id"))
        .and_then(|v| v.as_str())
        .map(str::to_string))
}

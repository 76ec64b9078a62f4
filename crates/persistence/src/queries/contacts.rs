//! `wa_contact_names` writes.

use chrono::Utc;

use crate::client::{OnConflict, SupabaseClient};
use crate::models::ContactNameRow;
use crate::PersistenceError;

/// Cache a contact's display name and avatar, keyed on
/// `(project_id, phone)`.
pub async fn upsert_contact_name(
    client: &SupabaseClient,
    project_id: &str,
    phone: &str,
    name: Option<&str>,
    avatar_url: Option<&str>,
) -> Result<(), PersistenceError> {
    let row = ContactNameRow {
        project_id: project_id.to_string(),
        phone: phone.to_string(),
        name: name.map(str::to_string),
        avatar_url: avatar_url.map(str::to_string),
        updated_at: Utc::now(),
    };
    client
        .upsert(
            "wa_contact_names",
            &row,
            "project_id,phone",
            OnConflict::Merge,
        )
        .await
}

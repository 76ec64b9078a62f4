//! `pages` reads — ad pixel configuration lookup.

use crate::client::SupabaseClient;
use crate::models::PageRow;
use crate::PersistenceError;

/// Find the page carrying the pixel configuration for a project, by page
/// id when known, else by slug, else the project's first page.
pub async fn find_page(
    client: &SupabaseClient,
    project_id: &str,
    page_id: Option<&str>,
    slug: Option<&str>,
) -> Result<Option<PageRow>, PersistenceError> {
    let filters: Vec<(&str, &str)> = if let Some(id) = page_id {
        vec![("id", id)]
    } else if let Some(slug) = slug {
        vec![("project_id", project_id), ("slug", slug)]
    } else {
        vec![("project_id", project_id)]
    };

    let rows = client.select("pages", &filters, "*").await?;
    let Some(first) = rows.into_iter().next() else {
        return Ok(None);
    };
    serde_json::from_value(first)
        .map(Some)
        .map_err(|e| PersistenceError::Decode(e.to_string()))
}

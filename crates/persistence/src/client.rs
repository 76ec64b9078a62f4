//! REST clients for the row store (PostgREST) and object storage.

use reqwest::header::{HeaderMap, HeaderValue};
use serde::Serialize;

use crate::PersistenceError;

/// Conflict resolution for upserts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflict {
    /// Overwrite the conflicting row's provided columns.
    Merge,
    /// Keep the existing row untouched.
    Ignore,
}

/// Thin PostgREST client bound to one project and its service-role key.
#[derive(Clone)]
pub struct SupabaseClient {
    http: reqwest::Client,
    base_url: String,
    service_role: String,
}

impl SupabaseClient {
    pub fn new(base_url: &str, service_role: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            service_role: service_role.to_string(),
        }
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(v) = HeaderValue::from_str(&self.service_role) {
            headers.insert("apikey", v);
        }
        if let Ok(v) = HeaderValue::from_str(&format!("Bearer {}", self.service_role)) {
            headers.insert(reqwest::header::AUTHORIZATION, v);
        }
        headers
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Insert one row.
    pub async fn insert<T: Serialize>(&self, table: &str, row: &T) -> Result<(), PersistenceError> {
        let resp = self
            .http
            .post(self.rest_url(table))
            .headers(self.headers())
            .header("Prefer", "return=minimal")
            .json(row)
            .send()
            .await?;
        Self::check(table, resp).await
    }

    /// Upsert one row on the given conflict target.
    pub async fn upsert<T: Serialize>(
        &self,
        table: &str,
        row: &T,
        on_conflict: &str,
        resolution: OnConflict,
    ) -> Result<(), PersistenceError> {
        let prefer = match resolution {
            OnConflict::Merge => "resolution=merge-duplicates,return=minimal",
            OnConflict::Ignore => "resolution=ignore-duplicates,return=minimal",
        };
        let resp = self
            .http
            .post(self.rest_url(table))
            .headers(self.headers())
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", prefer)
            .json(row)
            .send()
            .await?;
        Self::check(table, resp).await
    }

    /// Patch rows matched by equality filters (`column -> value`).
    pub async fn update<T: Serialize>(
        &self,
        table: &str,
        filters: &[(&str, &str)],
        patch: &T,
    ) -> Result<(), PersistenceError> {
        let query: Vec<(String, String)> = filters
            .iter()
            .map(|(col, val)| (col.to_string(), format!("eq.{val}")))
            .collect();
        let resp = self
            .http
            .patch(self.rest_url(table))
            .headers(self.headers())
            .query(&query)
            .header("Prefer", "return=minimal")
            .json(patch)
            .send()
            .await?;
        Self::check(table, resp).await
    }

    /// Select rows matched by equality filters.
    pub async fn select(
        &self,
        table: &str,
        filters: &[(&str, &str)],
        columns: &str,
    ) -> Result<Vec<serde_json::Value>, PersistenceError> {
        let mut query: Vec<(String, String)> = filters
            .iter()
            .map(|(col, val)| (col.to_string(), format!("eq.{val}")))
            .collect();
        query.push(("select".to_string(), columns.to_string()));
        let resp = self
            .http
            .get(self.rest_url(table))
            .headers(self.headers())
            .query(&query)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PersistenceError::Rejected {
                table: table.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<Vec<serde_json::Value>>()
            .await
            .map_err(|e| PersistenceError::Decode(e.to_string()))
    }

    async fn check(table: &str, resp: reqwest::Response) -> Result<(), PersistenceError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(PersistenceError::Rejected {
            table: table.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    /// Storage client sharing this project's credentials.
    pub fn storage(&self, bucket: &str) -> StorageClient {
        StorageClient {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            service_role: self.service_role.clone(),
            bucket: bucket.to_string(),
        }
    }
}

/// Object storage client for one bucket.
#[derive(Clone)]
pub struct StorageClient {
    http: reqwest::Client,
    base_url: String,
    service_role: String,
    bucket: String,
}

impl StorageClient {
    /// Upload with overwrite semantics; returns the public URL.
    pub async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, PersistenceError> {
        let url = format!(
            "{}/storage/v1/object/{}/{}",
            self.base_url, self.bucket, path
        );
        let resp = self
            .http
            .post(&url)
            .header("apikey", &self.service_role)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.service_role),
            )
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(PersistenceError::Rejected {
                table: format!("storage:{}", self.bucket),
                status: status.as_u16(),
                body,
            });
        }
        Ok(self.public_url(path))
    }

    pub fn public_url(&self, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, path
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_shape() {
        let client = SupabaseClient::new("https://abcdefgh.supabase.co/", "key");
        let storage = client.storage("receipts");
        assert_eq!(
            storage.public_url("proj/549/1700000000000.jpg"),
            "https://abcdefgh.supabase.co/storage/v1/object/public/receipts/proj/549/1700000000000.jpg"
        );
    }

    #[test]
    fn rest_url_trims_trailing_slash() {
        let client = SupabaseClient::new("https://abcdefgh.supabase.co/", "key");
        assert_eq!(
            client.rest_url("agenda"),
            "https://abcdefgh.supabase.co/rest/v1/agenda"
        );
    }
}

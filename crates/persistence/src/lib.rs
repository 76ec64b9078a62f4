//! Supabase persistence layer: REST row store and object storage.
//!
//! Every write here is best-effort from the caller's point of view: the
//! query modules return `Result` and the router/pipeline log failures and
//! continue. Nothing in this crate retries or transacts across tables.

pub mod client;
pub mod models;
pub mod queries;

pub use client::{StorageClient, SupabaseClient};
pub use models::*;

use thiserror::Error;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("{table}: store rejected the write ({status}): {body}")]
    Rejected {
        table: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response shape: {0}")]
    Decode(String),
}

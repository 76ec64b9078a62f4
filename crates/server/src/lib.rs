//! HTTP surface and process wiring for the Cobro tracker.

pub mod bridge;
pub mod http;
pub mod state;

pub use http::create_router;
pub use state::AppState;

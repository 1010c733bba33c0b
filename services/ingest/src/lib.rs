// ingest: real-time meeting media ingestion and enrichment service.
//
// Lifecycle events arrive over the webhook, the service dials out to the
// vendor's media servers over WebSocket, and decoded media flows through
// per-stream sessions into the transcript pipeline and the index adapters.

pub mod adapters;
pub mod config;
pub mod dispatch;
pub mod filler;
pub mod http;
pub mod mapping;
pub mod registry;
pub mod router;
pub mod session;
pub mod state;
pub mod transcript;

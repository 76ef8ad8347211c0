//! RAG Tool Service
//!
//! Serves the hybrid retrieval core to a façade process over newline-delimited
//! JSON on stdin/stdout.
//!
//! ## Architecture
//!
//! ```text
//! Façade process
//!   ↓ (one ToolRequest per line on stdin)
//! transport (transport.rs)
//!   ↓ (one task per request)
//! ToolDispatcher (timeout + envelope)
//!   ↓
//! RagService (domain layer)
//!   ↓
//! ┌────────┬─────────┬────────┐
//! │ Qdrant │ MongoDB │ OpenAI │
//! └────────┴─────────┴────────┘
//! ```
//!
//! ## Modules
//!
//! - `server`: configuration, adapter wiring and lifecycle
//! - `transport`: NDJSON request loop

pub mod server;
pub mod transport;

// Re-export for convenience
pub use server::run;
pub use transport::serve;

//! sqlcoder-lite
//!
//! Natural-language question → validated SQL → result set, tolerating a
//! SQL-generating collaborator that may hallucinate table names. The core
//! is a bounded retry loop around candidate generation, table-name
//! validation against the schema allow-list, alias/fuzzy auto-correction,
//! and a learning cache of question patterns that already worked.

pub mod config;
pub mod error;
pub mod executor;
pub mod generator;
pub mod memory;
pub mod normalizer;
pub mod pipeline;
pub mod resolver;
pub mod schema;
pub mod service;

pub use config::AppConfig;
pub use error::{CoderError, Result};
pub use generator::{RemoteGenerator, RuleBasedGenerator, SqlGenerator};
pub use memory::{InMemoryBackend, SqlMemory, SqliteBackend};
pub use pipeline::{GenerationOutcome, RetryConfig, RetryController};
pub use schema::SchemaCatalog;
pub use service::{AskResponse, SqlAssistant};

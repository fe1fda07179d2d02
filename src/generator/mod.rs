//! Candidate generators
//!
//! A single capability produces one SQL string given a question, the schema
//! and optional corrective feedback. Two interchangeable strategies
//! implement it: the deterministic rule engine and a remote model service.
//! The retry controller depends only on the trait.

pub mod remote;
pub mod rules;

use crate::error::Result;
use crate::schema::SchemaCatalog;
use async_trait::async_trait;

pub use remote::RemoteGenerator;
pub use rules::RuleBasedGenerator;

/// One generated candidate and the strategy that produced it.
#[derive(Debug, Clone)]
pub struct GeneratedSql {
    pub sql: String,
    /// Provenance tag, e.g. "rule_engine" or "model_service".
    pub source: String,
}

#[async_trait]
pub trait SqlGenerator: Send + Sync {
    /// Produce one SQL candidate. `feedback` carries the previous attempt's
    /// validation failure, when there was one.
    async fn generate(
        &self,
        question: &str,
        schema: &SchemaCatalog,
        feedback: Option<&str>,
    ) -> Result<GeneratedSql>;
}

//! Request orchestration
//!
//! Ties the learning cache, the retry controller and the executor together
//! for one question: cache lookup first, generation on a miss, execution,
//! then a fire-and-forget feedback notification. Only confirmed
//! post-execution successes are recorded to the cache; if the caller drops
//! the request mid-flight nothing is recorded.

use crate::error::{CoderError, Result};
use crate::executor::QueryExecutor;
use crate::memory::SqlMemory;
use crate::normalizer::extract_tables;
use crate::pipeline::RetryController;
use crate::schema::SchemaCatalog;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Post-execution notification, independent of the main request/response.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionFeedback {
    pub question: String,
    pub sql: String,
    pub success: bool,
    pub tables_used: Vec<String>,
}

/// Receiver for execution feedback. Delivery is fire-and-forget: a sink
/// must never fail the main request.
pub trait FeedbackSink: Send + Sync {
    fn notify(&self, feedback: ExecutionFeedback);
}

/// Default sink: structured log lines, useful as a negative-pattern log.
#[derive(Default)]
pub struct LoggingFeedbackSink;

impl FeedbackSink for LoggingFeedbackSink {
    fn notify(&self, feedback: ExecutionFeedback) {
        if feedback.success {
            info!(
                "✅ Feedback: question={:?} tables={:?}",
                feedback.question, feedback.tables_used
            );
        } else {
            warn!(
                "⚠️ Negative pattern: question={:?} sql={:?}",
                feedback.question, feedback.sql
            );
        }
    }
}

/// Sink that forwards feedback to a remote endpoint, e.g. the model
/// service's /feedback route. Posts on a background task.
pub struct HttpFeedbackSink {
    client: reqwest::Client,
    url: String,
}

impl HttpFeedbackSink {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { client, url: url.into() }
    }
}

impl FeedbackSink for HttpFeedbackSink {
    fn notify(&self, feedback: ExecutionFeedback) {
        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            if let Err(e) = client.post(&url).json(&feedback).send().await {
                warn!("⚠️ Feedback delivery to {} failed: {}", url, e);
            }
        });
    }
}

/// Result contract to the caller after execution.
#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub sql: String,
    pub tables_used: Vec<String>,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    /// "rule_engine", "model_service" or "memory_cache".
    pub source: String,
    pub execution_success: bool,
}

pub struct SqlAssistant {
    controller: RetryController,
    memory: Arc<SqlMemory>,
    executor: Arc<dyn QueryExecutor>,
    sink: Arc<dyn FeedbackSink>,
}

impl SqlAssistant {
    pub fn new(
        controller: RetryController,
        memory: Arc<SqlMemory>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        Self { controller, memory, executor, sink: Arc::new(LoggingFeedbackSink) }
    }

    pub fn with_sink(mut self, sink: Arc<dyn FeedbackSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Answer one question end to end.
    pub async fn ask(&self, question: &str, schema: &SchemaCatalog) -> Result<AskResponse> {
        // Cache hits are trusted without re-running table validation; a
        // stale entry over a dropped table surfaces as an execution error.
        if let Some(sql) = self.memory.lookup(question) {
            let tables_used = tables_in(&sql);
            let result = self.execute(question, &sql, &tables_used).await?;
            return Ok(AskResponse {
                sql,
                tables_used,
                row_count: result.row_count(),
                columns: result.columns,
                rows: result.rows,
                source: "memory_cache".into(),
                execution_success: true,
            });
        }

        let outcome = match self.controller.run(question, schema).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let CoderError::RetryBudgetExhausted { sql, tables_used, .. } = &e {
                    self.sink.notify(ExecutionFeedback {
                        question: question.to_string(),
                        sql: sql.clone(),
                        success: false,
                        tables_used: tables_used.clone(),
                    });
                }
                return Err(e);
            }
        };

        let result = self.execute(question, &outcome.sql, &outcome.tables_used).await?;

        // Only a confirmed execution earns a cache entry.
        if let Err(e) = self.memory.record(question, &outcome.sql, &outcome.tables_used) {
            warn!("⚠️ Could not record to learning cache: {}", e);
        }

        Ok(AskResponse {
            sql: outcome.sql,
            tables_used: outcome.tables_used,
            row_count: result.row_count(),
            columns: result.columns,
            rows: result.rows,
            source: outcome.source,
            execution_success: true,
        })
    }

    async fn execute(
        &self,
        question: &str,
        sql: &str,
        tables_used: &[String],
    ) -> Result<crate::executor::QueryResult> {
        match self.executor.execute(sql).await {
            Ok(result) => {
                info!("✅ Execution succeeded: {} rows", result.row_count());
                self.sink.notify(ExecutionFeedback {
                    question: question.to_string(),
                    sql: sql.to_string(),
                    success: true,
                    tables_used: tables_used.to_vec(),
                });
                Ok(result)
            }
            Err(e) => {
                self.sink.notify(ExecutionFeedback {
                    question: question.to_string(),
                    sql: sql.to_string(),
                    success: false,
                    tables_used: tables_used.to_vec(),
                });
                Err(e)
            }
        }
    }
}

fn tables_in(sql: &str) -> Vec<String> {
    let mut tables: Vec<String> = extract_tables(sql).into_iter().collect();
    tables.sort();
    tables
}

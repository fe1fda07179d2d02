//! Remote model-backed generator
//!
//! Client for a SQL-generating model service. The wire contract is
//! `{question, schema_text, lang, max_new_tokens, feedback?}` in and
//! `{sql, source?}` out. Timeouts and non-200 responses surface as
//! retryable failures so the retry controller can decide what to do.

use crate::error::{CoderError, Result};
use crate::generator::{GeneratedSql, SqlGenerator};
use crate::schema::SchemaCatalog;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Serialize)]
struct SqlRequest<'a> {
    question: &'a str,
    schema_text: String,
    lang: &'a str,
    max_new_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    feedback: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SqlResponse {
    #[serde(default)]
    sql: String,
    #[serde(default)]
    source: Option<String>,
}

pub struct RemoteGenerator {
    client: reqwest::Client,
    url: String,
    lang: String,
    max_new_tokens: u32,
}

impl RemoteGenerator {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoderError::Generator(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: url.into(),
            lang: "es".into(),
            max_new_tokens: 256,
        })
    }

    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = lang.into();
        self
    }
}

#[async_trait]
impl SqlGenerator for RemoteGenerator {
    async fn generate(
        &self,
        question: &str,
        schema: &SchemaCatalog,
        feedback: Option<&str>,
    ) -> Result<GeneratedSql> {
        let payload = SqlRequest {
            question,
            schema_text: schema.schema_text(),
            lang: &self.lang,
            max_new_tokens: self.max_new_tokens,
            feedback,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoderError::GeneratorTimeout(format!("{} did not answer in time", self.url))
                } else {
                    CoderError::Generator(format!("request to {} failed: {}", self.url, e))
                }
            })?;

        if !response.status().is_success() {
            return Err(CoderError::Generator(format!(
                "{} returned HTTP {}",
                self.url,
                response.status()
            )));
        }

        let body: SqlResponse = response
            .json()
            .await
            .map_err(|e| CoderError::Generator(format!("invalid generator response: {}", e)))?;

        if body.sql.trim().is_empty() {
            return Err(CoderError::Generator("generator response has no 'sql' field".into()));
        }

        info!("✅ SQL received from model service ({} chars)", body.sql.len());
        Ok(GeneratedSql {
            sql: body.sql,
            source: body.source.unwrap_or_else(|| "model_service".into()),
        })
    }
}

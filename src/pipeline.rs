//! Retry controller
//!
//! Orchestrates generation → normalization → validation → correction across
//! a bounded number of attempts. Feedback from a failed validation is
//! threaded into the next generator call. On exhaustion the last attempt's
//! SQL and table set are reported with a diagnostic; a result is never
//! fabricated.

use crate::error::{CoderError, Result};
use crate::generator::SqlGenerator;
use crate::normalizer::{extract_tables, normalize};
use crate::resolver::{apply_replacements, TableResolver};
use crate::schema::SchemaCatalog;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// Question keywords that demand a COUNT(*), whatever the generator said.
const HOW_MANY_KEYWORDS: &[&str] =
    &["cuántos", "cuantos", "cantidad", "número", "numero", "total de", "how many"];

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempt budget: maximum generate/validate cycles per request.
    pub max_attempts: u32,
    /// How many allowed tables to name in feedback and diagnostics.
    pub allowed_sample: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, allowed_sample: 10 }
    }
}

/// One generate/validate cycle's state, owned by a single run.
#[derive(Debug, Clone)]
pub struct GenerationAttempt {
    pub sql: String,
    pub referenced_tables: HashSet<String>,
    /// Feedback passed into the generator for this attempt, if any.
    pub feedback: Option<String>,
}

/// Accepted SQL plus provenance.
#[derive(Debug, Clone)]
pub struct GenerationOutcome {
    pub sql: String,
    pub tables_used: Vec<String>,
    pub source: String,
    pub attempts: u32,
}

pub struct RetryController {
    generator: Arc<dyn SqlGenerator>,
    resolver: TableResolver,
    config: RetryConfig,
}

impl RetryController {
    pub fn new(generator: Arc<dyn SqlGenerator>) -> Self {
        Self { generator, resolver: TableResolver::default(), config: RetryConfig::default() }
    }

    pub fn with_config(mut self, config: RetryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_resolver(mut self, resolver: TableResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Run the state machine for one question. Attempts are strictly
    /// sequential: each attempt's feedback depends on the previous
    /// validation outcome.
    pub async fn run(&self, question: &str, schema: &SchemaCatalog) -> Result<GenerationOutcome> {
        let allowed = schema.allowed_tables();
        let mut history: Vec<GenerationAttempt> = Vec::new();
        let mut feedback: Option<String> = None;
        let mut source = String::new();

        for attempt in 1..=self.config.max_attempts {
            info!("🔄 Attempt {}/{} for question: {}", attempt, self.config.max_attempts, question);

            let generated = match self
                .generator
                .generate(question, schema, feedback.as_deref())
                .await
            {
                Ok(g) => g,
                Err(e @ (CoderError::GeneratorTimeout(_) | CoderError::Generator(_))) => {
                    warn!("⚠️ Generator failed on attempt {}: {}", attempt, e);
                    if attempt == self.config.max_attempts {
                        return Err(self.exhausted(&history, &allowed, format!("generator failed: {}", e)));
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };
            source = generated.source;

            let mut sql = normalize(&generated.sql);
            sql = self.resolver.apply_known_aliases(&sql, &allowed);
            let used = extract_tables(&sql);
            sql = force_count_star(&sql, question, &used);
            let used = extract_tables(&sql);

            history.push(GenerationAttempt {
                sql: sql.clone(),
                referenced_tables: used.clone(),
                feedback: feedback.take(),
            });

            if allowed.is_empty() || used.is_subset(&allowed) {
                info!("✅ Valid SQL on attempt {}: {}", attempt, sql);
                return Ok(GenerationOutcome {
                    sql,
                    tables_used: sorted(&used),
                    source,
                    attempts: attempt,
                });
            }

            let missing: BTreeSet<&String> = used.difference(&allowed).collect();
            warn!("⚠️ Invalid tables on attempt {}: {:?}", attempt, missing);

            let corrections = self.resolver.resolve(&used, &allowed);
            if !corrections.is_empty() {
                let corrected = normalize(&apply_replacements(&sql, &corrections));
                let corrected_used = extract_tables(&corrected);
                if corrected_used.is_subset(&allowed) {
                    info!("✅ SQL auto-corrected on attempt {}: {:?}", attempt, corrections);
                    return Ok(GenerationOutcome {
                        sql: corrected,
                        tables_used: sorted(&corrected_used),
                        source,
                        attempts: attempt,
                    });
                }

                // Partial correction map: retry with the mapping spelled out.
                let mapping = corrections
                    .iter()
                    .map(|(k, v)| format!("'{}' -> '{}'", k, v))
                    .collect::<Vec<_>>()
                    .join("; ");
                feedback = Some(format!(
                    "ERROR: tables {} do not exist. Use exactly: {}. \
                     Regenerate the SQL using only these valid tables.",
                    join(&missing),
                    mapping
                ));
            } else {
                feedback = Some(format!(
                    "ERROR: tables {} do not exist. Available tables: {}. \
                     Do not invent names; use only the listed tables.",
                    join(&missing),
                    self.sample_allowed(&allowed)
                ));
            }
        }

        Err(self.exhausted(&history, &allowed, "no valid SQL within the attempt budget".into()))
    }

    fn exhausted(
        &self,
        history: &[GenerationAttempt],
        allowed: &HashSet<String>,
        reason: String,
    ) -> CoderError {
        let last = history.last();
        let sql = last.map(|a| a.sql.clone()).unwrap_or_default();
        let tables_used =
            last.map(|a| sorted(&a.referenced_tables)).unwrap_or_default();
        CoderError::RetryBudgetExhausted {
            attempts: self.config.max_attempts,
            detail: format!(
                "{}. Last SQL: {:?}. Tables used: {:?}. Allowed tables include: {}",
                reason,
                sql,
                tables_used,
                self.sample_allowed(allowed)
            ),
            sql,
            tables_used,
        }
    }

    fn sample_allowed(&self, allowed: &HashSet<String>) -> String {
        let mut names: Vec<&String> = allowed.iter().collect();
        names.sort();
        names
            .into_iter()
            .take(self.config.allowed_sample)
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Hard business rule: a "how many" question over exactly one table must be
/// a COUNT(*), whatever the generator produced.
fn force_count_star(sql: &str, question: &str, used_tables: &HashSet<String>) -> String {
    let q = question.to_lowercase();
    if HOW_MANY_KEYWORDS.iter().any(|k| q.contains(k))
        && used_tables.len() == 1
        && !sql.to_lowercase().contains("count(")
    {
        if let Some(table) = used_tables.iter().next() {
            info!("🔢 Forcing COUNT(*) for table {}", table);
            return format!("SELECT COUNT(*) AS total FROM {}", table);
        }
    }
    sql.to_string()
}

fn sorted(set: &HashSet<String>) -> Vec<String> {
    let mut v: Vec<String> = set.iter().cloned().collect();
    v.sort();
    v
}

fn join(missing: &BTreeSet<&String>) -> String {
    missing.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::GeneratedSql;
    use crate::schema::{Column, SchemaCatalog, Table};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Generator that replays a fixed script of candidates and records the
    /// feedback it was given.
    struct ScriptedGenerator {
        script: Vec<String>,
        calls: AtomicUsize,
        feedbacks: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedGenerator {
        fn new(script: &[&str]) -> Self {
            Self {
                script: script.iter().map(|s| s.to_string()).collect(),
                calls: AtomicUsize::new(0),
                feedbacks: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SqlGenerator for ScriptedGenerator {
        async fn generate(
            &self,
            _question: &str,
            _schema: &SchemaCatalog,
            feedback: Option<&str>,
        ) -> crate::error::Result<GeneratedSql> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            self.feedbacks.lock().unwrap().push(feedback.map(|s| s.to_string()));
            let sql = self.script[n.min(self.script.len() - 1)].clone();
            Ok(GeneratedSql { sql, source: "scripted".into() })
        }
    }

    fn buyer_catalog() -> SchemaCatalog {
        SchemaCatalog::new(vec![Table {
            qualified_name: "public.commerce_buyer".into(),
            description: String::new(),
            columns: vec![
                Column { name: "id".into(), data_type: "integer".into() },
                Column { name: "name".into(), data_type: "varchar".into() },
            ],
        }])
    }

    #[tokio::test]
    async fn test_count_override_rewrites_non_aggregate_sql() {
        let gen = Arc::new(ScriptedGenerator::new(&["SELECT id, name FROM public.commerce_buyer LIMIT 10"]));
        let controller = RetryController::new(gen);
        let outcome = controller.run("¿Cuántos compradores tengo?", &buyer_catalog()).await.unwrap();
        assert_eq!(outcome.sql, "SELECT COUNT(*) AS total FROM public.commerce_buyer");
        assert_eq!(outcome.tables_used, vec!["public.commerce_buyer".to_string()]);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_alias_correction_before_validation() {
        let gen = Arc::new(ScriptedGenerator::new(&["SELECT COUNT(*) AS total FROM public.customers"]));
        let controller = RetryController::new(gen.clone());
        let outcome = controller.run("¿Cuántos customers tengo?", &buyer_catalog()).await.unwrap();
        assert_eq!(outcome.sql, "SELECT COUNT(*) AS total FROM public.commerce_buyer");
        assert_eq!(gen.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fuzzy_correction_accepts_without_regenerating() {
        let gen = Arc::new(ScriptedGenerator::new(&["SELECT * FROM public.comerce_buyer LIMIT 3"]));
        let controller = RetryController::new(gen.clone());
        let outcome = controller.run("dame 3 compradores", &buyer_catalog()).await.unwrap();
        assert!(outcome.sql.contains("public.commerce_buyer"));
        assert_eq!(gen.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_is_bounded_and_reports_invalid_tables() {
        let gen = Arc::new(ScriptedGenerator::new(&["SELECT * FROM public.zzz_martians"]));
        let controller = RetryController::new(gen.clone());
        let err = controller.run("dame marcianos", &buyer_catalog()).await.unwrap_err();
        assert_eq!(gen.calls.load(Ordering::SeqCst), 3);
        match err {
            CoderError::RetryBudgetExhausted { attempts, sql, tables_used, detail } => {
                assert_eq!(attempts, 3);
                assert!(sql.contains("public.zzz_martians"));
                assert_eq!(tables_used, vec!["public.zzz_martians".to_string()]);
                assert!(detail.contains("zzz_martians"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_feedback_names_invalid_tables_and_allowed_list() {
        let gen = Arc::new(ScriptedGenerator::new(&[
            "SELECT * FROM public.zzz_martians",
            "SELECT id FROM public.commerce_buyer",
        ]));
        let controller = RetryController::new(gen.clone());
        let outcome = controller.run("dame datos", &buyer_catalog()).await.unwrap();
        assert_eq!(outcome.attempts, 2);

        let feedbacks = gen.feedbacks.lock().unwrap();
        assert_eq!(feedbacks.len(), 2);
        assert!(feedbacks[0].is_none());
        let second = feedbacks[1].as_ref().unwrap();
        assert!(second.contains("public.zzz_martians"));
        assert!(second.contains("public.commerce_buyer"));
    }

    #[tokio::test]
    async fn test_custom_alias_table_via_resolver() {
        let mut aliases = std::collections::HashMap::new();
        aliases.insert("public.gente".to_string(), "public.commerce_buyer".to_string());
        let gen = Arc::new(ScriptedGenerator::new(&["SELECT COUNT(*) AS total FROM public.gente"]));
        let controller =
            RetryController::new(gen).with_resolver(TableResolver::with_aliases(aliases));
        let outcome = controller.run("¿cuántas personas?", &buyer_catalog()).await.unwrap();
        assert_eq!(outcome.sql, "SELECT COUNT(*) AS total FROM public.commerce_buyer");
    }

    #[tokio::test]
    async fn test_custom_attempt_budget() {
        let gen = Arc::new(ScriptedGenerator::new(&["SELECT * FROM public.zzz_martians"]));
        let controller = RetryController::new(gen.clone())
            .with_config(RetryConfig { max_attempts: 5, allowed_sample: 10 });
        let _ = controller.run("dame marcianos", &buyer_catalog()).await;
        assert_eq!(gen.calls.load(Ordering::SeqCst), 5);
    }
}

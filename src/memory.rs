//! Learning cache
//!
//! Remembers which question patterns previously produced a working query.
//! Keys are normalized questions (lower-cased, trimmed, digit runs replaced
//! by a placeholder) so "top 5" and "top 20" share one template; on a hit
//! the current question's first number is substituted into a cached LIMIT.
//!
//! Only confirmed post-execution successes are recorded. Hits are trusted
//! without re-running table validation, so an entry that references a
//! since-dropped table is a known staleness risk, surfaced at execution
//! time rather than here.
//!
//! Storage is an injected backend; the default is SQLite behind a mutex.
//! `lookup` and `record` serialize on the in-process index, and persistence
//! happens inside `record`'s critical section so FIFO eviction is never
//! torn by a concurrent writer.

use crate::error::{CoderError, Result};
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use tracing::{info, warn};

/// Most-recent entries kept; older ones are evicted FIFO.
const DEFAULT_CAPACITY: usize = 200;

lazy_static! {
    static ref DIGIT_RUN: Regex = Regex::new(r"\d+").unwrap();
    static ref LIMIT_CLAUSE: Regex = Regex::new(r"(?i)LIMIT\s+\d+").unwrap();
}

/// One learned (question pattern → SQL) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Normalized question, the lookup key.
    pub question: String,
    /// The question as originally asked (lower-cased).
    pub original: String,
    pub sql: String,
    pub tables: Vec<String>,
    /// Unix timestamp of when the entry was learned.
    pub timestamp: i64,
}

/// Replace every maximal digit run with a single placeholder token.
pub fn normalize_question(question: &str) -> String {
    DIGIT_RUN.replace_all(question.to_lowercase().trim(), "N").to_string()
}

/// Durable storage for the cache. Implementations only need ordered append,
/// oldest-first eviction and full reload; the in-process index does the rest.
pub trait MemoryBackend: Send {
    fn load(&self) -> Result<Vec<MemoryEntry>>;
    fn append(&self, entry: &MemoryEntry) -> Result<()>;
    /// Drop the oldest entries so at most `keep` remain.
    fn evict_oldest(&self, keep: usize) -> Result<()>;
}

/// SQLite-backed storage.
pub struct SqliteBackend {
    db: Mutex<Connection>,
}

impl SqliteBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Connection::open(path)
            .map_err(|e| CoderError::Memory(format!("failed to open {}: {}", path.display(), e)))?;
        let backend = Self { db: Mutex::new(db) };
        backend.init_schema()?;
        Ok(backend)
    }

    /// Ephemeral database, mainly for tests.
    pub fn in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()
            .map_err(|e| CoderError::Memory(format!("failed to open in-memory db: {}", e)))?;
        let backend = Self { db: Mutex::new(db) };
        backend.init_schema()?;
        Ok(backend)
    }

    fn init_schema(&self) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            r#"
            CREATE TABLE IF NOT EXISTS successful_queries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                question TEXT NOT NULL UNIQUE,
                original TEXT NOT NULL,
                sql TEXT NOT NULL,
                tables_json TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )
            "#,
            [],
        )
        .map_err(|e| CoderError::Memory(format!("failed to create table: {}", e)))?;
        Ok(())
    }
}

impl MemoryBackend for SqliteBackend {
    fn load(&self) -> Result<Vec<MemoryEntry>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .prepare(
                "SELECT question, original, sql, tables_json, timestamp \
                 FROM successful_queries ORDER BY id ASC",
            )
            .map_err(|e| CoderError::Memory(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                let tables_json: String = row.get(3)?;
                Ok(MemoryEntry {
                    question: row.get(0)?,
                    original: row.get(1)?,
                    sql: row.get(2)?,
                    tables: serde_json::from_str(&tables_json).unwrap_or_default(),
                    timestamp: row.get(4)?,
                })
            })
            .map_err(|e| CoderError::Memory(e.to_string()))?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row.map_err(|e| CoderError::Memory(e.to_string()))?);
        }
        Ok(entries)
    }

    fn append(&self, entry: &MemoryEntry) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT OR IGNORE INTO successful_queries \
             (question, original, sql, tables_json, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.question,
                entry.original,
                entry.sql,
                serde_json::to_string(&entry.tables)?,
                entry.timestamp
            ],
        )
        .map_err(|e| CoderError::Memory(format!("failed to persist entry: {}", e)))?;
        Ok(())
    }

    fn evict_oldest(&self, keep: usize) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "DELETE FROM successful_queries WHERE id NOT IN \
             (SELECT id FROM successful_queries ORDER BY id DESC LIMIT ?1)",
            params![keep as i64],
        )
        .map_err(|e| CoderError::Memory(format!("failed to evict: {}", e)))?;
        Ok(())
    }
}

/// Volatile storage for ephemeral runs and tests.
#[derive(Default)]
pub struct InMemoryBackend {
    entries: Mutex<Vec<MemoryEntry>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MemoryBackend for InMemoryBackend {
    fn load(&self) -> Result<Vec<MemoryEntry>> {
        Ok(self.entries.lock().unwrap().clone())
    }

    fn append(&self, entry: &MemoryEntry) -> Result<()> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    fn evict_oldest(&self, keep: usize) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let excess = entries.len().saturating_sub(keep);
        entries.drain(..excess);
        Ok(())
    }
}

pub struct MemoryStats {
    pub total_queries: usize,
}

/// The learning cache service: an in-process FIFO index over a durable
/// backend. Never a bare global; inject it where it is needed.
pub struct SqlMemory {
    entries: Mutex<VecDeque<MemoryEntry>>,
    backend: Box<dyn MemoryBackend>,
    capacity: usize,
}

impl SqlMemory {
    pub fn new(backend: Box<dyn MemoryBackend>) -> Result<Self> {
        Self::with_capacity(backend, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(backend: Box<dyn MemoryBackend>, capacity: usize) -> Result<Self> {
        let entries: VecDeque<MemoryEntry> = backend.load()?.into();
        info!("💾 Learning cache loaded: {} entries", entries.len());
        Ok(Self { entries: Mutex::new(entries), backend, capacity })
    }

    /// Look up a cached SQL template for this question. On a hit, if the
    /// question carries a number and the cached SQL has a LIMIT clause, the
    /// question's first number replaces the cached limit.
    pub fn lookup(&self, question: &str) -> Option<String> {
        let key = normalize_question(question);
        let entries = self.entries.lock().unwrap();
        let entry = entries.iter().find(|e| e.question == key)?;
        let mut sql = entry.sql.clone();

        if let Some(number) = DIGIT_RUN.find(question) {
            if LIMIT_CLAUSE.is_match(&sql) {
                sql = LIMIT_CLAUSE
                    .replace(&sql, format!("LIMIT {}", number.as_str()))
                    .to_string();
            }
        }

        info!("🔍 Learning cache hit for: {}", key);
        Some(sql)
    }

    /// Record a confirmed successful query. First-writer-wins: an existing
    /// entry under the same normalized key is left untouched. Appends and
    /// evicts FIFO past capacity, persisting inside the critical section.
    pub fn record(&self, question: &str, sql: &str, tables_used: &[String]) -> Result<()> {
        let key = normalize_question(question);
        let mut entries = self.entries.lock().unwrap();
        if entries.iter().any(|e| e.question == key) {
            return Ok(());
        }

        let entry = MemoryEntry {
            question: key.clone(),
            original: question.to_lowercase(),
            sql: sql.to_string(),
            tables: tables_used.to_vec(),
            timestamp: Utc::now().timestamp(),
        };
        self.backend.append(&entry)?;
        entries.push_back(entry);

        if entries.len() > self.capacity {
            entries.pop_front();
            if let Err(e) = self.backend.evict_oldest(self.capacity) {
                warn!("⚠️ Cache eviction failed in backend: {}", e);
            }
        }

        info!("✅ Learned query pattern: {}", key);
        Ok(())
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats { total_queries: self.entries.lock().unwrap().len() }
    }
}

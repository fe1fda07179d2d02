//! Schema catalog
//!
//! Immutable per-request view of which tables and columns exist. Built once
//! from a catalog file (JSON or the plain `TABLE schema.name -- description`
//! text form) and consumed read-only by the generator, the resolver and the
//! retry controller.

use crate::error::{CoderError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

/// Column types the generator treats as aggregable.
const NUMERIC_TYPES: [&str; 5] = ["int", "decimal", "numeric", "float", "money"];

/// Column-name fragments that mark a date/time column.
const DATE_NAME_HINTS: [&str; 6] = ["date", "created", "fecha", "updated", "timestamp", "modified"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    /// Lower-cased `schema.table` pair.
    pub qualified_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub columns: Vec<Column>,
}

impl Table {
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Columns whose declared type suggests they can be aggregated.
    /// Substring match on the type name, e.g. "integer", "numeric(12,2)".
    pub fn numeric_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| {
                let ty = c.data_type.to_lowercase();
                NUMERIC_TYPES.iter().any(|t| ty.contains(t))
            })
            .map(|c| c.name.clone())
            .collect()
    }

    /// Columns whose name suggests a date or timestamp.
    pub fn date_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| {
                let name = c.name.to_lowercase();
                DATE_NAME_HINTS.iter().any(|h| name.contains(h))
            })
            .map(|c| c.name.clone())
            .collect()
    }
}

/// Ordered list of tables; qualified names are lower-cased and unique.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaCatalog {
    pub tables: Vec<Table>,
}

impl SchemaCatalog {
    /// Build a catalog, lower-casing qualified names and dropping duplicates
    /// (first occurrence wins).
    pub fn new(tables: Vec<Table>) -> Self {
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::with_capacity(tables.len());
        for mut t in tables {
            t.qualified_name = t.qualified_name.trim().to_lowercase();
            if t.qualified_name.is_empty() || !seen.insert(t.qualified_name.clone()) {
                continue;
            }
            out.push(t);
        }
        Self { tables: out }
    }

    /// Load a catalog file. JSON when the content looks like JSON, otherwise
    /// the plain text schema form.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CoderError::SchemaUnavailable(format!("cannot read {}: {}", path.display(), e))
        })?;
        let catalog = if raw.trim_start().starts_with('{') || raw.trim_start().starts_with('[') {
            Self::from_json(&raw)?
        } else {
            Self::parse_text(&raw)
        };
        if catalog.tables.is_empty() {
            return Err(CoderError::SchemaUnavailable(format!(
                "no tables found in {}",
                path.display()
            )));
        }
        info!("📚 Schema loaded: {} tables", catalog.tables.len());
        Ok(catalog)
    }

    /// Parse a JSON catalog: either `{"tables": [...]}` or a bare array.
    pub fn from_json(raw: &str) -> Result<Self> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum CatalogJson {
            Wrapped { tables: Vec<Table> },
            Bare(Vec<Table>),
        }
        let parsed: CatalogJson = serde_json::from_str(raw)
            .map_err(|e| CoderError::SchemaUnavailable(format!("invalid catalog JSON: {}", e)))?;
        let tables = match parsed {
            CatalogJson::Wrapped { tables } => tables,
            CatalogJson::Bare(tables) => tables,
        };
        Ok(Self::new(tables))
    }

    /// Parse the plain text schema form:
    ///
    /// ```text
    /// TABLE public.commerce_buyer -- registered buyers
    ///   - id (integer)
    ///   - name (varchar)
    /// ```
    pub fn parse_text(text: &str) -> Self {
        lazy_static! {
            static ref TABLE_LINE: Regex =
                Regex::new(r"^\s*TABLE\s+([A-Za-z0-9_]+\.[A-Za-z0-9_]+)(?:\s*--\s*(.+))?").unwrap();
            static ref COLUMN_LINE: Regex = Regex::new(r"^\s*-\s*(\w+)\s*\(([^)]+)\)").unwrap();
        }

        let mut tables: Vec<Table> = Vec::new();
        for line in text.lines() {
            if let Some(caps) = TABLE_LINE.captures(line) {
                tables.push(Table {
                    qualified_name: caps[1].to_lowercase(),
                    description: caps.get(2).map(|m| m.as_str().trim().to_string()).unwrap_or_default(),
                    columns: Vec::new(),
                });
            } else if let Some(caps) = COLUMN_LINE.captures(line) {
                if let Some(current) = tables.last_mut() {
                    current.columns.push(Column {
                        name: caps[1].to_string(),
                        data_type: caps[2].to_lowercase(),
                    });
                }
            }
        }
        Self::new(tables)
    }

    /// The allow-list: every valid qualified table name.
    pub fn allowed_tables(&self) -> HashSet<String> {
        self.tables.iter().map(|t| t.qualified_name.clone()).collect()
    }

    pub fn table(&self, qualified_name: &str) -> Option<&Table> {
        let name = qualified_name.to_lowercase();
        self.tables.iter().find(|t| t.qualified_name == name)
    }

    /// Render the catalog into the text shape a remote generator consumes.
    /// Capped at 20k characters to bound prompt size.
    pub fn schema_text(&self) -> String {
        let mut lines: Vec<String> = Vec::new();
        for t in &self.tables {
            if t.description.is_empty() {
                lines.push(format!("TABLE {}", t.qualified_name));
            } else {
                lines.push(format!("TABLE {} -- {}", t.qualified_name, t.description));
            }
            for c in &t.columns {
                lines.push(format!("  - {} ({})", c.name, c.data_type));
            }
        }
        let mut text = lines.join("\n");
        if text.len() > 20_000 {
            let mut end = 20_000;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text.truncate(end);
        }
        text
    }
}

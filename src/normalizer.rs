//! SQL normalizer
//!
//! Rewrites surface syntax into a canonical form and extracts the set of
//! qualified tables a statement references. Validation downstream works on
//! the canonical form only, so `normalize` must be idempotent.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use std::collections::HashSet;

lazy_static! {
    /// `schema . table` with stray whitespace around the dot.
    static ref DOTTED_NAME: Regex =
        Regex::new(r"([A-Za-z0-9_]+)\s*\.\s*([A-Za-z0-9_]+)").unwrap();

    /// Qualified reference after FROM/JOIN, with an optional trailing alias.
    static ref FROM_JOIN_REF: Regex = Regex::new(
        r"(?i)\b(FROM|JOIN)\s+([A-Za-z0-9_]+)\.([A-Za-z0-9_]+)(\s+(?:AS\s+)?[A-Za-z0-9_]+)?"
    )
    .unwrap();

    static ref TABLE_REFS: [Regex; 3] = [
        Regex::new(r"(?i)\b(?:FROM|JOIN)\s+([A-Za-z0-9_]+)\.([A-Za-z0-9_]+)\b").unwrap(),
        Regex::new(r"(?i)\bINTO\s+([A-Za-z0-9_]+)\.([A-Za-z0-9_]+)\b").unwrap(),
        Regex::new(r"(?i)\bUPDATE\s+([A-Za-z0-9_]+)\.([A-Za-z0-9_]+)\b").unwrap(),
    ];
}

/// Canonicalize a SQL string: collapse whitespace around dotted identifiers
/// and lower-case `schema.table` after FROM/JOIN, preserving the keyword
/// casing and any trailing alias token.
pub fn normalize(sql: &str) -> String {
    if sql.trim().is_empty() {
        return String::new();
    }

    let sql = DOTTED_NAME.replace_all(sql, "$1.$2");

    let sql = FROM_JOIN_REF.replace_all(&sql, |caps: &Captures| {
        let kw = &caps[1];
        let schema = caps[2].to_lowercase();
        let table = caps[3].to_lowercase();
        let rest = caps.get(4).map(|m| m.as_str()).unwrap_or("");
        format!("{} {}.{}{}", kw, schema, table, rest)
    });

    sql.trim().to_string()
}

/// Extract every qualified table referenced after FROM/JOIN/INTO/UPDATE,
/// lower-cased. Unqualified references are deliberately not extracted: the
/// pipeline requires schema-qualified names.
pub fn extract_tables(sql: &str) -> HashSet<String> {
    let mut tables = HashSet::new();
    if sql.is_empty() {
        return tables;
    }
    for pattern in TABLE_REFS.iter() {
        for caps in pattern.captures_iter(sql) {
            tables.insert(format!("{}.{}", caps[1].to_lowercase(), caps[2].to_lowercase()));
        }
    }
    tables
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_dot_whitespace() {
        let sql = "SELECT * FROM public . commerce_buyer";
        assert_eq!(normalize(sql), "SELECT * FROM public.commerce_buyer");
    }

    #[test]
    fn test_lowercases_from_join_preserving_alias() {
        let sql = "SELECT b.id FROM Public.Commerce_Buyer AS b JOIN PUBLIC.COMMERCE_INVOICE i ON i.buyer_id = b.id";
        let norm = normalize(sql);
        assert!(norm.contains("FROM public.commerce_buyer AS b"));
        assert!(norm.contains("JOIN public.commerce_invoice i"));
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let samples = [
            "SELECT * FROM Public . Commerce_Buyer b WHERE b.id > 3",
            "select count(*) from PUBLIC.FARM_CROP",
            "UPDATE public.farm_tool SET name = 'hoe'",
            "",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {:?}", s);
        }
    }

    #[test]
    fn test_extract_tables_all_keywords() {
        let sql = "INSERT INTO public.farm_income SELECT * FROM public.farm_production p \
                   JOIN Public.Farm_Crop c ON c.id = p.crop_id";
        let tables = extract_tables(sql);
        assert!(tables.contains("public.farm_income"));
        assert!(tables.contains("public.farm_production"));
        assert!(tables.contains("public.farm_crop"));
        assert_eq!(tables.len(), 3);

        let tables = extract_tables("UPDATE public.farm_tool SET name = 'x'");
        assert!(tables.contains("public.farm_tool"));
    }

    #[test]
    fn test_unqualified_tables_not_extracted() {
        let tables = extract_tables("SELECT * FROM buyers WHERE id = 1");
        assert!(tables.is_empty());
    }
}

//! Table resolver
//!
//! Validates referenced tables against the allow-list and proposes
//! replacements for hallucinated names: exact alias lookup, morphological
//! singularization, then approximate matching scoped to the same schema
//! before falling back to all schemas. Resolution only ever maps into the
//! allow-list.

use crate::normalizer::extract_tables;
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use strsim::normalized_levenshtein;
use tracing::info;

lazy_static! {
    /// Commonly hallucinated or colloquial table names and their canonical
    /// targets. Static configuration, never mutated at runtime.
    static ref ALIASES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("public.commerce_buyers", "public.commerce_buyer");
        m.insert("public.customer", "public.commerce_buyer");
        m.insert("public.customers", "public.commerce_buyer");
        m.insert("public.user", "public.users_user");
        m.insert("public.company", "public.commerce_buyer");
        m.insert("public.invoice", "public.commerce_invoice");
        m.insert("public.invoices", "public.commerce_invoice");
        m.insert("public.factura", "public.commerce_invoice");
        m.insert("public.facturas", "public.commerce_invoice");
        m.insert("public.comprador", "public.commerce_buyer");
        m.insert("public.compradores", "public.commerce_buyer");
        m.insert("public.listings", "public.commerce_listing");
        m.insert("public.trabajadores", "public.commerce_worker");
        m.insert("public.deudas", "public.commerce_workerdebt");
        m.insert("public.pagos", "public.commerce_workerpayment");
        m.insert("public.cultivos", "public.farm_crop");
        m.insert("public.produccion", "public.farm_production");
        m.insert("public.producciones", "public.farm_production");
        m.insert("public.fincas", "public.farm_farm");
        m.insert("public.herramientas", "public.farm_tool");
        m.insert("public.ingresos", "public.farm_income");
        m.insert("public.costos", "public.farm_cost");
        m
    };
}

/// Strip a plural suffix to test a singular candidate name.
pub fn singularize(name: &str) -> String {
    if name.len() <= 1 {
        return name.to_string();
    }
    if name.ends_with("ies") && name.len() > 3 {
        return format!("{}y", &name[..name.len() - 3]);
    }
    if name.ends_with("ses") && name.len() > 3 {
        return name[..name.len() - 2].to_string();
    }
    if name.ends_with("es") && name.len() > 2 {
        return name[..name.len() - 2].to_string();
    }
    if name.ends_with('s') {
        return name[..name.len() - 1].to_string();
    }
    name.to_string()
}

/// Rewrite every occurrence of the wrong qualified names in a SQL string,
/// tolerating whitespace around the dot and any casing.
pub fn apply_replacements(sql: &str, replacements: &HashMap<String, String>) -> String {
    if sql.is_empty() || replacements.is_empty() {
        return sql.to_string();
    }
    let mut sql = sql.to_string();
    for (wrong, right) in replacements {
        let (Some((ws, wt)), Some(_)) = (wrong.split_once('.'), right.split_once('.')) else {
            continue;
        };
        let pattern = format!(r"(?i)\b{}\s*\.\s*{}\b", regex::escape(ws), regex::escape(wt));
        if let Ok(re) = Regex::new(&pattern) {
            sql = re.replace_all(&sql, right.as_str()).to_string();
        }
    }
    sql
}

/// Resolver for invalid table references.
pub struct TableResolver {
    /// Alias map consulted before any heuristic matching.
    aliases: HashMap<String, String>,
    /// Minimum normalized similarity (0.0-1.0) for an approximate match.
    pub similarity_threshold: f64,
}

impl Default for TableResolver {
    fn default() -> Self {
        Self {
            aliases: ALIASES.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            similarity_threshold: 0.6,
        }
    }
}

impl TableResolver {
    pub fn with_aliases(aliases: HashMap<String, String>) -> Self {
        Self { aliases, similarity_threshold: 0.6 }
    }

    /// Compute a correction map for the tables in `used` that are not in
    /// `allowed`. Every value in the result is a member of `allowed`;
    /// unresolved tables are omitted.
    pub fn resolve(
        &self,
        used: &HashSet<String>,
        allowed: &HashSet<String>,
    ) -> HashMap<String, String> {
        let mut replacements: HashMap<String, String> = HashMap::new();

        // Allowed table names grouped by schema: schema -> table -> qualified.
        let mut by_schema: HashMap<&str, HashMap<&str, &str>> = HashMap::new();
        for a in allowed {
            if let Some((sch, tbl)) = a.split_once('.') {
                by_schema.entry(sch).or_default().insert(tbl, a.as_str());
            }
        }

        for u in used {
            if allowed.contains(u) {
                continue;
            }

            if let Some(target) = self.aliases.get(u) {
                if allowed.contains(target) {
                    replacements.insert(u.clone(), target.clone());
                    continue;
                }
            }

            let Some((us, ut)) = u.split_once('.') else {
                continue;
            };

            let singular = singularize(ut);
            if let Some(full) = by_schema.get(us).and_then(|m| m.get(singular.as_str())) {
                replacements.insert(u.clone(), full.to_string());
                continue;
            }

            // Approximate match within the same schema first.
            if let Some(schema_tables) = by_schema.get(us) {
                if let Some(full) = self.best_match(ut, schema_tables) {
                    replacements.insert(u.clone(), full);
                    continue;
                }
            }

            // Last resort: match on table name alone across every schema.
            let mut all_tables: HashMap<&str, &str> = HashMap::new();
            for a in allowed {
                if let Some((_, tbl)) = a.split_once('.') {
                    all_tables.entry(tbl).or_insert(a.as_str());
                }
            }
            if let Some(full) = self.best_match(ut, &all_tables) {
                replacements.insert(u.clone(), full);
            }
        }

        replacements
    }

    /// Rewrite known aliases before validation. Only aliases whose target is
    /// actually in the allow-list fire.
    pub fn apply_known_aliases(&self, sql: &str, allowed: &HashSet<String>) -> String {
        if sql.is_empty() {
            return String::new();
        }
        let used = extract_tables(sql);
        let mut repl: HashMap<String, String> = HashMap::new();
        for u in used {
            if !allowed.contains(&u) {
                if let Some(target) = self.aliases.get(&u) {
                    if allowed.contains(target) {
                        repl.insert(u, target.clone());
                    }
                }
            }
        }
        if repl.is_empty() {
            return sql.to_string();
        }
        info!("🔄 Applying table aliases: {:?}", repl);
        apply_replacements(sql, &repl)
    }

    /// Best candidate above the similarity threshold; best match wins, ties
    /// broken by candidate name order for determinism.
    fn best_match(&self, name: &str, candidates: &HashMap<&str, &str>) -> Option<String> {
        let mut best: Option<(&str, &str, f64)> = None;
        for (cand, full) in candidates {
            let score = normalized_levenshtein(name, cand);
            if score < self.similarity_threshold {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_cand, _, best_score)) => {
                    score > best_score || (score == best_score && *cand < best_cand)
                }
            };
            if better {
                best = Some((*cand, *full, score));
            }
        }
        best.map(|(_, full, _)| full.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allowed() -> HashSet<String> {
        [
            "public.commerce_buyer",
            "public.commerce_invoice",
            "public.farm_crop",
            "public.farm_production",
            "analytics.daily_summary",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    #[test]
    fn test_singularize() {
        assert_eq!(singularize("categories"), "category");
        assert_eq!(singularize("statuses"), "status");
        assert_eq!(singularize("invoices"), "invoic");
        assert_eq!(singularize("buyers"), "buyer");
        assert_eq!(singularize("crop"), "crop");
        assert_eq!(singularize("s"), "s");
    }

    #[test]
    fn test_alias_lookup_wins_first() {
        let resolver = TableResolver::default();
        let used: HashSet<String> = ["public.customers".to_string()].into_iter().collect();
        let repl = resolver.resolve(&used, &allowed());
        assert_eq!(repl.get("public.customers").unwrap(), "public.commerce_buyer");
    }

    #[test]
    fn test_singularization_rule() {
        let resolver = TableResolver::with_aliases(HashMap::new());
        let used: HashSet<String> = ["public.farm_crops".to_string()].into_iter().collect();
        let repl = resolver.resolve(&used, &allowed());
        assert_eq!(repl.get("public.farm_crops").unwrap(), "public.farm_crop");
    }

    #[test]
    fn test_fuzzy_match_same_schema() {
        let resolver = TableResolver::with_aliases(HashMap::new());
        let used: HashSet<String> = ["public.comerce_buyer".to_string()].into_iter().collect();
        let repl = resolver.resolve(&used, &allowed());
        assert_eq!(repl.get("public.comerce_buyer").unwrap(), "public.commerce_buyer");
    }

    #[test]
    fn test_fuzzy_match_crosses_schemas() {
        let resolver = TableResolver::with_aliases(HashMap::new());
        let used: HashSet<String> = ["public.daily_sumary".to_string()].into_iter().collect();
        let repl = resolver.resolve(&used, &allowed());
        assert_eq!(repl.get("public.daily_sumary").unwrap(), "analytics.daily_summary");
    }

    #[test]
    fn test_unresolvable_table_omitted() {
        let resolver = TableResolver::default();
        let used: HashSet<String> = ["public.zzz_qqq_unrelated".to_string()].into_iter().collect();
        let repl = resolver.resolve(&used, &allowed());
        assert!(repl.is_empty());
    }

    #[test]
    fn test_resolution_soundness() {
        let resolver = TableResolver::default();
        let allowed = allowed();
        let used: HashSet<String> = [
            "public.customers",
            "public.facturas",
            "public.farm_crops",
            "public.comerce_buyer",
            "public.nonsense_xyz",
            "public.commerce_buyer",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let repl = resolver.resolve(&used, &allowed);
        for right in repl.values() {
            assert!(allowed.contains(right), "resolved outside allow-list: {}", right);
        }
        assert!(!repl.contains_key("public.commerce_buyer"));
    }

    #[test]
    fn test_apply_replacements_case_insensitive() {
        let mut repl = HashMap::new();
        repl.insert("public.customers".to_string(), "public.commerce_buyer".to_string());
        let sql = "SELECT * FROM Public . CUSTOMERS c";
        assert_eq!(
            apply_replacements(sql, &repl),
            "SELECT * FROM public.commerce_buyer c"
        );
    }

    #[test]
    fn test_apply_known_aliases_only_when_target_allowed() {
        let resolver = TableResolver::default();
        let sql = "SELECT COUNT(*) FROM public.facturas";
        let rewritten = resolver.apply_known_aliases(sql, &allowed());
        assert!(rewritten.contains("public.commerce_invoice"));

        // Alias target missing from the allow-list: leave the SQL alone.
        let small: HashSet<String> = ["public.farm_crop".to_string()].into_iter().collect();
        let untouched = resolver.apply_known_aliases(sql, &small);
        assert_eq!(untouched, sql);
    }
}

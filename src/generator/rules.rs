//! Rule-based SQL generator
//!
//! Deterministic decision table: an ordered keyword→table map picks the
//! target table, then intent families are tested in fixed priority order
//! (COUNT → SUM → AVG → LIST → MAX → MIN → plain SELECT). Ties resolve by
//! declaration order, not specificity, so the ordering here is part of the
//! contract. Identical `(question, schema)` always yields identical SQL.

use crate::error::{CoderError, Result};
use crate::generator::{GeneratedSql, SqlGenerator};
use crate::schema::{SchemaCatalog, Table};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;

/// Safety cap for row limits parsed out of the question.
const MAX_ROWS_LIMIT: u32 = 1000;

/// Domain vocabulary: keyword set → table-name suffix. The first set with
/// any term present in the question wins.
const KEYWORD_TABLE_MAP: &[(&[&str], &str)] = &[
    (
        &["comprador", "compradores", "buyer", "cliente", "clientes", "customer", "customers"],
        "commerce_buyer",
    ),
    (&["factura", "facturas", "invoice", "invoices"], "commerce_invoice"),
    (
        &["listado", "listados", "listing", "listings", "publicacion", "publicaciones"],
        "commerce_listing",
    ),
    (&["oferta", "ofertas", "bid", "bids", "puja", "pujas"], "commerce_bid"),
    (
        &["trabajador", "trabajadores", "worker", "workers", "empleado", "empleados"],
        "commerce_worker",
    ),
    (&["deuda", "deudas", "debt", "debts", "debe", "deben"], "commerce_workerdebt"),
    (&["pago", "pagos", "payment", "payments", "abono", "abonos"], "commerce_workerpayment"),
    (&["cultivo", "cultivos", "crop", "crops", "siembra", "siembras"], "farm_crop"),
    (
        &["produccion", "producción", "production", "cosecha", "cosechas"],
        "farm_production",
    ),
    (&["finca", "fincas", "farm", "farms", "terreno", "terrenos", "predio"], "farm_farm"),
    (&["herramienta", "herramientas", "tool", "tools", "equipo", "equipos"], "farm_tool"),
    (&["ingreso", "ingresos", "income", "incomes", "ganancia", "ganancias"], "farm_income"),
    (
        &["costo", "costos", "gasto", "gastos", "cost", "costs", "expense", "expenses"],
        "farm_cost",
    ),
    (&["usuario", "usuarios", "user", "users"], "users_user"),
    (&["precio", "precios", "price", "prices", "mercado"], "commerce_marketprice"),
];

const COUNT_KEYWORDS: &[&str] = &[
    "cuántos", "cuantos", "cuántas", "cuantas", "cantidad", "número", "numero", "how many",
    "count",
];
const SUM_KEYWORDS: &[&str] = &["total", "suma", "sum", "sumar"];
const AVG_KEYWORDS: &[&str] = &["promedio", "media", "average", "avg"];
const LIST_KEYWORDS: &[&str] = &[
    "muestra", "lista", "dame", "ver", "show", "list", "enséñame", "ensename", "primeros", "top",
];
const MAX_KEYWORDS: &[&str] = &["mayor", "máximo", "maximo", "max", "más alto", "mas alto", "highest"];
const MIN_KEYWORDS: &[&str] = &["menor", "mínimo", "minimo", "min", "más bajo", "mas bajo", "lowest"];

/// Column-name fragments suggesting a currency amount, preferred for SUM.
const MONEY_HINTS: &[&str] = &["amount", "price", "precio", "monto", "valor", "value", "total"];

/// Identity/name columns listed first when projecting for LIST.
const LIST_PRIORITY_COLUMNS: &[&str] =
    &["id", "name", "nombre", "title", "titulo", "email", "phone", "telefono"];

lazy_static! {
    static ref DIGIT_RUN: Regex = Regex::new(r"\d+").unwrap();
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Deterministic pattern/keyword SQL generator. Ignores feedback: its output
/// for a given question never changes, so the retry controller's correction
/// path is what rescues a bad table choice.
#[derive(Debug, Default)]
pub struct RuleBasedGenerator;

impl RuleBasedGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Pick the target table for a question: first matching keyword set in
    /// declaration order, else the first table in the schema.
    fn find_table<'a>(&self, question: &str, schema: &'a SchemaCatalog) -> Option<&'a Table> {
        let q = question.to_lowercase();
        for (keywords, suffix) in KEYWORD_TABLE_MAP {
            if contains_any(&q, keywords) {
                if let Some(t) = schema.tables.iter().find(|t| t.qualified_name.contains(suffix)) {
                    return Some(t);
                }
            }
        }
        schema.tables.first()
    }

    fn candidate(&self, question: &str, schema: &SchemaCatalog) -> Result<String> {
        let q = question.to_lowercase();
        let table = self
            .find_table(question, schema)
            .ok_or_else(|| CoderError::Generator("schema catalog has no tables".into()))?;
        let name = &table.qualified_name;
        let numeric = table.numeric_columns();

        if contains_any(&q, COUNT_KEYWORDS) {
            return Ok(format!("SELECT COUNT(*) AS total FROM {}", name));
        }

        if contains_any(&q, SUM_KEYWORDS) {
            let money_col = numeric
                .iter()
                .find(|c| contains_any(&c.to_lowercase(), MONEY_HINTS));
            return Ok(match (money_col, numeric.first()) {
                (Some(col), _) => format!("SELECT SUM({}) AS total FROM {}", col, name),
                (None, Some(col)) => format!("SELECT SUM({}) AS total FROM {}", col, name),
                // No numeric column to add up: counting is the best answer.
                (None, None) => format!("SELECT COUNT(*) AS total FROM {}", name),
            });
        }

        if contains_any(&q, AVG_KEYWORDS) {
            if let Some(col) = numeric.first() {
                return Ok(format!("SELECT AVG({}) AS promedio FROM {}", col, name));
            }
        }

        if contains_any(&q, LIST_KEYWORDS) {
            return Ok(self.list_sql(question, table));
        }

        if contains_any(&q, MAX_KEYWORDS) {
            if let Some(col) = numeric.first() {
                return Ok(format!("SELECT MAX({}) AS maximo FROM {}", col, name));
            }
        }

        if contains_any(&q, MIN_KEYWORDS) {
            if let Some(col) = numeric.first() {
                return Ok(format!("SELECT MIN({}) AS minimo FROM {}", col, name));
            }
        }

        let columns = table.column_names();
        let select_clause = if columns.is_empty() {
            "*".to_string()
        } else {
            columns[..columns.len().min(5)].join(", ")
        };
        Ok(format!("SELECT {} FROM {} LIMIT 10", select_clause, name))
    }

    /// Projection for list questions: identity/name columns first, capped at
    /// five, ordered by a detected date column descending, row limit taken
    /// from the first number in the question (default 10, capped).
    fn list_sql(&self, question: &str, table: &Table) -> String {
        let limit = DIGIT_RUN
            .find(question)
            .and_then(|m| m.as_str().parse::<u32>().ok())
            .unwrap_or(10)
            .min(MAX_ROWS_LIMIT);

        let columns = table.column_names();
        let mut selected: Vec<String> = Vec::new();
        for prio in LIST_PRIORITY_COLUMNS {
            if let Some(col) = columns
                .iter()
                .find(|c| c.to_lowercase().contains(prio) && !selected.contains(c))
            {
                selected.push(col.clone());
            }
        }
        for col in &columns {
            if selected.len() >= 5 {
                break;
            }
            if !selected.contains(col) {
                selected.push(col.clone());
            }
        }
        selected.truncate(5);

        let select_clause = if selected.is_empty() { "*".to_string() } else { selected.join(", ") };
        let order_clause = table
            .date_columns()
            .first()
            .map(|c| format!(" ORDER BY {} DESC", c))
            .unwrap_or_default();

        format!(
            "SELECT {} FROM {}{} LIMIT {}",
            select_clause, table.qualified_name, order_clause, limit
        )
    }
}

#[async_trait]
impl SqlGenerator for RuleBasedGenerator {
    async fn generate(
        &self,
        question: &str,
        schema: &SchemaCatalog,
        _feedback: Option<&str>,
    ) -> Result<GeneratedSql> {
        let sql = self.candidate(question, schema)?;
        Ok(GeneratedSql { sql, source: "rule_engine".into() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, SchemaCatalog, Table};

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::new(vec![
            Table {
                qualified_name: "public.commerce_invoice".into(),
                description: String::new(),
                columns: vec![
                    Column { name: "id".into(), data_type: "integer".into() },
                    Column { name: "total_amount".into(), data_type: "numeric".into() },
                    Column { name: "issued_at".into(), data_type: "timestamp".into() },
                ],
            },
            Table {
                qualified_name: "public.commerce_buyer".into(),
                description: String::new(),
                columns: vec![
                    Column { name: "id".into(), data_type: "integer".into() },
                    Column { name: "name".into(), data_type: "varchar".into() },
                    Column { name: "email".into(), data_type: "varchar".into() },
                    Column { name: "region".into(), data_type: "varchar".into() },
                    Column { name: "phone".into(), data_type: "varchar".into() },
                    Column { name: "notes".into(), data_type: "text".into() },
                    Column { name: "created_at".into(), data_type: "timestamp".into() },
                ],
            },
        ])
    }

    fn gen(question: &str) -> String {
        RuleBasedGenerator::new().candidate(question, &catalog()).unwrap()
    }

    #[test]
    fn test_count_intent() {
        assert_eq!(
            gen("¿Cuántos compradores tengo?"),
            "SELECT COUNT(*) AS total FROM public.commerce_buyer"
        );
    }

    #[test]
    fn test_sum_prefers_money_column() {
        assert_eq!(
            gen("dime el total de las facturas"),
            "SELECT SUM(total_amount) AS total FROM public.commerce_invoice"
        );
    }

    #[test]
    fn test_avg_uses_first_numeric_column() {
        assert_eq!(
            gen("promedio de facturas"),
            "SELECT AVG(id) AS promedio FROM public.commerce_invoice"
        );
    }

    #[test]
    fn test_list_with_limit_and_order() {
        let sql = gen("muestra los primeros 5 compradores");
        assert_eq!(
            sql,
            "SELECT id, name, email, phone, region FROM public.commerce_buyer \
             ORDER BY created_at DESC LIMIT 5"
        );
    }

    #[test]
    fn test_list_limit_capped() {
        let sql = gen("muestra 9999 compradores");
        assert!(sql.ends_with("LIMIT 1000"));
    }

    #[test]
    fn test_max_and_min() {
        assert_eq!(
            gen("cuál es la factura mayor"),
            "SELECT MAX(id) AS maximo FROM public.commerce_invoice"
        );
        assert_eq!(
            gen("cuál es la factura menor"),
            "SELECT MIN(id) AS minimo FROM public.commerce_invoice"
        );
    }

    #[test]
    fn test_fallback_select() {
        let sql = gen("facturas pendientes de revisión");
        assert_eq!(
            sql,
            "SELECT id, total_amount, issued_at FROM public.commerce_invoice LIMIT 10"
        );
    }

    #[test]
    fn test_no_keyword_falls_back_to_first_table() {
        let sql = gen("qué pasó ayer");
        assert!(sql.contains("public.commerce_invoice"));
    }

    #[test]
    fn test_deterministic() {
        let q = "muestra los primeros 7 compradores";
        assert_eq!(gen(q), gen(q));
    }

    #[test]
    fn test_count_beats_list_in_priority() {
        // "cuántos" and "muestra" both present: COUNT is tested first.
        let sql = gen("muestra cuántos compradores hay");
        assert!(sql.starts_with("SELECT COUNT(*)"));
    }
}

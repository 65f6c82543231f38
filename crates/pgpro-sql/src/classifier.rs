//! Statement classification.

use std::ops::ControlFlow;

use pgpro_core::{AccessMode, TableAccessInfo, DEFAULT_SCHEMA};
use sqlparser::ast::{
    Cte, FromTable, ObjectName, Query, SetExpr, Statement, TableFactor, TableObject,
    TableWithJoins, Visit, Visitor,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::error::ClassifyError;

/// Classifies SQL batches into per-table accesses.
#[derive(Debug)]
pub struct QueryClassifier {
    dialect: PostgreSqlDialect,
}

impl Clone for QueryClassifier {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl Default for QueryClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryClassifier {
    pub fn new() -> Self {
        Self {
            dialect: PostgreSqlDialect {},
        }
    }

    /// Parse `sql` and list the table accesses of every statement, in order.
    ///
    /// - `SELECT`: one `Select` entry per table it reads, or a single
    ///   table-less `Select` entry when it reads none.
    /// - `INSERT`/`UPDATE`/`DELETE`: one entry for the target table.
    /// - anything else: one table-less `System` entry.
    pub fn classify(&self, sql: &str) -> Result<Vec<TableAccessInfo>, ClassifyError> {
        let statements = Parser::parse_sql(&self.dialect, sql)
            .map_err(|e| ClassifyError::from_parser_error(&e, sql))?;

        let mut accesses = Vec::new();
        for statement in &statements {
            accesses.extend(classify_statement(statement));
        }

        tracing::trace!(
            statements = statements.len(),
            accesses = accesses.len(),
            "Classified query"
        );
        Ok(accesses)
    }

    /// Whether `sql` only reads. Unparseable SQL is not a read.
    pub fn is_read(&self, sql: &str) -> bool {
        self.classify(sql)
            .map(|accesses| Self::is_read_batch(&accesses))
            .unwrap_or(false)
    }

    /// Whether a classified batch only reads. An empty batch is not a read.
    pub fn is_read_batch(accesses: &[TableAccessInfo]) -> bool {
        !accesses.is_empty() && accesses.iter().all(|a| a.access_mode.is_read())
    }
}

fn classify_statement(statement: &Statement) -> Vec<TableAccessInfo> {
    match statement {
        Statement::Query(query) => classify_query(query),
        Statement::Insert(insert) => {
            let access = match &insert.table {
                TableObject::TableName(name) => table_access(name, AccessMode::Insert),
                other => TableAccessInfo::unqualified(other.to_string(), AccessMode::Insert),
            };
            vec![access]
        }
        Statement::Update(update) => vec![target_access(&update.table.relation, AccessMode::Update)],
        Statement::Delete(delete) => {
            let targets = match &delete.from {
                FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
            };
            match targets.first() {
                Some(target) => vec![target_access(&target.relation, AccessMode::Delete)],
                None => vec![TableAccessInfo::tableless(AccessMode::Delete)],
            }
        }
        _ => vec![TableAccessInfo::tableless(AccessMode::System)],
    }
}

/// A `SELECT`, or a data-modifying statement wrapped in a `WITH`.
fn classify_query(query: &Query) -> Vec<TableAccessInfo> {
    match query.body.as_ref() {
        SetExpr::Insert(inner) | SetExpr::Update(inner) => classify_statement(inner),
        _ => {
            let mut walker = ReadWalker::default();
            walker.visit_query(query);
            let mut accesses = walker.tables;
            if walker.writes {
                accesses.push(TableAccessInfo::tableless(AccessMode::System));
            }
            if accesses.is_empty() {
                accesses.push(TableAccessInfo::tableless(AccessMode::Select));
            }
            accesses
        }
    }
}

fn target_access(relation: &TableFactor, mode: AccessMode) -> TableAccessInfo {
    match relation {
        TableFactor::Table { name, .. } => table_access(name, mode),
        other => TableAccessInfo::unqualified(other.to_string(), mode),
    }
}

/// Resolve a possibly qualified name. Unquoted identifiers fold to lower case.
fn table_access(name: &ObjectName, mode: AccessMode) -> TableAccessInfo {
    let parts: Vec<String> = name
        .0
        .iter()
        .map(|part| match part.as_ident() {
            Some(ident) if ident.quote_style.is_some() => ident.value.clone(),
            Some(ident) => ident.value.to_lowercase(),
            None => part.to_string(),
        })
        .collect();

    match parts.as_slice() {
        [.., schema, table] => TableAccessInfo::new(schema.clone(), table.clone(), mode),
        [table] => TableAccessInfo::new(DEFAULT_SCHEMA, table.clone(), mode),
        [] => TableAccessInfo::tableless(mode),
    }
}

/// Collects every base table a query touches.
///
/// Base tables are picked up from the `FROM` lists of each query level;
/// every nested query, wherever it sits in an expression, join condition,
/// `ORDER BY` or function argument, is walked on its own. CTE names are
/// tracked per scope so references to them are not reported as tables.
/// Tables read under `FOR UPDATE`/`FOR SHARE` are reported as updates.
/// `SELECT INTO` and any other non-read body marks the statement as a
/// write.
#[derive(Default)]
struct ReadWalker {
    tables: Vec<TableAccessInfo>,
    cte_scopes: Vec<Vec<String>>,
    writes: bool,
}

impl ReadWalker {
    fn visit_query(&mut self, query: &Query) {
        let ctes: &[Cte] = query
            .with
            .as_ref()
            .map(|with| with.cte_tables.as_slice())
            .unwrap_or_default();
        let recursive = query.with.as_ref().is_some_and(|with| with.recursive);
        let names: Vec<String> = ctes
            .iter()
            .map(|cte| fold_ident(&cte.alias.name.value, cte.alias.name.quote_style))
            .collect();

        // A non-recursive CTE sees only the ones defined before it.
        for (i, cte) in ctes.iter().enumerate() {
            let visible = if recursive { names.len() } else { i };
            self.cte_scopes.push(names[..visible].to_vec());
            self.visit_query(&cte.query);
            self.cte_scopes.pop();
        }

        self.cte_scopes.push(names);
        let mode = if query.locks.is_empty() {
            AccessMode::Select
        } else {
            AccessMode::Update
        };
        self.visit_set_expr(&query.body, mode);
        for subquery in nested_queries(query) {
            if !ctes.iter().any(|cte| *cte.query == subquery) {
                self.visit_query(&subquery);
            }
        }
        self.cte_scopes.pop();
    }

    fn visit_set_expr(&mut self, body: &SetExpr, mode: AccessMode) {
        match body {
            SetExpr::Select(select) => {
                if select.into.is_some() {
                    self.writes = true;
                }
                for table in &select.from {
                    self.visit_table_with_joins(table, mode);
                }
            }
            SetExpr::SetOperation { left, right, .. } => {
                self.visit_set_expr(left, mode);
                self.visit_set_expr(right, mode);
            }
            // Walked as nested queries.
            SetExpr::Query(_) | SetExpr::Values(_) => {}
            SetExpr::Insert(statement) | SetExpr::Update(statement) | SetExpr::Delete(statement) => {
                for access in classify_statement(statement) {
                    self.record(access);
                }
            }
            _ => self.writes = true,
        }
    }

    fn visit_table_with_joins(&mut self, table: &TableWithJoins, mode: AccessMode) {
        self.visit_table_factor(&table.relation, mode);
        for join in &table.joins {
            self.visit_table_factor(&join.relation, mode);
        }
    }

    fn visit_table_factor(&mut self, factor: &TableFactor, mode: AccessMode) {
        match factor {
            // Table functions such as generate_series() are not tables.
            TableFactor::Table { args: Some(_), .. } => {}
            TableFactor::Table { name, .. } => {
                let access = table_access(name, mode);
                if name.0.len() == 1 && self.is_cte(&access.name) {
                    return;
                }
                self.record(access);
            }
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.visit_table_with_joins(table_with_joins, mode),
            // Derived tables, LATERAL subqueries and function arguments are
            // walked as nested queries.
            _ => {}
        }
    }

    fn record(&mut self, access: TableAccessInfo) {
        if !self.tables.contains(&access) {
            self.tables.push(access);
        }
    }

    fn is_cte(&self, name: &str) -> bool {
        self.cte_scopes.iter().any(|scope| scope.iter().any(|n| n == name))
    }
}

/// The queries directly below `query`, at any position in its syntax tree.
fn nested_queries(query: &Query) -> Vec<Query> {
    #[derive(Default)]
    struct Collector {
        depth: usize,
        found: Vec<Query>,
    }

    impl Visitor for Collector {
        type Break = ();

        fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<()> {
            self.depth += 1;
            if self.depth == 2 {
                self.found.push(query.clone());
            }
            ControlFlow::Continue(())
        }

        fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<()> {
            self.depth -= 1;
            ControlFlow::Continue(())
        }
    }

    let mut collector = Collector::default();
    let _ = query.visit(&mut collector);
    collector.found
}

fn fold_ident(value: &str, quote_style: Option<char>) -> String {
    if quote_style.is_some() {
        value.to_string()
    } else {
        value.to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn classify(sql: &str) -> Vec<TableAccessInfo> {
        QueryClassifier::new().classify(sql).unwrap()
    }

    fn select(schema: &str, name: &str) -> TableAccessInfo {
        TableAccessInfo::new(schema, name, AccessMode::Select)
    }

    #[test]
    fn test_simple_select() {
        assert_eq!(classify("SELECT * FROM orders"), vec![select("public", "orders")]);
    }

    #[test]
    fn test_select_without_from() {
        assert_eq!(
            classify("SELECT 1"),
            vec![TableAccessInfo::tableless(AccessMode::Select)]
        );
    }

    #[test]
    fn test_qualified_and_joined_tables() {
        assert_eq!(
            classify("SELECT o.id FROM sales.orders o JOIN customers c ON c.id = o.customer_id"),
            vec![select("sales", "orders"), select("public", "customers")]
        );
    }

    #[test]
    fn test_identifier_folding() {
        assert_eq!(
            classify(r#"SELECT * FROM Orders, "Archive""#),
            vec![select("public", "orders"), select("public", "Archive")]
        );
    }

    #[test]
    fn test_subqueries_are_walked() {
        assert_eq!(
            classify(
                "SELECT * FROM (SELECT * FROM orders) o WHERE o.id IN (SELECT order_id FROM refunds)"
            ),
            vec![select("public", "orders"), select("public", "refunds")]
        );
    }

    #[test]
    fn test_union_reports_both_sides() {
        assert_eq!(
            classify("SELECT id FROM orders UNION SELECT id FROM archive.orders"),
            vec![select("public", "orders"), select("archive", "orders")]
        );
    }

    #[test]
    fn test_cte_names_are_not_tables() {
        assert_eq!(
            classify("WITH recent AS (SELECT * FROM orders) SELECT * FROM recent"),
            vec![select("public", "orders")]
        );
    }

    #[test]
    fn test_cte_does_not_hide_table_it_reads() {
        assert_eq!(
            classify("WITH orders AS (SELECT * FROM orders) SELECT * FROM orders"),
            vec![select("public", "orders")]
        );
        assert_eq!(
            classify(
                "WITH RECURSIVE t(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM t WHERE n < 3) SELECT n FROM t"
            ),
            vec![TableAccessInfo::tableless(AccessMode::Select)]
        );
    }

    #[test]
    fn test_subqueries_anywhere_in_the_statement() {
        for sql in [
            "SELECT CAST((SELECT secret FROM secrets LIMIT 1) AS text)",
            "SELECT coalesce((SELECT secret FROM secrets LIMIT 1), 'x')",
            "SELECT CASE WHEN true THEN (SELECT secret FROM secrets LIMIT 1) END",
            "SELECT id FROM orders ORDER BY (SELECT count(*) FROM secrets)",
            "SELECT id FROM orders GROUP BY id HAVING count(*) > (SELECT count(*) FROM secrets)",
            "SELECT count(*) FROM orders GROUP BY id, (SELECT max(id) FROM secrets)",
            "SELECT * FROM orders o, LATERAL (SELECT * FROM secrets s WHERE s.id = o.id) x",
            "SELECT * FROM orders o JOIN customers c ON c.id IN (SELECT id FROM secrets)",
            "SELECT * FROM generate_series(1, (SELECT max(id) FROM secrets))",
            "SELECT id FROM orders LIMIT (SELECT count(*) FROM secrets)",
            "SELECT (SELECT (SELECT secret FROM secrets LIMIT 1) LIMIT 1)",
        ] {
            assert!(
                classify(sql).contains(&select("public", "secrets")),
                "{sql}: {:?}",
                classify(sql)
            );
        }
    }

    #[test]
    fn test_select_into_is_not_a_read() {
        let accesses = classify("SELECT * INTO archive FROM orders");
        assert_eq!(
            accesses,
            vec![
                select("public", "orders"),
                TableAccessInfo::tableless(AccessMode::System)
            ]
        );
        assert!(!QueryClassifier::is_read_batch(&accesses));
    }

    #[test]
    fn test_locking_reads_need_update() {
        for sql in [
            "SELECT * FROM orders WHERE id = 1 FOR UPDATE",
            "SELECT * FROM orders FOR SHARE",
        ] {
            assert_eq!(
                classify(sql),
                vec![TableAccessInfo::new("public", "orders", AccessMode::Update)],
                "{sql}"
            );
        }
        assert!(!QueryClassifier::new().is_read("SELECT * FROM orders FOR UPDATE"));
    }

    #[test]
    fn test_table_functions_are_not_tables() {
        assert_eq!(
            classify("SELECT * FROM generate_series(1, 3)"),
            vec![TableAccessInfo::tableless(AccessMode::Select)]
        );
    }

    #[test]
    fn test_insert_update_delete_targets() {
        assert_eq!(
            classify("INSERT INTO orders (id) SELECT id FROM staging"),
            vec![TableAccessInfo::unqualified("orders", AccessMode::Insert)]
        );
        assert_eq!(
            classify("UPDATE crm.customers SET name = 'x' WHERE id = 1"),
            vec![TableAccessInfo::new("crm", "customers", AccessMode::Update)]
        );
        assert_eq!(
            classify("DELETE FROM orders"),
            vec![TableAccessInfo::unqualified("orders", AccessMode::Delete)]
        );
    }

    #[test]
    fn test_other_statements_are_system() {
        for sql in ["CREATE TABLE t (id int)", "DROP TABLE orders", "SET search_path TO crm"] {
            assert_eq!(
                classify(sql),
                vec![TableAccessInfo::tableless(AccessMode::System)],
                "{sql}"
            );
        }
    }

    #[test]
    fn test_batch_keeps_statement_order() {
        assert_eq!(
            classify("SELECT * FROM a; DELETE FROM b"),
            vec![
                select("public", "a"),
                TableAccessInfo::unqualified("b", AccessMode::Delete)
            ]
        );
    }

    #[test]
    fn test_is_read() {
        let classifier = QueryClassifier::new();
        assert!(classifier.is_read("SELECT * FROM orders"));
        assert!(classifier.is_read("SELECT 1; SELECT * FROM orders"));
        assert!(!classifier.is_read("SELECT 1; DELETE FROM orders"));
        assert!(!classifier.is_read("INSERT INTO orders VALUES (1)"));
        assert!(!classifier.is_read("SELEC nonsense"));
        assert!(!QueryClassifier::is_read_batch(&[]));
    }

    #[test]
    fn test_parse_error_carries_location() {
        let err = QueryClassifier::new()
            .classify("SELECT * FROM orders WHERE id = = 1")
            .unwrap_err();
        assert_eq!(err.line, Some(1));
        assert!(err.position.is_some());
        assert_eq!(err.to_db_error().code, "42601");
    }
}

use crate::error::{BrokerError, Result};
use crate::model::common::TableName;
use sqlparser::ast;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::collections::BTreeSet;

#[cfg(test)]
#[path = "test/sql_refs_test.rs"]
mod sql_refs_test;

// -----------------------------------------------------------------------------------------------
//  Table Reference Extraction
// -----------------------------------------------------------------------------------------------

/// Returns the base tables `query` reads from, sorted and without duplicates. CTE names
/// are not base tables. A qualified `db.table` reference is reduced to `table`, since
/// tables are always resolved inside the Session's project.
pub fn collect_used_tables(query: &str) -> Result<Vec<TableName>> {
  let statements = Parser::parse_sql(&GenericDialect {}, query)
    .map_err(|e| BrokerError::InvalidQuery(e.to_string()))?;
  if statements.is_empty() {
    return Err(BrokerError::InvalidQuery("empty query".to_string()));
  }

  let mut collector = TableCollector::default();
  for stmt in &statements {
    match stmt {
      ast::Statement::Query(query) => collector.visit_query(query),
      _ => return Err(BrokerError::InvalidQuery(format!("unsupported statement {}", stmt))),
    }
  }
  Ok(collector.tables.into_iter().map(TableName).collect())
}

#[derive(Default)]
struct TableCollector {
  tables: BTreeSet<String>,
  /// CTE names currently in scope.
  ctes: Vec<String>,
}

impl TableCollector {
  fn visit_query(&mut self, query: &ast::Query) {
    let scope = self.ctes.len();
    if let Some(with) = &query.with {
      for cte in &with.cte_tables {
        self.visit_query(&cte.query);
        self.ctes.push(cte.alias.name.value.clone());
      }
    }
    self.visit_set_expr(&query.body);
    self.ctes.truncate(scope);
  }

  fn visit_set_expr(&mut self, body: &ast::SetExpr) {
    match body {
      ast::SetExpr::Select(select) => {
        for table_with_joins in &select.from {
          self.visit_table_with_joins(table_with_joins);
        }
        if let Some(selection) = &select.selection {
          self.visit_expr(selection);
        }
        if let Some(having) = &select.having {
          self.visit_expr(having);
        }
      }
      ast::SetExpr::Query(query) => self.visit_query(query),
      ast::SetExpr::SetOperation { left, right, .. } => {
        self.visit_set_expr(left);
        self.visit_set_expr(right);
      }
      _ => {}
    }
  }

  fn visit_table_with_joins(&mut self, table_with_joins: &ast::TableWithJoins) {
    self.visit_table_factor(&table_with_joins.relation);
    for join in &table_with_joins.joins {
      self.visit_table_factor(&join.relation);
    }
  }

  fn visit_table_factor(&mut self, factor: &ast::TableFactor) {
    match factor {
      ast::TableFactor::Table { name, .. } => {
        if let Some(ident) = name.0.last() {
          let is_cte = name.0.len() == 1 && self.ctes.contains(&ident.value);
          if !is_cte {
            self.tables.insert(ident.value.clone());
          }
        }
      }
      ast::TableFactor::Derived { subquery, .. } => self.visit_query(subquery),
      ast::TableFactor::NestedJoin(table_with_joins) => {
        self.visit_table_with_joins(table_with_joins)
      }
      _ => {}
    }
  }

  fn visit_expr(&mut self, expr: &ast::Expr) {
    match expr {
      ast::Expr::Subquery(query) => self.visit_query(query),
      ast::Expr::Exists(query) => self.visit_query(query),
      ast::Expr::InSubquery { expr, subquery, .. } => {
        self.visit_expr(expr);
        self.visit_query(subquery);
      }
      ast::Expr::BinaryOp { left, right, .. } => {
        self.visit_expr(left);
        self.visit_expr(right);
      }
      ast::Expr::UnaryOp { expr, .. } => self.visit_expr(expr),
      ast::Expr::Nested(expr) => self.visit_expr(expr),
      _ => {}
    }
  }
}

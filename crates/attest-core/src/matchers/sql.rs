//! SQL validity matchers.
//!
//! `is-sql` parses the output with a configurable dialect and optionally
//! enforces table/column allow-lists; `contains-sql` first extracts a
//! fenced code block and delegates.

use std::ops::ControlFlow;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use sqlparser::ast::{visit_expressions, visit_relations, Expr};
use sqlparser::dialect::{
    AnsiDialect, BigQueryDialect, ClickHouseDialect, Dialect, DuckDbDialect, GenericDialect,
    HiveDialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect, RedshiftSqlDialect,
    SQLiteDialect, SnowflakeDialect,
};
use sqlparser::parser::Parser;

use crate::error::AssertError;
use crate::matchers::MatcherArgs;
use crate::types::GradingResult;

lazy_static! {
    /// Fenced code block, optionally tagged `sql`.
    static ref SQL_FENCE: Regex = Regex::new(r"```(?:sql)?([^`]+)```").unwrap();
}

/// Optional object value for `is-sql` / `contains-sql`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SqlOptions {
    #[serde(default)]
    database: Option<String>,
    #[serde(default)]
    allowed_tables: Option<Vec<String>>,
    #[serde(default)]
    allowed_columns: Option<Vec<String>>,
}

fn dialect_for(name: &str) -> Result<Box<dyn Dialect>, AssertError> {
    let dialect: Box<dyn Dialect> = match name.to_lowercase().as_str() {
        "mysql" => Box::new(MySqlDialect {}),
        "postgresql" | "postgres" => Box::new(PostgreSqlDialect {}),
        "sqlite" => Box::new(SQLiteDialect {}),
        "mssql" | "transactsql" => Box::new(MsSqlDialect {}),
        "bigquery" => Box::new(BigQueryDialect {}),
        "snowflake" => Box::new(SnowflakeDialect {}),
        "hive" => Box::new(HiveDialect {}),
        "redshift" => Box::new(RedshiftSqlDialect {}),
        "clickhouse" => Box::new(ClickHouseDialect {}),
        "duckdb" => Box::new(DuckDbDialect {}),
        "ansi" => Box::new(AnsiDialect {}),
        "generic" => Box::new(GenericDialect {}),
        other => {
            return Err(AssertError::Malformed(format!(
                "is-sql assertion does not recognize database dialect \"{other}\""
            )))
        }
    };
    Ok(dialect)
}

/// Validate that the output parses as SQL in the configured dialect
/// (default MySQL), honoring optional table/column allow-lists.
pub fn is_sql(args: &MatcherArgs) -> Result<GradingResult, AssertError> {
    let options = match args.rendered {
        None | Some(Value::Null) => SqlOptions::default(),
        Some(value @ Value::Object(_)) => serde_json::from_value(value.clone())
            .map_err(|err| AssertError::Malformed(format!("is-sql assertion value: {err}")))?,
        Some(_) => {
            return Err(AssertError::Malformed(
                "is-sql assertion must have an object value".to_string(),
            ))
        }
    };
    let database = options.database.as_deref().unwrap_or("MySQL");
    let dialect = dialect_for(database)?;

    let mut failure_reasons: Vec<String> = Vec::new();
    let mut pass;

    let statements = match Parser::parse_sql(dialect.as_ref(), args.output_text) {
        Ok(statements) => {
            pass = !args.inverse;
            Some(statements)
        }
        Err(_) => {
            pass = args.inverse;
            failure_reasons.push(format!(
                "SQL statement does not conform to the provided {database} database syntax."
            ));
            None
        }
    };

    if let Some(statements) = &statements {
        if let Some(allowed) = &options.allowed_tables {
            for table in referenced_tables(statements) {
                if !allowed.iter().any(|a| a.eq_ignore_ascii_case(&table)) {
                    pass = args.inverse;
                    failure_reasons
                        .push(format!("SQL validation failed: table \"{table}\" is not allowed."));
                }
            }
        }
        if let Some(allowed) = &options.allowed_columns {
            for column in referenced_columns(statements) {
                if !allowed.iter().any(|a| a.eq_ignore_ascii_case(&column)) {
                    pass = args.inverse;
                    failure_reasons.push(format!(
                        "SQL validation failed: column \"{column}\" is not allowed."
                    ));
                }
            }
        }
    }

    if args.inverse && !pass && failure_reasons.is_empty() {
        failure_reasons.push("The output SQL statement is valid".to_string());
    }

    Ok(GradingResult {
        pass,
        score: if pass { 1.0 } else { 0.0 },
        reason: if pass {
            "Assertion passed".to_string()
        } else {
            failure_reasons.join(" ")
        },
        assertion: Some(args.assertion.clone()),
        component_results: None,
        named_scores: None,
    })
}

/// Extract a fenced code block from the output if present, then delegate
/// to [`is_sql`].
pub fn contains_sql(args: &MatcherArgs) -> Result<GradingResult, AssertError> {
    if let Some(captures) = SQL_FENCE.captures(args.output_text) {
        let sql = captures[1].trim().to_string();
        let inner = MatcherArgs {
            output_text: &sql,
            ..*args
        };
        return is_sql(&inner);
    }
    is_sql(args)
}

fn referenced_tables(statements: &[sqlparser::ast::Statement]) -> Vec<String> {
    let mut tables = Vec::new();
    for statement in statements {
        let _ = visit_relations(statement, |relation| {
            if let Some(last) = relation.0.last() {
                let name = last.value.clone();
                if !tables.contains(&name) {
                    tables.push(name);
                }
            }
            ControlFlow::<()>::Continue(())
        });
    }
    tables
}

fn referenced_columns(statements: &[sqlparser::ast::Statement]) -> Vec<String> {
    let mut columns = Vec::new();
    for statement in statements {
        let _ = visit_expressions(statement, |expr| {
            let name = match expr {
                Expr::Identifier(ident) => Some(ident.value.clone()),
                Expr::CompoundIdentifier(parts) => parts.last().map(|p| p.value.clone()),
                _ => None,
            };
            if let Some(name) = name {
                if !columns.contains(&name) {
                    columns.push(name);
                }
            }
            ControlFlow::<()>::Continue(())
        });
    }
    columns
}

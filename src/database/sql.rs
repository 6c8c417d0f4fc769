//! Administrative SQL accepted by [`Store::raw_sql`](super::Store::raw_sql).
//!
//! Only two shapes are understood:
//!
//! - `SELECT 1`: connectivity probe, yields no rows
//! - `SELECT * FROM <table> [WHERE <predicate>] [LIMIT <n>]`
//!
//! The predicate is passed through to the backend untouched.

use std::sync::LazyLock;

use fancy_regex::Regex;

use crate::{ImageSearchError, Result};

static STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)^\s*select\s+(\*|1)(?:\s+from\s+([A-Za-z_][A-Za-z0-9_\-]*))?(?:\s+where\s+(.+?))?(?:\s+limit\s+(\d+))?\s*;?\s*$",
    )
    .expect("statement pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Ping,
    Select {
        table: String,
        predicate: Option<String>,
        limit: Option<usize>,
    },
}

#[inline]
pub fn parse_statement(sql: &str) -> Result<Statement> {
    let unsupported = || ImageSearchError::InvalidQuery(format!("unsupported statement: {sql}"));

    let captures = STATEMENT
        .captures(sql)
        .map_err(|e| ImageSearchError::InvalidQuery(format!("failed to parse statement: {e}")))?
        .ok_or_else(unsupported)?;

    let projection = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    let table = captures.get(2).map(|m| m.as_str().to_string());
    let predicate = captures.get(3).map(|m| m.as_str().trim().to_string());
    let limit = captures
        .get(4)
        .map(|m| {
            m.as_str()
                .parse::<usize>()
                .map_err(|e| ImageSearchError::InvalidQuery(format!("invalid limit: {e}")))
        })
        .transpose()?;

    match (projection, table) {
        ("1", None) if predicate.is_none() && limit.is_none() => Ok(Statement::Ping),
        ("*", Some(table)) => Ok(Statement::Select {
            table,
            predicate,
            limit,
        }),
        _ => Err(unsupported()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping() {
        assert_eq!(parse_statement("SELECT 1").ok(), Some(Statement::Ping));
        assert_eq!(parse_statement("  select 1 ; ").ok(), Some(Statement::Ping));
    }

    #[test]
    fn select_all() {
        assert_eq!(
            parse_statement("SELECT * FROM image_search").ok(),
            Some(Statement::Select {
                table: "image_search".to_string(),
                predicate: None,
                limit: None,
            })
        );
    }

    #[test]
    fn select_with_predicate_and_limit() {
        assert_eq!(
            parse_statement("select * from images where file_name = 'a.jpg' limit 5;").ok(),
            Some(Statement::Select {
                table: "images".to_string(),
                predicate: Some("file_name = 'a.jpg'".to_string()),
                limit: Some(5),
            })
        );
    }

    #[test]
    fn rejects_other_statements() {
        for sql in [
            "DROP TABLE images",
            "SELECT *",
            "SELECT 1 FROM images",
            "DELETE FROM images WHERE 1 = 1",
            "",
        ] {
            assert!(
                matches!(parse_statement(sql), Err(ImageSearchError::InvalidQuery(_))),
                "{sql} should be rejected"
            );
        }
    }
}

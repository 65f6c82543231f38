//! Error types for the SQL crate.

use pgpro_core::DbError;
use pgpro_core::db_error::SQLSTATE_SYNTAX_ERROR;
use regex::Regex;
use sqlparser::parser::ParserError;
use std::sync::LazyLock;
use thiserror::Error;

/// `sqlparser` appends ` at Line: L, Column: C` to located errors.
static LOCATION: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\s*at Line: (\d+), Column: (\d+)\s*$").ok());

/// Source tag for errors raised while tokenizing.
pub const TOKENIZER_FILE: &str = "scan.l";
/// Source tag for errors raised by the grammar.
pub const GRAMMAR_FILE: &str = "gram.y";

/// A query that could not be parsed.
///
/// Carries enough location data to build an ErrorResponse shaped like a
/// native PostgreSQL syntax error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ClassifyError {
    /// Parser message, without the location suffix.
    pub message: String,
    /// Which stage failed: [`TOKENIZER_FILE`] or [`GRAMMAR_FILE`].
    pub file: &'static str,
    /// One-based line of the query where parsing failed.
    pub line: Option<usize>,
    /// One-based character offset into the query where parsing failed.
    pub position: Option<usize>,
    /// The offending line of the query.
    pub context: Option<String>,
}

impl ClassifyError {
    /// Build from a `sqlparser` error on `sql`.
    pub fn from_parser_error(err: &ParserError, sql: &str) -> Self {
        let (raw, file) = match err {
            ParserError::TokenizerError(msg) => (msg.as_str(), TOKENIZER_FILE),
            ParserError::ParserError(msg) => (msg.as_str(), GRAMMAR_FILE),
            ParserError::RecursionLimitExceeded => ("statement is nested too deeply", GRAMMAR_FILE),
        };

        let located = LOCATION.as_ref().and_then(|re| {
            let caps = re.captures(raw)?;
            let line = caps.get(1)?.as_str().parse::<usize>().ok()?;
            let column = caps.get(2)?.as_str().parse::<usize>().ok()?;
            Some((caps.get(0)?.start(), line, column))
        });

        match located {
            Some((cut, line, column)) if line > 0 => Self {
                message: raw[..cut].to_string(),
                file,
                line: Some(line),
                position: Some(char_position(sql, line, column)),
                context: sql.lines().nth(line - 1).map(|l| l.trim_end().to_string()),
            },
            _ => Self {
                message: raw.to_string(),
                file,
                line: None,
                position: None,
                context: None,
            },
        }
    }

    /// The ErrorResponse sent to the client.
    pub fn to_db_error(&self) -> DbError {
        let mut err = DbError::error(SQLSTATE_SYNTAX_ERROR, self.message.clone());
        err.position = self.position.map(|p| p.to_string());
        err.where_ = self.context.clone();
        err.file = Some(self.file.to_string());
        err.line = self.line.map(|l| l.to_string());
        err
    }
}

/// One-based character offset of `line:column` in `sql`.
fn char_position(sql: &str, line: usize, column: usize) -> usize {
    let before: usize = sql
        .split('\n')
        .take(line.saturating_sub(1))
        .map(|l| l.chars().count() + 1)
        .sum();
    let total = sql.chars().count();
    (before + column.max(1)).min(total + 1)
}

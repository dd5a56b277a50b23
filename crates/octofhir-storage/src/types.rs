//! Query types handed from the search engine to an index store.

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// SQL dialect an index store speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    #[default]
    Postgres,
    Sqlite,
}

impl SqlDialect {
    /// Placeholder for the `n`-th (1-based) bound parameter.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Self::Postgres => format!("${n}"),
            Self::Sqlite => format!("?{n}"),
        }
    }

    /// Placeholder for a bound [`SqlValue::Timestamp`].
    ///
    /// SQLite compares timestamps as fixed-width UTC text, so no cast is needed there.
    pub fn timestamp_placeholder(&self, n: usize) -> String {
        match self {
            Self::Postgres => format!("${n}::timestamptz"),
            Self::Sqlite => format!("?{n}"),
        }
    }

    /// Case-insensitive `LIKE` operator.
    pub fn like_ci(&self) -> &'static str {
        match self {
            Self::Postgres => "ILIKE",
            // SQLite LIKE is case-insensitive for ASCII by default
            Self::Sqlite => "LIKE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Some(Self::Postgres),
            "sqlite" => Some(Self::Sqlite),
            _ => None,
        }
    }
}

impl fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Postgres => write!(f, "postgres"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Timestamp(OffsetDateTime),
}

impl SqlValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Timestamp(ts) => write!(f, "'{ts}'"),
        }
    }
}

/// A compiled, parameterized statement.
///
/// Placeholders in `sql` are numbered and refer to `params` by 1-based position.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl IndexQuery {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Number of bound parameters.
    pub fn param_count(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for IndexQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.sql)?;
        for (i, param) in self.params.iter().enumerate() {
            writeln!(f, "  -- {} = {param}", i + 1)?;
        }
        Ok(())
    }
}

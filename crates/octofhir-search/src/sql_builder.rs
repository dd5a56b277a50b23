//! SQL builder for index-table searches.
//!
//! Every search parameter compiles to one correlated `EXISTS` (or `NOT EXISTS`) subquery
//! against `search_index`, AND-ed at the outer level over `resources r`:
//!
//! ```text
//! SELECT r.id FROM resources r
//! WHERE r.resource_type = $1
//!   AND EXISTS (SELECT 1 FROM search_index si1 WHERE <scope> AND (<value> OR <value>))
//!   AND ...
//! ORDER BY r.last_updated DESC, r.id ASC
//! LIMIT $n OFFSET $m
//! ```
//!
//! Chains and `_has` wrap the terminal subquery one level per link. All literals are bound.

use octofhir_storage::{IndexQuery, SqlDialect, SqlValue};
use std::fmt;
use thiserror::Error;

use crate::chaining;
use crate::include;
use crate::parser::{ChainLink, ParsedParameter, ParsedQuery};
use crate::reverse_chaining;
use crate::types;

/// Maximum number of predicates one query may compile to.
pub const MAX_CONDITIONS: usize = 100;

/// Errors that can occur during SQL building.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SqlBuilderError {
    #[error("Invalid modifier '{0}' for parameter type")]
    InvalidModifier(String),

    #[error("Invalid search value: {0}")]
    InvalidSearchValue(String),

    #[error("Query too complex: {0}")]
    QueryTooComplex(String),
}

/// Accumulates bound parameters and fresh table aliases for one statement.
#[derive(Debug)]
pub struct SqlBuilder {
    dialect: SqlDialect,
    params: Vec<SqlValue>,
    aliases: usize,
    predicates: usize,
}

impl SqlBuilder {
    pub fn new(dialect: SqlDialect) -> Self {
        Self::with_params(dialect, Vec::new())
    }

    /// Continue numbering after `params`, which the statement also binds.
    pub fn with_params(dialect: SqlDialect, params: Vec<SqlValue>) -> Self {
        Self {
            dialect,
            params,
            aliases: 0,
            predicates: 0,
        }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    /// Bind a value and return its placeholder.
    pub fn bind(&mut self, value: SqlValue) -> String {
        let is_timestamp = matches!(value, SqlValue::Timestamp(_));
        self.params.push(value);
        let n = self.params.len();
        if is_timestamp {
            self.dialect.timestamp_placeholder(n)
        } else {
            self.dialect.placeholder(n)
        }
    }

    pub fn bind_text(&mut self, value: impl Into<String>) -> String {
        self.bind(SqlValue::Text(value.into()))
    }

    /// Bind every value and return a parenthesized placeholder list.
    pub fn bind_list<I, S>(&mut self, values: I) -> String
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let placeholders: Vec<String> = values.into_iter().map(|v| self.bind_text(v)).collect();
        if placeholders.is_empty() {
            "(NULL)".to_string()
        } else {
            format!("({})", placeholders.join(", "))
        }
    }

    pub fn next_alias(&mut self, prefix: &str) -> String {
        self.aliases += 1;
        format!("{prefix}{}", self.aliases)
    }

    /// Count one more predicate against [`MAX_CONDITIONS`].
    pub fn count_predicate(&mut self) -> Result<(), SqlBuilderError> {
        self.predicates += 1;
        if self.predicates > MAX_CONDITIONS {
            return Err(SqlBuilderError::QueryTooComplex(format!(
                "more than {MAX_CONDITIONS} predicates"
            )));
        }
        Ok(())
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    pub fn into_params(self) -> Vec<SqlValue> {
        self.params
    }

    /// Case-insensitive LIKE against `column` with an escaped pattern.
    pub fn like_ci(&mut self, column: &str, pattern: String) -> String {
        let like = self.dialect.like_ci();
        let p = self.bind_text(pattern);
        format!("{column} {like} {p} ESCAPE '\\'")
    }

    /// Case-sensitive "ends with" test on a text column.
    pub fn ends_with(&mut self, column: &str, suffix: &str) -> String {
        match self.dialect {
            SqlDialect::Postgres => {
                let p = self.bind_text(format!("%{}", escape_like_pattern(suffix)));
                format!("{column} LIKE {p} ESCAPE '\\'")
            }
            // LIKE folds ASCII case in SQLite; GLOB does not
            SqlDialect::Sqlite => {
                let p = self.bind_text(format!("*{}", escape_glob_pattern(suffix)));
                format!("{column} GLOB {p}")
            }
        }
    }
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
pub fn escape_like_pattern(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Escape `*`, `?` and `[` for a SQLite `GLOB` pattern.
pub fn escape_glob_pattern(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '*' | '?' | '[' => {
                escaped.push('[');
                escaped.push(c);
                escaped.push(']');
            }
            _ => escaped.push(c),
        }
    }
    escaped
}

/// OR-combine predicates into one parenthesized group.
pub fn build_or_clause(conditions: Vec<String>) -> String {
    match conditions.len() {
        0 => "FALSE".to_string(),
        1 => conditions.into_iter().next().unwrap_or_default(),
        _ => format!("({})", conditions.join(" OR ")),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    LastUpdated,
    Id,
}

impl SortKey {
    fn column(self) -> &'static str {
        match self {
            Self::LastUpdated => "r.last_updated",
            Self::Id => "r.id",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub key: SortKey,
    pub descending: bool,
}

fn order_by(sort: &[SortSpec]) -> String {
    let default = [SortSpec {
        key: SortKey::LastUpdated,
        descending: true,
    }];
    let sort = if sort.is_empty() { &default[..] } else { sort };

    let mut terms: Vec<String> = sort
        .iter()
        .map(|s| {
            let direction = if s.descending { "DESC" } else { "ASC" };
            format!("{} {direction}", s.key.column())
        })
        .collect();
    if sort.last().map(|s| s.key) != Some(SortKey::Id) {
        terms.push("r.id ASC".to_string());
    }
    terms.join(", ")
}

/// The statements one search runs.
#[derive(Debug, Clone)]
pub struct BuiltSearch {
    /// Ids of the requested page.
    pub page: IndexQuery,
    /// Total number of matches, ignoring paging.
    pub count: IndexQuery,
    /// One `(resource_type, id)` query per `_include`/`_revinclude`.
    pub includes: Vec<IndexQuery>,
}

impl fmt::Display for BuiltSearch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "-- page\n{}", self.page)?;
        write!(f, "-- count\n{}", self.count)?;
        for (i, include) in self.includes.iter().enumerate() {
            write!(f, "\n-- include {}\n{}", i + 1, include)?;
        }
        Ok(())
    }
}

/// Compile a parsed query into page, count and include statements.
pub fn build_search(
    dialect: SqlDialect,
    query: &ParsedQuery,
    limit: u32,
    offset: u32,
) -> Result<BuiltSearch, SqlBuilderError> {
    let mut builder = SqlBuilder::new(dialect);
    let rt = builder.bind_text(&query.resource_type);
    let mut clauses = vec![format!("r.resource_type = {rt}")];
    for param in &query.params {
        clauses.push(compile_parameter(&mut builder, "r", param)?);
    }
    let where_clause = clauses.join(" AND ");

    let count = IndexQuery::new(
        format!("SELECT COUNT(*) FROM resources r WHERE {where_clause}"),
        builder.params().to_vec(),
    );

    let l = builder.bind(SqlValue::Integer(i64::from(limit)));
    let o = builder.bind(SqlValue::Integer(i64::from(offset)));
    let page = IndexQuery::new(
        format!(
            "SELECT r.id FROM resources r WHERE {where_clause} ORDER BY {} LIMIT {l} OFFSET {o}",
            order_by(&query.control.sort)
        ),
        builder.into_params(),
    );

    let includes = query
        .control
        .includes
        .iter()
        .map(|directive| include::build_include_query(dialect, &query.resource_type, directive, &page))
        .collect();

    Ok(BuiltSearch {
        page,
        count,
        includes,
    })
}

/// Compile one parameter, correlated with the resource row aliased `outer`.
pub fn compile_parameter(
    builder: &mut SqlBuilder,
    outer: &str,
    param: &ParsedParameter,
) -> Result<String, SqlBuilderError> {
    compile_links(builder, outer, &param.chain, param)
}

fn compile_links(
    builder: &mut SqlBuilder,
    outer: &str,
    links: &[ChainLink],
    param: &ParsedParameter,
) -> Result<String, SqlBuilderError> {
    builder.count_predicate()?;
    match links.split_first() {
        None => types::compile_terminal(builder, outer, param),
        Some((ChainLink::Forward { param: name, target_types }, rest)) => {
            let target = builder.next_alias("t");
            let inner = compile_links(builder, &target, rest, param)?;
            Ok(chaining::forward_exists(builder, outer, name, target_types, &target, &inner))
        }
        Some((
            ChainLink::Reverse {
                source_type,
                reference_param,
            },
            rest,
        )) => {
            let source = builder.next_alias("src");
            let inner = compile_links(builder, &source, rest, param)?;
            Ok(reverse_chaining::reverse_exists(
                builder,
                outer,
                source_type,
                reference_param,
                &source,
                &inner,
            ))
        }
    }
}

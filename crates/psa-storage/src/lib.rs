//! Table-store collaborator for PSA: query model, store trait and backends.

mod postgres;
mod rest;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

pub use postgres::PgTableStore;
pub use rest::{
    classify_reqwest_error, classify_status, BackoffPolicy, RestStoreConfig, RestTableStore,
    RetryDisposition,
};

pub const CRATE_NAME: &str = "psa-storage";

/// One raw record as stored in a source table.
pub type Row = serde_json::Map<String, JsonValue>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Predicate {
    Eq { column: String, value: String },
    ILike { column: String, pattern: String },
    Gte { column: String, value: f64 },
    Lte { column: String, value: f64 },
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Case-insensitive "column contains needle"; LIKE metacharacters in `needle` are escaped.
    pub fn contains(column: impl Into<String>, needle: &str) -> Self {
        Self::ILike {
            column: column.into(),
            pattern: format!("%{}%", escape_like(needle)),
        }
    }

    pub fn gte(column: impl Into<String>, value: f64) -> Self {
        Self::Gte {
            column: column.into(),
            value,
        }
    }

    pub fn lte(column: impl Into<String>, value: f64) -> Self {
        Self::Lte {
            column: column.into(),
            value,
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Predicate::Eq { column, .. }
            | Predicate::ILike { column, .. }
            | Predicate::Gte { column, .. }
            | Predicate::Lte { column, .. } => column,
        }
    }
}

pub fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// Disjunction of conjunctions. A filter with no groups matches every row.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Filter {
    groups: Vec<Vec<Predicate>>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches rows satisfying at least one of `predicates`.
    pub fn any_of(predicates: impl IntoIterator<Item = Predicate>) -> Self {
        Self {
            groups: predicates.into_iter().map(|p| vec![p]).collect(),
        }
    }

    /// Conjoins `predicate` with every group.
    pub fn and(mut self, predicate: Predicate) -> Self {
        if self.groups.is_empty() {
            self.groups.push(vec![predicate]);
        } else {
            for group in &mut self.groups {
                group.push(predicate.clone());
            }
        }
        self
    }

    pub fn matches_all(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> &[Vec<Predicate>] {
        &self.groups
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.groups.is_empty()
            || self
                .groups
                .iter()
                .any(|group| group.iter().all(|p| predicate_matches(p, row)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableQuery {
    pub table: String,
    pub filter: Filter,
    pub order: Option<OrderBy>,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl TableQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filter: Filter::all(),
            order: None,
            limit: None,
            offset: 0,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some(OrderBy {
            column: column.into(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }
}

/// A page of rows plus the exact number of rows matching the filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TablePage {
    pub rows: Vec<Row>,
    pub count: u64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unknown table `{0}`")]
    UnknownTable(String),
    #[error("http status {status} querying `{table}`")]
    HttpStatus { status: u16, table: String },
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("unexpected response shape: {0}")]
    Decode(String),
    #[error("store misconfigured: {0}")]
    Config(String),
}

/// Queryable table store reachable by table name.
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn query(&self, query: &TableQuery) -> Result<TablePage, StoreError>;
}

/// Textual rendering of a column value as a database would produce for `column::text`.
pub fn value_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// Numeric reading of a column: numbers as-is, strings read from the first digit on, keeping
/// digits and dots.
pub fn value_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => {
            let digits: String = s
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .filter(|c| c.is_ascii_digit() || *c == '.')
                .collect();
            digits.trim_end_matches('.').parse::<f64>().ok().filter(|v| v.is_finite())
        }
        _ => None,
    }
}

fn predicate_matches(predicate: &Predicate, row: &Row) -> bool {
    let Some(value) = row.get(predicate.column()) else {
        return false;
    };
    match predicate {
        Predicate::Eq { value: expected, .. } => value_text(value).as_deref() == Some(expected.as_str()),
        Predicate::ILike { pattern, .. } => value_text(value).is_some_and(|text| like_matches(pattern, &text)),
        Predicate::Gte { value: bound, .. } => value_number(value).is_some_and(|v| v >= *bound),
        Predicate::Lte { value: bound, .. } => value_number(value).is_some_and(|v| v <= *bound),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum LikeToken {
    Any,
    One,
    Lit(char),
}

fn like_tokens(pattern: &str) -> Vec<LikeToken> {
    let mut out = Vec::new();
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '%' => out.push(LikeToken::Any),
            '_' => out.push(LikeToken::One),
            '\\' => out.push(LikeToken::Lit(chars.next().unwrap_or('\\'))),
            c => out.push(LikeToken::Lit(c)),
        }
    }
    out
}

/// Case-insensitive SQL `LIKE` with `%`, `_` and backslash escapes.
pub fn like_matches(pattern: &str, text: &str) -> bool {
    let pat = like_tokens(&pattern.to_lowercase());
    let txt: Vec<char> = text.to_lowercase().chars().collect();
    let (mut p, mut t) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < txt.len() {
        match pat.get(p) {
            Some(LikeToken::Any) => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(LikeToken::One) => {
                p += 1;
                t += 1;
            }
            Some(LikeToken::Lit(c)) if *c == txt[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    backtrack = Some((star_p, star_t + 1));
                }
                None => return false,
            },
        }
    }
    while matches!(pat.get(p), Some(LikeToken::Any)) {
        p += 1;
    }
    p == pat.len()
}

fn compare_column(a: Option<&JsonValue>, b: Option<&JsonValue>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => match (value_number(a), value_number(b)) {
            (Some(x), Some(y)) if !a.is_string() || !b.is_string() => x.total_cmp(&y),
            _ => value_text(a).cmp(&value_text(b)),
        },
    }
}

/// In-process table store backed by JSON rows. Used for fixtures, demos and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryTableStore {
    tables: HashMap<String, Vec<Row>>,
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: impl Into<String>, rows: Vec<Row>) -> Self {
        self.insert_table(table, rows);
        self
    }

    pub fn insert_table(&mut self, table: impl Into<String>, rows: Vec<Row>) {
        self.tables.insert(table.into(), rows);
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names = self.tables.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }

    /// Loads every `<table>.json` file (a JSON array of objects) in `dir`.
    pub fn from_fixtures_dir(dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = dir.as_ref();
        let mut store = Self::new();
        let entries = fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(table) = path.file_stem().and_then(|s| s.to_str()).map(ToString::to_string) else {
                continue;
            };
            let text = fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
            let values: Vec<JsonValue> =
                serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
            let rows = values
                .into_iter()
                .filter_map(|v| match v {
                    JsonValue::Object(map) => Some(map),
                    _ => None,
                })
                .collect::<Vec<_>>();
            tracing::debug!(table = %table, rows = rows.len(), "loaded fixture table");
            store.insert_table(table, rows);
        }
        Ok(store)
    }
}

#[async_trait]
impl TableStore for MemoryTableStore {
    async fn query(&self, query: &TableQuery) -> Result<TablePage, StoreError> {
        let rows = self
            .tables
            .get(&query.table)
            .ok_or_else(|| StoreError::UnknownTable(query.table.clone()))?;

        let mut matched = rows.iter().filter(|row| query.filter.matches(row)).collect::<Vec<_>>();
        let count = matched.len() as u64;

        if let Some(order) = &query.order {
            matched.sort_by(|a, b| {
                let ord = compare_column(a.get(&order.column), b.get(&order.column));
                if order.ascending {
                    ord
                } else {
                    ord.reverse()
                }
            });
        }

        let rows = matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(TablePage { rows, count })
    }
}

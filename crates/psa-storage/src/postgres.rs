//! Direct Postgres table store over sqlx.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row as _};

use crate::{Filter, Predicate, StoreError, TablePage, TableQuery, TableStore};

#[derive(Debug, Clone)]
pub struct PgTableStore {
    pool: PgPool,
}

impl PgTableStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl TableStore for PgTableStore {
    async fn query(&self, query: &TableQuery) -> Result<TablePage, StoreError> {
        let mut page_sql = page_query(query);
        let mut count_sql = count_query(query);

        let rows = page_sql.build().fetch_all(&self.pool).await?;
        let total: i64 = count_sql.build().fetch_one(&self.pool).await?.try_get("total")?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            match row.try_get::<JsonValue, _>("row")? {
                JsonValue::Object(map) => out.push(map),
                other => {
                    return Err(StoreError::Decode(format!(
                        "row_to_json produced a non-object value: {other}"
                    )))
                }
            }
        }
        Ok(TablePage {
            rows: out,
            count: total.max(0) as u64,
        })
    }
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn numeric_expr(column: &str) -> String {
    format!(
        "NULLIF(regexp_replace(t.{}::text, '[^0-9.]', '', 'g'), '')::float8",
        quote_ident(column)
    )
}

fn page_query(query: &TableQuery) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT row_to_json(t) AS row FROM ");
    qb.push(quote_ident(&query.table));
    qb.push(" t");
    push_filter(&mut qb, &query.filter);
    if let Some(order) = &query.order {
        qb.push(format!(
            " ORDER BY t.{} {} NULLS LAST",
            quote_ident(&order.column),
            if order.ascending { "ASC" } else { "DESC" }
        ));
    }
    if let Some(limit) = query.limit {
        qb.push(" LIMIT ");
        qb.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    if query.offset > 0 {
        qb.push(" OFFSET ");
        qb.push_bind(i64::try_from(query.offset).unwrap_or(i64::MAX));
    }
    qb
}

fn count_query(query: &TableQuery) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT COUNT(*) AS total FROM ");
    qb.push(quote_ident(&query.table));
    qb.push(" t");
    push_filter(&mut qb, &query.filter);
    qb
}

fn push_filter(qb: &mut QueryBuilder<'static, Postgres>, filter: &Filter) {
    if filter.matches_all() {
        return;
    }
    qb.push(" WHERE ");
    for (gi, group) in filter.groups().iter().enumerate() {
        if gi > 0 {
            qb.push(" OR ");
        }
        qb.push("(");
        for (pi, predicate) in group.iter().enumerate() {
            if pi > 0 {
                qb.push(" AND ");
            }
            push_predicate(qb, predicate);
        }
        qb.push(")");
    }
}

fn push_predicate(qb: &mut QueryBuilder<'static, Postgres>, predicate: &Predicate) {
    match predicate {
        Predicate::Eq { column, value } => {
            qb.push(format!("t.{}::text = ", quote_ident(column)));
            qb.push_bind(value.clone());
        }
        Predicate::ILike { column, pattern } => {
            qb.push(format!("t.{}::text ILIKE ", quote_ident(column)));
            qb.push_bind(pattern.clone());
        }
        Predicate::Gte { column, value } => {
            qb.push(format!("{} >= ", numeric_expr(column)));
            qb.push_bind(*value);
        }
        Predicate::Lte { column, value } => {
            qb.push(format!("{} <= ", numeric_expr(column)));
            qb.push_bind(*value);
        }
    }
}

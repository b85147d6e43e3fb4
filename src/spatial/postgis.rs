use super::{quote_ident, RowStream, SpatialStore};
use crate::datasets::BoundingBox;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, TryStreamExt};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::fmt::{self, Debug, Formatter};

/// Rows fetched per round trip while streaming a page.
const ROW_STREAM_CHUNK: i64 = 256;

pub struct PostgisStore {
    pool: PgPool,
    geometry_column: String,
}

/// Paging windows must be stable across requests. Without a primary key to
/// order by, fall back to the first column rather than letting the planner
/// pick an arbitrary row order.
fn order_clause(order_by: Option<&str>) -> String {
    match order_by {
        Some(col) => format!("ORDER BY {}", quote_ident(col)),
        None => "ORDER BY 1".to_string(),
    }
}

impl Debug for PostgisStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgisStore")
            .field("geometry_column", &self.geometry_column)
            .finish()
    }
}

impl PostgisStore {
    pub async fn new(connection_string: &str, geometry_column: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(connection_string)
            .await?;
        Ok(Self {
            pool,
            geometry_column: geometry_column.to_string(),
        })
    }

    pub fn from_pool(pool: PgPool, geometry_column: &str) -> Self {
        Self {
            pool,
            geometry_column: geometry_column.to_string(),
        }
    }
}

#[async_trait]
impl SpatialStore for PostgisStore {
    async fn extent(&self, table: &str) -> Result<Option<BoundingBox>> {
        let sql = format!(
            "SELECT ST_XMin(e)::float8, ST_YMin(e)::float8,
                    ST_XMax(e)::float8, ST_YMax(e)::float8
             FROM (SELECT ST_Extent({geom}) AS e FROM {table}) s
             WHERE e IS NOT NULL",
            geom = quote_ident(&self.geometry_column),
            table = quote_ident(table),
        );

        let row: Option<(f64, f64, f64, f64)> =
            sqlx::query_as(&sql).fetch_optional(&self.pool).await?;

        Ok(row.map(|(xmin, ymin, xmax, ymax)| BoundingBox {
            xmin,
            ymin,
            xmax,
            ymax,
        }))
    }

    async fn primary_key_column(&self, table: &str) -> Result<Option<String>> {
        // to_regclass returns NULL for a missing relation, which falls out as
        // "no primary key" rather than a query error.
        let column: Option<String> = sqlx::query_scalar(
            "SELECT a.attname
             FROM pg_index i
             JOIN pg_attribute a
               ON a.attrelid = i.indrelid AND a.attnum = ANY(i.indkey)
             WHERE i.indrelid = to_regclass($1) AND i.indisprimary
             ORDER BY a.attnum
             LIMIT 1",
        )
        .bind(table)
        .fetch_optional(&self.pool)
        .await?;

        Ok(column)
    }

    async fn row_page(
        &self,
        table: &str,
        order_by: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<RowStream> {
        let order_clause = order_clause(order_by);
        let sql = format!(
            "SELECT row_to_json(t)::text
             FROM (SELECT * FROM {table} {order} OFFSET $1 LIMIT $2) t",
            table = quote_ident(table),
            order = order_clause,
        );
        let pool = self.pool.clone();

        // Chunked cursor: each round trip fetches at most ROW_STREAM_CHUNK
        // rows, so the page is streamed without materializing it.
        let chunks = stream::try_unfold(
            (offset, limit),
            move |(next_offset, remaining)| {
                let pool = pool.clone();
                let sql = sql.clone();
                async move {
                    if remaining <= 0 {
                        return Ok::<Option<(_, (i64, i64))>, sqlx::Error>(None);
                    }
                    let take = remaining.min(ROW_STREAM_CHUNK);
                    let rows: Vec<String> = sqlx::query_scalar(&sql)
                        .bind(next_offset)
                        .bind(take)
                        .fetch_all(&pool)
                        .await?;
                    if rows.is_empty() {
                        return Ok(None);
                    }
                    let n = rows.len() as i64;
                    Ok(Some((
                        stream::iter(rows.into_iter().map(Ok)),
                        (next_offset + n, remaining - n),
                    )))
                }
            },
        )
        .try_flatten();

        Ok(Box::pin(chunks))
    }

    async fn features(
        &self,
        table: &str,
        bbox: Option<&BoundingBox>,
    ) -> Result<Vec<serde_json::Value>> {
        let geom = quote_ident(&self.geometry_column);
        let mut sql = format!(
            "SELECT json_build_object(
                 'type', 'Feature',
                 'geometry', ST_AsGeoJSON({geom})::json,
                 'properties', to_jsonb(t.*) - '{geom_name}'
             )::text
             FROM {table} t",
            geom = geom,
            geom_name = self.geometry_column.replace('\'', "''"),
            table = quote_ident(table),
        );
        if bbox.is_some() {
            sql.push_str(&format!(
                " WHERE {} && ST_MakeEnvelope($1, $2, $3, $4, 4326)",
                geom
            ));
        }

        let mut query = sqlx::query(&sql);
        if let Some(b) = bbox {
            query = query
                .bind(b.xmin)
                .bind(b.ymin)
                .bind(b.xmax)
                .bind(b.ymax);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                let text: String = row.try_get(0)?;
                Ok(serde_json::from_str(&text)?)
            })
            .collect()
    }

    async fn tile(
        &self,
        table: &str,
        primary_key_column: &str,
        z: u32,
        x: u32,
        y: u32,
    ) -> Result<Option<Vec<u8>>> {
        let bytes: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT get_dataset_tile($1, $2, $3, $4, $5)")
                .bind(table)
                .bind(primary_key_column)
                .bind(z as i32)
                .bind(x as i32)
                .bind(y as i32)
                .fetch_one(&self.pool)
                .await?;

        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_clause_quotes_the_key_column() {
        assert_eq!(order_clause(Some("ogc_fid")), "ORDER BY \"ogc_fid\"");
    }

    #[test]
    fn order_clause_falls_back_to_the_first_column() {
        assert_eq!(order_clause(None), "ORDER BY 1");
    }
}

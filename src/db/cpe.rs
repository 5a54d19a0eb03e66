//! CPE dictionary storage.

use crate::error::DatabaseError;
use crate::models::{Cpe, CpeNameParts, CpeReference, CpeTitle};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection};
use std::collections::HashMap;
use uuid::Uuid;

use super::search::cpe_search_bindings;
use super::{
    ConflictPolicy, Database, ItemFilter, ItemStore, STREAM_BATCH_SIZE, count_to_u64, tag_item,
    version_key,
};

/// Bind order: time window (1-4), limit and offset (5-6), CPE name components
/// (7-17), version keys for `>`, `>=`, `<`, `<=` (18-21), deprecated (22)
const COUNT_CPES: &str = r#"
    SELECT COUNT(*) FROM (
        SELECT 1
        FROM cpes
        LEFT JOIN cpe_name_parts p ON p.cpe_name_id = cpes.cpe_name_id
        WHERE (?1 IS NULL OR cpes.last_modified >= ?1)
          AND (?2 IS NULL OR cpes.last_modified <= ?2)
          AND (?3 IS NULL OR cpes.created >= ?3)
          AND (?4 IS NULL OR cpes.created <= ?4)
          AND (?7 IS NULL OR p.part = ?7)
          AND (?8 IS NULL OR p.vendor = ?8)
          AND (?9 IS NULL OR p.product = ?9)
          AND (?10 IS NULL OR p.version = ?10)
          AND (?11 IS NULL OR p."update" = ?11)
          AND (?12 IS NULL OR p.edition = ?12)
          AND (?13 IS NULL OR p.language = ?13)
          AND (?14 IS NULL OR p.sw_edition = ?14)
          AND (?15 IS NULL OR p.target_sw = ?15)
          AND (?16 IS NULL OR p.target_hw = ?16)
          AND (?17 IS NULL OR p.other = ?17)
          AND (?18 IS NULL OR p.version_key > ?18)
          AND (?19 IS NULL OR p.version_key >= ?19)
          AND (?20 IS NULL OR p.version_key < ?20)
          AND (?21 IS NULL OR p.version_key <= ?21)
          AND (?22 IS NULL OR cpes.deprecated = ?22)
        ORDER BY cpes.cpe_name_id
        LIMIT ?5 OFFSET ?6
    )
"#;

const SELECT_CPES: &str = r#"
    SELECT cpes.cpe_name_id, cpes.cpe_name, cpes.deprecated, cpes.created, cpes.last_modified
    FROM cpes
    LEFT JOIN cpe_name_parts p ON p.cpe_name_id = cpes.cpe_name_id
    WHERE (?1 IS NULL OR cpes.last_modified >= ?1)
      AND (?2 IS NULL OR cpes.last_modified <= ?2)
      AND (?3 IS NULL OR cpes.created >= ?3)
      AND (?4 IS NULL OR cpes.created <= ?4)
      AND (?7 IS NULL OR p.part = ?7)
      AND (?8 IS NULL OR p.vendor = ?8)
      AND (?9 IS NULL OR p.product = ?9)
      AND (?10 IS NULL OR p.version = ?10)
      AND (?11 IS NULL OR p."update" = ?11)
      AND (?12 IS NULL OR p.edition = ?12)
      AND (?13 IS NULL OR p.language = ?13)
      AND (?14 IS NULL OR p.sw_edition = ?14)
      AND (?15 IS NULL OR p.target_sw = ?15)
      AND (?16 IS NULL OR p.target_hw = ?16)
      AND (?17 IS NULL OR p.other = ?17)
      AND (?18 IS NULL OR p.version_key > ?18)
      AND (?19 IS NULL OR p.version_key >= ?19)
      AND (?20 IS NULL OR p.version_key < ?20)
      AND (?21 IS NULL OR p.version_key <= ?21)
      AND (?22 IS NULL OR cpes.deprecated = ?22)
    ORDER BY cpes.cpe_name_id
    LIMIT ?5 OFFSET ?6
"#;

const INSERT_NAME_PARTS: &str = r#"
    INSERT INTO cpe_name_parts (
        cpe_name_id, part, vendor, product, version, "update", edition,
        language, sw_edition, target_sw, target_hw, other, version_key
    ) "#;

#[derive(Debug, Clone, FromRow)]
struct CpeRow {
    cpe_name_id: Uuid,
    cpe_name: String,
    deprecated: bool,
    created: NaiveDateTime,
    last_modified: NaiveDateTime,
}

#[derive(Debug, FromRow)]
struct TitleRow {
    cpe_name_id: Uuid,
    title: String,
    lang: String,
}

#[derive(Debug, FromRow)]
struct RefRow {
    cpe_name_id: Uuid,
    #[sqlx(rename = "ref")]
    url: String,
    ref_type: Option<String>,
}

fn write_failed(table: &'static str, e: impl std::fmt::Display) -> Error {
    Error::Database(DatabaseError::WriteFailed {
        table,
        reason: e.to_string(),
    })
}

fn load_failed(what: &str, e: sqlx::Error) -> Error {
    Error::Database(DatabaseError::QueryFailed(format!(
        "Failed to load {}: {}",
        what, e
    )))
}

impl Database {
    async fn upsert_cpe(
        conn: &mut SqliteConnection,
        cpe: &Cpe,
        policy: ConflictPolicy,
    ) -> Result<bool> {
        let sql = match policy {
            ConflictPolicy::Update => {
                r#"
                INSERT INTO cpes (cpe_name_id, cpe_name, deprecated, created, last_modified)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(cpe_name_id) DO UPDATE SET
                    cpe_name = excluded.cpe_name,
                    deprecated = excluded.deprecated,
                    created = excluded.created,
                    last_modified = excluded.last_modified
                "#
            }
            ConflictPolicy::Skip => {
                r#"
                INSERT INTO cpes (cpe_name_id, cpe_name, deprecated, created, last_modified)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(cpe_name_id) DO NOTHING
                "#
            }
        };

        let result = sqlx::query(sql)
            .bind(cpe.cpe_name_id)
            .bind(&cpe.cpe_name)
            .bind(cpe.deprecated)
            .bind(cpe.created)
            .bind(cpe.last_modified)
            .execute(&mut *conn)
            .await
            .map_err(|e| write_failed("cpes", e))?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        if policy == ConflictPolicy::Update {
            for table in ["cpe_name_parts", "cpe_titles", "cpe_refs"] {
                sqlx::query(&format!("DELETE FROM {} WHERE cpe_name_id = ?", table))
                    .bind(cpe.cpe_name_id)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| write_failed(table, e))?;
            }
        }

        Self::insert_cpe_name_parts(conn, cpe).await?;

        if !cpe.titles.is_empty() {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO cpe_titles (cpe_name_id, position, title, lang) ",
            );
            builder.push_values(cpe.titles.iter().enumerate(), |mut b, (i, t)| {
                b.push_bind(cpe.cpe_name_id)
                    .push_bind(i as i64)
                    .push_bind(&t.title)
                    .push_bind(&t.lang);
            });
            builder
                .build()
                .execute(&mut *conn)
                .await
                .map_err(|e| write_failed("cpe_titles", e))?;
        }

        if !cpe.refs.is_empty() {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO cpe_refs (cpe_name_id, position, ref, ref_type) ",
            );
            builder.push_values(cpe.refs.iter().enumerate(), |mut b, (i, r)| {
                b.push_bind(cpe.cpe_name_id)
                    .push_bind(i as i64)
                    .push_bind(&r.url)
                    .push_bind(&r.ref_type);
            });
            builder
                .build()
                .execute(&mut *conn)
                .await
                .map_err(|e| write_failed("cpe_refs", e))?;
        }

        Ok(true)
    }

    /// Store the searchable components of the CPE's name
    ///
    /// Names that are not CPE 2.3 formatted strings are stored without parts
    /// and never match a name or version search.
    async fn insert_cpe_name_parts(conn: &mut SqliteConnection, cpe: &Cpe) -> Result<()> {
        let Some(parts) = CpeNameParts::parse(&cpe.cpe_name) else {
            tracing::debug!(cpe_name = %cpe.cpe_name, "CPE name is not searchable");
            return Ok(());
        };

        let mut builder = QueryBuilder::<Sqlite>::new(INSERT_NAME_PARTS);
        builder.push_values(std::iter::once(&parts), |mut b, parts| {
            b.push_bind(cpe.cpe_name_id);
            for component in parts.components() {
                b.push_bind(component.as_str());
            }
            b.push_bind(version_key(parts.version()));
        });
        builder
            .build()
            .execute(&mut *conn)
            .await
            .map_err(|e| write_failed("cpe_name_parts", e))?;
        Ok(())
    }

    async fn attach_cpe_children(&self, rows: Vec<CpeRow>) -> Result<Vec<Cpe>> {
        let mut titles: HashMap<Uuid, Vec<CpeTitle>> = HashMap::new();
        let mut refs: HashMap<Uuid, Vec<CpeReference>> = HashMap::new();

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT cpe_name_id, title, lang FROM cpe_titles WHERE cpe_name_id IN (",
        );
        let mut ids = builder.separated(", ");
        for row in &rows {
            ids.push_bind(row.cpe_name_id);
        }
        ids.push_unseparated(") ORDER BY cpe_name_id, position");
        let title_rows: Vec<TitleRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| load_failed("CPE titles", e))?;
        for row in title_rows {
            titles.entry(row.cpe_name_id).or_default().push(CpeTitle {
                title: row.title,
                lang: row.lang,
            });
        }

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT cpe_name_id, ref, ref_type FROM cpe_refs WHERE cpe_name_id IN (",
        );
        let mut ids = builder.separated(", ");
        for row in &rows {
            ids.push_bind(row.cpe_name_id);
        }
        ids.push_unseparated(") ORDER BY cpe_name_id, position");
        let ref_rows: Vec<RefRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| load_failed("CPE references", e))?;
        for row in ref_rows {
            refs.entry(row.cpe_name_id).or_default().push(CpeReference {
                url: row.url,
                ref_type: row.ref_type,
            });
        }

        Ok(rows
            .into_iter()
            .map(|row| Cpe {
                titles: titles.remove(&row.cpe_name_id).unwrap_or_default(),
                refs: refs.remove(&row.cpe_name_id).unwrap_or_default(),
                cpe_name_id: row.cpe_name_id,
                cpe_name: row.cpe_name,
                deprecated: row.deprecated,
                created: row.created,
                last_modified: row.last_modified,
            })
            .collect())
    }
}

#[async_trait]
impl ItemStore<Cpe> for Database {
    async fn upsert(&self, items: &[Cpe], policy: ConflictPolicy) -> Result<u64> {
        if items.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(|e| write_failed("cpes", e))?;
        let mut written = 0;
        for cpe in items {
            let stored = Self::upsert_cpe(&mut tx, cpe, policy)
                .await
                .map_err(|e| tag_item(e, cpe))?;
            if stored {
                written += 1;
            }
        }
        tx.commit().await.map_err(|e| write_failed("cpes", e))?;

        tracing::debug!(written, batch = items.len(), "stored CPEs");
        Ok(written)
    }

    async fn count(&self, filter: &ItemFilter) -> Result<u64> {
        let mut query = sqlx::query_scalar::<_, i64>(COUNT_CPES)
            .bind(filter.last_modified_start)
            .bind(filter.last_modified_end)
            .bind(filter.created_start)
            .bind(filter.created_end)
            .bind(filter.sql_limit())
            .bind(filter.sql_offset());
        for value in cpe_search_bindings(filter)? {
            query = query.bind(value);
        }

        let count = query
            .bind(filter.deprecated)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count CPEs: {}",
                    e
                )))
            })?;

        Ok(count_to_u64(count))
    }

    fn stream<'a>(&'a self, filter: &ItemFilter) -> BoxStream<'a, Result<Cpe>> {
        let search = match cpe_search_bindings(filter) {
            Ok(values) => values,
            Err(e) => return stream::once(future::ready(Err(e))).boxed(),
        };

        let mut query = sqlx::query_as::<_, CpeRow>(SELECT_CPES)
            .bind(filter.last_modified_start)
            .bind(filter.last_modified_end)
            .bind(filter.created_start)
            .bind(filter.created_end)
            .bind(filter.sql_limit())
            .bind(filter.sql_offset());
        for value in search {
            query = query.bind(value);
        }

        query
            .bind(filter.deprecated)
            .fetch(&self.pool)
            .map_err(Error::from)
            .try_chunks(STREAM_BATCH_SIZE)
            .map_err(|e| e.1)
            .and_then(move |rows| self.attach_cpe_children(rows))
            .map_ok(|cpes| stream::iter(cpes.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }
}

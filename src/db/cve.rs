//! CVE storage.

use crate::error::DatabaseError;
use crate::models::{Cve, CveDescription, CveReference};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection};
use std::collections::HashMap;

use super::search::keyword_patterns;
use super::{
    ConflictPolicy, Database, ItemFilter, ItemStore, STREAM_BATCH_SIZE, count_to_u64, tag_item,
};

/// Bind order: time window (1-4), limit and offset (5-6), source identifier
/// (7), exclude rejected (8), JSON array of keyword patterns (9)
const COUNT_CVES: &str = r#"
    SELECT COUNT(*) FROM (
        SELECT 1
        FROM cves
        WHERE (?1 IS NULL OR last_modified >= ?1)
          AND (?2 IS NULL OR last_modified <= ?2)
          AND (?3 IS NULL OR published >= ?3)
          AND (?4 IS NULL OR published <= ?4)
          AND (?7 IS NULL OR source_identifier = ?7)
          AND (?8 = 0 OR vuln_status != 'Rejected')
          AND NOT EXISTS (
              SELECT 1 FROM json_each(?9) AS k
              WHERE NOT EXISTS (
                  SELECT 1 FROM cve_descriptions d
                  WHERE d.cve_id = cves.id
                    AND (d.value LIKE (k.value || '%') ESCAPE '\'
                         OR d.value LIKE ('% ' || k.value || '%') ESCAPE '\')
              )
          )
        ORDER BY id
        LIMIT ?5 OFFSET ?6
    )
"#;

const SELECT_CVES: &str = r#"
    SELECT id, source_identifier, published, last_modified, vuln_status
    FROM cves
    WHERE (?1 IS NULL OR last_modified >= ?1)
      AND (?2 IS NULL OR last_modified <= ?2)
      AND (?3 IS NULL OR published >= ?3)
      AND (?4 IS NULL OR published <= ?4)
      AND (?7 IS NULL OR source_identifier = ?7)
      AND (?8 = 0 OR vuln_status != 'Rejected')
      AND NOT EXISTS (
          SELECT 1 FROM json_each(?9) AS k
          WHERE NOT EXISTS (
              SELECT 1 FROM cve_descriptions d
              WHERE d.cve_id = cves.id
                AND (d.value LIKE (k.value || '%') ESCAPE '\'
                     OR d.value LIKE ('% ' || k.value || '%') ESCAPE '\')
          )
      )
    ORDER BY id
    LIMIT ?5 OFFSET ?6
"#;

/// CVE row from database
#[derive(Debug, Clone, FromRow)]
struct CveRow {
    id: String,
    source_identifier: String,
    published: NaiveDateTime,
    last_modified: NaiveDateTime,
    vuln_status: String,
}

#[derive(Debug, FromRow)]
struct DescriptionRow {
    cve_id: String,
    lang: String,
    value: String,
}

#[derive(Debug, FromRow)]
struct ReferenceRow {
    cve_id: String,
    url: String,
    source: Option<String>,
    tags: String,
}

fn write_failed(table: &'static str, e: impl std::fmt::Display) -> Error {
    Error::Database(DatabaseError::WriteFailed {
        table,
        reason: e.to_string(),
    })
}

impl Database {
    /// Insert or update one CVE, returning whether a row was written
    async fn upsert_cve(
        conn: &mut SqliteConnection,
        cve: &Cve,
        policy: ConflictPolicy,
    ) -> Result<bool> {
        let sql = match policy {
            ConflictPolicy::Update => {
                r#"
                INSERT INTO cves (id, source_identifier, published, last_modified, vuln_status)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    source_identifier = excluded.source_identifier,
                    published = excluded.published,
                    last_modified = excluded.last_modified,
                    vuln_status = excluded.vuln_status
                "#
            }
            ConflictPolicy::Skip => {
                r#"
                INSERT INTO cves (id, source_identifier, published, last_modified, vuln_status)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(id) DO NOTHING
                "#
            }
        };

        let result = sqlx::query(sql)
            .bind(&cve.id)
            .bind(&cve.source_identifier)
            .bind(cve.published)
            .bind(cve.last_modified)
            .bind(&cve.vuln_status)
            .execute(&mut *conn)
            .await
            .map_err(|e| write_failed("cves", e))?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        if policy == ConflictPolicy::Update {
            sqlx::query("DELETE FROM cve_descriptions WHERE cve_id = ?")
                .bind(&cve.id)
                .execute(&mut *conn)
                .await
                .map_err(|e| write_failed("cve_descriptions", e))?;
            sqlx::query("DELETE FROM cve_references WHERE cve_id = ?")
                .bind(&cve.id)
                .execute(&mut *conn)
                .await
                .map_err(|e| write_failed("cve_references", e))?;
        }

        if !cve.descriptions.is_empty() {
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO cve_descriptions (cve_id, position, lang, value) ",
            );
            builder.push_values(cve.descriptions.iter().enumerate(), |mut b, (i, d)| {
                b.push_bind(&cve.id)
                    .push_bind(i as i64)
                    .push_bind(&d.lang)
                    .push_bind(&d.value);
            });
            builder
                .build()
                .execute(&mut *conn)
                .await
                .map_err(|e| write_failed("cve_descriptions", e))?;
        }

        // SQLite default SQLITE_MAX_VARIABLE_NUMBER is 999; each reference uses 5
        const MAX_REFERENCES_PER_INSERT: usize = 190;

        for (batch_index, batch) in cve.references.chunks(MAX_REFERENCES_PER_INSERT).enumerate() {
            let offset = batch_index * MAX_REFERENCES_PER_INSERT;
            let mut rows = Vec::with_capacity(batch.len());
            for (i, reference) in batch.iter().enumerate() {
                rows.push((offset + i, reference, serde_json::to_string(&reference.tags)?));
            }

            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO cve_references (cve_id, position, url, source, tags) ",
            );
            builder.push_values(rows, |mut b, (position, r, tags)| {
                b.push_bind(&cve.id)
                    .push_bind(position as i64)
                    .push_bind(&r.url)
                    .push_bind(&r.source)
                    .push_bind(tags);
            });
            builder
                .build()
                .execute(&mut *conn)
                .await
                .map_err(|e| write_failed("cve_references", e))?;
        }

        Ok(true)
    }

    /// Load descriptions and references for a batch of CVE rows
    async fn attach_cve_children(&self, rows: Vec<CveRow>) -> Result<Vec<Cve>> {
        let mut descriptions: HashMap<String, Vec<CveDescription>> = HashMap::new();
        let mut references: HashMap<String, Vec<CveReference>> = HashMap::new();

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT cve_id, lang, value FROM cve_descriptions WHERE cve_id IN (",
        );
        let mut ids = builder.separated(", ");
        for row in &rows {
            ids.push_bind(row.id.clone());
        }
        ids.push_unseparated(") ORDER BY cve_id, position");
        let description_rows: Vec<DescriptionRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to load CVE descriptions: {}",
                    e
                )))
            })?;
        for row in description_rows {
            descriptions.entry(row.cve_id).or_default().push(CveDescription {
                lang: row.lang,
                value: row.value,
            });
        }

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT cve_id, url, source, tags FROM cve_references WHERE cve_id IN (",
        );
        let mut ids = builder.separated(", ");
        for row in &rows {
            ids.push_bind(row.id.clone());
        }
        ids.push_unseparated(") ORDER BY cve_id, position");
        let reference_rows: Vec<ReferenceRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to load CVE references: {}",
                    e
                )))
            })?;
        for row in reference_rows {
            let tags: Vec<String> = serde_json::from_str(&row.tags).map_err(|e| {
                Error::InvalidItem(format!(
                    "CVE {} has malformed reference tags: {}",
                    row.cve_id, e
                ))
            })?;
            references.entry(row.cve_id).or_default().push(CveReference {
                url: row.url,
                source: row.source,
                tags,
            });
        }

        Ok(rows
            .into_iter()
            .map(|row| Cve {
                descriptions: descriptions.remove(&row.id).unwrap_or_default(),
                references: references.remove(&row.id).unwrap_or_default(),
                id: row.id,
                source_identifier: row.source_identifier,
                published: row.published,
                last_modified: row.last_modified,
                vuln_status: row.vuln_status,
            })
            .collect())
    }
}

#[async_trait]
impl ItemStore<Cve> for Database {
    async fn upsert(&self, items: &[Cve], policy: ConflictPolicy) -> Result<u64> {
        if items.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(|e| write_failed("cves", e))?;
        let mut written = 0;
        for cve in items {
            let stored = Self::upsert_cve(&mut tx, cve, policy)
                .await
                .map_err(|e| tag_item(e, cve))?;
            if stored {
                written += 1;
            }
        }
        tx.commit().await.map_err(|e| write_failed("cves", e))?;

        tracing::debug!(written, batch = items.len(), "stored CVEs");
        Ok(written)
    }

    async fn count(&self, filter: &ItemFilter) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(COUNT_CVES)
            .bind(filter.last_modified_start)
            .bind(filter.last_modified_end)
            .bind(filter.created_start)
            .bind(filter.created_end)
            .bind(filter.sql_limit())
            .bind(filter.sql_offset())
            .bind(filter.source_identifier.as_deref())
            .bind(filter.exclude_rejected)
            .bind(keyword_patterns(&filter.keywords)?)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count CVEs: {}",
                    e
                )))
            })?;

        Ok(count_to_u64(count))
    }

    fn stream<'a>(&'a self, filter: &ItemFilter) -> BoxStream<'a, Result<Cve>> {
        let keywords = match keyword_patterns(&filter.keywords) {
            Ok(patterns) => patterns,
            Err(e) => return stream::once(future::ready(Err(e))).boxed(),
        };

        sqlx::query_as::<_, CveRow>(SELECT_CVES)
            .bind(filter.last_modified_start)
            .bind(filter.last_modified_end)
            .bind(filter.created_start)
            .bind(filter.created_end)
            .bind(filter.sql_limit())
            .bind(filter.sql_offset())
            .bind(filter.source_identifier.clone())
            .bind(filter.exclude_rejected)
            .bind(keywords)
            .fetch(&self.pool)
            .map_err(Error::from)
            .try_chunks(STREAM_BATCH_SIZE)
            .map_err(|e| e.1)
            .and_then(move |rows| self.attach_cve_children(rows))
            .map_ok(|cves| stream::iter(cves.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }
}

//! CPE match string storage.

use crate::error::DatabaseError;
use crate::models::{CpeMatch, CpeMatchString};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection};
use std::collections::HashMap;
use uuid::Uuid;

use super::{
    ConflictPolicy, Database, ItemFilter, ItemStore, STREAM_BATCH_SIZE, count_to_u64, tag_item,
};

const COUNT_MATCH_STRINGS: &str = r#"
    SELECT COUNT(*) FROM (
        SELECT 1 FROM cpe_match_strings
        WHERE (?1 IS NULL OR last_modified >= ?1)
          AND (?2 IS NULL OR last_modified <= ?2)
          AND (?3 IS NULL OR created >= ?3)
          AND (?4 IS NULL OR created <= ?4)
        ORDER BY match_criteria_id
        LIMIT ?5 OFFSET ?6
    )
"#;

const SELECT_MATCH_STRINGS: &str = r#"
    SELECT match_criteria_id, criteria, status, cpe_last_modified, created, last_modified,
           version_start_including, version_start_excluding,
           version_end_including, version_end_excluding
    FROM cpe_match_strings
    WHERE (?1 IS NULL OR last_modified >= ?1)
      AND (?2 IS NULL OR last_modified <= ?2)
      AND (?3 IS NULL OR created >= ?3)
      AND (?4 IS NULL OR created <= ?4)
    ORDER BY match_criteria_id
    LIMIT ?5 OFFSET ?6
"#;

/// CPE match string row from database
#[derive(Debug, Clone, FromRow)]
struct MatchStringRow {
    match_criteria_id: Uuid,
    criteria: String,
    status: String,
    cpe_last_modified: Option<NaiveDateTime>,
    created: NaiveDateTime,
    last_modified: NaiveDateTime,
    version_start_including: Option<String>,
    version_start_excluding: Option<String>,
    version_end_including: Option<String>,
    version_end_excluding: Option<String>,
}

#[derive(Debug, FromRow)]
struct MatchRow {
    match_criteria_id: Uuid,
    cpe_name: String,
    cpe_name_id: Uuid,
}

fn write_failed(table: &'static str, e: impl std::fmt::Display) -> Error {
    Error::Database(DatabaseError::WriteFailed {
        table,
        reason: e.to_string(),
    })
}

impl Database {
    /// Insert or update one match string and its matched CPE names
    async fn upsert_match_string(
        conn: &mut SqliteConnection,
        item: &CpeMatchString,
        policy: ConflictPolicy,
    ) -> Result<bool> {
        let conflict_clause = match policy {
            ConflictPolicy::Update => {
                r#"
                ON CONFLICT(match_criteria_id) DO UPDATE SET
                    criteria = excluded.criteria,
                    status = excluded.status,
                    cpe_last_modified = excluded.cpe_last_modified,
                    created = excluded.created,
                    last_modified = excluded.last_modified,
                    version_start_including = excluded.version_start_including,
                    version_start_excluding = excluded.version_start_excluding,
                    version_end_including = excluded.version_end_including,
                    version_end_excluding = excluded.version_end_excluding
                "#
            }
            ConflictPolicy::Skip => "ON CONFLICT(match_criteria_id) DO NOTHING",
        };

        let sql = format!(
            r#"
            INSERT INTO cpe_match_strings (
                match_criteria_id, criteria, status, cpe_last_modified, created, last_modified,
                version_start_including, version_start_excluding,
                version_end_including, version_end_excluding
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            {}
            "#,
            conflict_clause
        );

        let result = sqlx::query(&sql)
            .bind(item.match_criteria_id)
            .bind(&item.criteria)
            .bind(&item.status)
            .bind(item.cpe_last_modified)
            .bind(item.created)
            .bind(item.last_modified)
            .bind(&item.version_start_including)
            .bind(&item.version_start_excluding)
            .bind(&item.version_end_including)
            .bind(&item.version_end_excluding)
            .execute(&mut *conn)
            .await
            .map_err(|e| write_failed("cpe_match_strings", e))?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        if policy == ConflictPolicy::Update {
            sqlx::query("DELETE FROM cpe_match_string_matches WHERE match_criteria_id = ?")
                .bind(item.match_criteria_id)
                .execute(&mut *conn)
                .await
                .map_err(|e| write_failed("cpe_match_string_matches", e))?;
        }

        // SQLite default SQLITE_MAX_VARIABLE_NUMBER is 999; each match uses 4
        const MAX_MATCHES_PER_INSERT: usize = 240;

        for (batch_index, batch) in item.matches.chunks(MAX_MATCHES_PER_INSERT).enumerate() {
            let offset = batch_index * MAX_MATCHES_PER_INSERT;
            let mut builder = QueryBuilder::<Sqlite>::new(
                "INSERT INTO cpe_match_string_matches \
                 (match_criteria_id, position, cpe_name, cpe_name_id) ",
            );
            builder.push_values(batch.iter().enumerate(), |mut b, (i, m)| {
                b.push_bind(item.match_criteria_id)
                    .push_bind((offset + i) as i64)
                    .push_bind(&m.cpe_name)
                    .push_bind(m.cpe_name_id);
            });
            builder
                .build()
                .execute(&mut *conn)
                .await
                .map_err(|e| write_failed("cpe_match_string_matches", e))?;
        }

        Ok(true)
    }

    /// Load matched CPE names for a batch of match string rows
    async fn attach_matches(&self, rows: Vec<MatchStringRow>) -> Result<Vec<CpeMatchString>> {
        let mut matches: HashMap<Uuid, Vec<CpeMatch>> = HashMap::new();

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT match_criteria_id, cpe_name, cpe_name_id FROM cpe_match_string_matches \
             WHERE match_criteria_id IN (",
        );
        let mut ids = builder.separated(", ");
        for row in &rows {
            ids.push_bind(row.match_criteria_id);
        }
        ids.push_unseparated(") ORDER BY match_criteria_id, position");

        let match_rows: Vec<MatchRow> = builder
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to load CPE matches: {}",
                    e
                )))
            })?;
        for row in match_rows {
            matches.entry(row.match_criteria_id).or_default().push(CpeMatch {
                cpe_name: row.cpe_name,
                cpe_name_id: row.cpe_name_id,
            });
        }

        Ok(rows
            .into_iter()
            .map(|row| CpeMatchString {
                matches: matches.remove(&row.match_criteria_id).unwrap_or_default(),
                match_criteria_id: row.match_criteria_id,
                criteria: row.criteria,
                status: row.status,
                cpe_last_modified: row.cpe_last_modified,
                created: row.created,
                last_modified: row.last_modified,
                version_start_including: row.version_start_including,
                version_start_excluding: row.version_start_excluding,
                version_end_including: row.version_end_including,
                version_end_excluding: row.version_end_excluding,
            })
            .collect())
    }
}

#[async_trait]
impl ItemStore<CpeMatchString> for Database {
    async fn upsert(&self, items: &[CpeMatchString], policy: ConflictPolicy) -> Result<u64> {
        if items.is_empty() {
            return Ok(0);
        }

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| write_failed("cpe_match_strings", e))?;
        let mut written = 0;
        for item in items {
            let stored = Self::upsert_match_string(&mut tx, item, policy)
                .await
                .map_err(|e| tag_item(e, item))?;
            if stored {
                written += 1;
            }
        }
        tx.commit()
            .await
            .map_err(|e| write_failed("cpe_match_strings", e))?;

        tracing::debug!(written, batch = items.len(), "stored CPE match strings");
        Ok(written)
    }

    async fn count(&self, filter: &ItemFilter) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(COUNT_MATCH_STRINGS)
            .bind(filter.last_modified_start)
            .bind(filter.last_modified_end)
            .bind(filter.created_start)
            .bind(filter.created_end)
            .bind(filter.sql_limit())
            .bind(filter.sql_offset())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count CPE match strings: {}",
                    e
                )))
            })?;

        Ok(count_to_u64(count))
    }

    fn stream<'a>(&'a self, filter: &ItemFilter) -> BoxStream<'a, Result<CpeMatchString>> {
        sqlx::query_as::<_, MatchStringRow>(SELECT_MATCH_STRINGS)
            .bind(filter.last_modified_start)
            .bind(filter.last_modified_end)
            .bind(filter.created_start)
            .bind(filter.created_end)
            .bind(filter.sql_limit())
            .bind(filter.sql_offset())
            .fetch(&self.pool)
            .map_err(Error::from)
            .try_chunks(STREAM_BATCH_SIZE)
            .map_err(|e| e.1)
            .and_then(move |rows| self.attach_matches(rows))
            .map_ok(|items| stream::iter(items.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }
}

//! DocumentStore implementation for SQLite.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{ErrorCode, OptionalExtension, Row, params, params_from_iter};
use serde_json::Value;

use crate::core::DocumentStore;
use crate::error::{BackendError, ConcurrencyError, ResourceError, StorageError, StorageResult};
use crate::types::query::json_path;
use crate::types::{DocumentQuery, Filter, SortOrder, StoredDocument, UniqueKey};

use super::SqliteBackend;

fn internal_error(message: String) -> StorageError {
    StorageError::Backend(BackendError::Internal {
        backend_name: "sqlite".to_string(),
        message,
        source: None,
    })
}

fn serialization_error(message: String) -> StorageError {
    StorageError::Backend(BackendError::SerializationError { message })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| serialization_error(format!("Invalid timestamp '{}': {}", raw, e)))
}

/// Raw columns of a `documents` row.
struct DocumentRow {
    id: String,
    version: i64,
    data: String,
    created_at: String,
    last_modified: String,
}

impl DocumentRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            version: row.get(1)?,
            data: row.get(2)?,
            created_at: row.get(3)?,
            last_modified: row.get(4)?,
        })
    }

    fn into_document(self, collection: &str) -> StorageResult<StoredDocument> {
        let content: Value = serde_json::from_str(&self.data)
            .map_err(|e| serialization_error(format!("Failed to parse document: {}", e)))?;
        Ok(StoredDocument::from_storage(
            collection,
            self.id,
            self.version as u64,
            content,
            parse_timestamp(&self.created_at)?,
            parse_timestamp(&self.last_modified)?,
        ))
    }
}

/// Maps a JSON scalar onto the value `json_extract` yields for it.
fn sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Escapes LIKE wildcards in a user-supplied needle.
fn like_pattern(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len() + 2);
    escaped.push('%');
    for c in needle.to_lowercase().chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

/// Builds the WHERE clause and its parameters for a query.
fn where_clause(query: &DocumentQuery) -> (String, Vec<SqlValue>) {
    let mut clauses = vec!["collection = ?".to_string()];
    let mut params = vec![SqlValue::Text(query.collection.clone())];

    for filter in &query.filters {
        match filter {
            Filter::Eq { field, value } if value.is_null() => {
                clauses.push("json_extract(data, ?) IS NULL".to_string());
                params.push(SqlValue::Text(json_path(field)));
            }
            Filter::Eq { field, value } => {
                clauses.push("json_extract(data, ?) = ?".to_string());
                params.push(SqlValue::Text(json_path(field)));
                params.push(sql_value(value));
            }
            Filter::In { values, .. } if values.is_empty() => {
                clauses.push("0".to_string());
            }
            Filter::In { field, values } => {
                let placeholders = vec!["?"; values.len()].join(", ");
                clauses.push(format!("json_extract(data, ?) IN ({})", placeholders));
                params.push(SqlValue::Text(json_path(field)));
                params.extend(values.iter().map(sql_value));
            }
            Filter::Contains { fields, needle } => {
                let pattern = like_pattern(needle);
                let alternatives: Vec<&str> = fields
                    .iter()
                    .map(|_| "LOWER(json_extract(data, ?)) LIKE ? ESCAPE '\\'")
                    .collect();
                if alternatives.is_empty() {
                    clauses.push("0".to_string());
                } else {
                    clauses.push(format!("({})", alternatives.join(" OR ")));
                }
                for field in fields {
                    params.push(SqlValue::Text(json_path(field)));
                    params.push(SqlValue::Text(pattern.clone()));
                }
            }
        }
    }

    (clauses.join(" AND "), params)
}

impl SqliteBackend {
    fn current_version(&self, collection: &str, id: &str) -> StorageResult<Option<u64>> {
        let conn = self.get_connection()?;
        conn.query_row(
            "SELECT version FROM documents WHERE collection = ?1 AND id = ?2",
            params![collection, id],
            |row| row.get::<_, i64>(0),
        )
        .optional()
        .map(|v| v.map(|v| v as u64))
        .map_err(|e| internal_error(format!("Failed to read version: {}", e)))
    }
}

#[async_trait]
impl DocumentStore for SqliteBackend {
    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn create(
        &self,
        collection: &str,
        id: &str,
        content: Value,
        unique_keys: Vec<UniqueKey>,
    ) -> StorageResult<StoredDocument> {
        let mut conn = self.get_connection()?;
        let data = serde_json::to_string(&content)
            .map_err(|e| serialization_error(format!("Failed to serialize document: {}", e)))?;
        let now = Utc::now();
        let now_str = format_timestamp(now);

        let tx = conn
            .transaction()
            .map_err(|e| internal_error(format!("Failed to begin transaction: {}", e)))?;

        tx.execute(
            "INSERT INTO documents (collection, id, version, data, created_at, last_modified)
             VALUES (?1, ?2, 1, ?3, ?4, ?4)",
            params![collection, id, data, now_str],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                StorageError::Resource(ResourceError::AlreadyExists {
                    collection: collection.to_string(),
                    id: id.to_string(),
                })
            } else {
                internal_error(format!("Failed to insert document: {}", e))
            }
        })?;

        for key in &unique_keys {
            tx.execute(
                "INSERT INTO unique_keys (namespace, value, collection, document_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![key.namespace(), key.value(), collection, id],
            )
            .map_err(|e| {
                if is_constraint_violation(&e) {
                    StorageError::Resource(ResourceError::Duplicate {
                        collection: collection.to_string(),
                        key: key.to_string(),
                    })
                } else {
                    internal_error(format!("Failed to reserve unique key: {}", e))
                }
            })?;
        }

        tx.commit()
            .map_err(|e| internal_error(format!("Failed to commit transaction: {}", e)))?;

        Ok(StoredDocument::from_storage(
            collection, id, 1, content, now, now,
        ))
    }

    async fn read(&self, collection: &str, id: &str) -> StorageResult<Option<StoredDocument>> {
        let row = {
            let conn = self.get_connection()?;
            conn.query_row(
                "SELECT id, version, data, created_at, last_modified
                 FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
                DocumentRow::from_row,
            )
            .optional()
            .map_err(|e| internal_error(format!("Failed to read document: {}", e)))?
        };

        row.map(|row| row.into_document(collection)).transpose()
    }

    async fn update(
        &self,
        current: &StoredDocument,
        content: Value,
    ) -> StorageResult<StoredDocument> {
        let data = serde_json::to_string(&content)
            .map_err(|e| serialization_error(format!("Failed to serialize document: {}", e)))?;
        let now = Utc::now();

        let changed = {
            let conn = self.get_connection()?;
            conn.execute(
                "UPDATE documents SET version = version + 1, data = ?1, last_modified = ?2
                 WHERE collection = ?3 AND id = ?4 AND version = ?5",
                params![
                    data,
                    format_timestamp(now),
                    current.collection(),
                    current.id(),
                    current.version() as i64
                ],
            )
            .map_err(|e| internal_error(format!("Failed to update document: {}", e)))?
        };

        if changed == 0 {
            return Err(
                match self.current_version(current.collection(), current.id())? {
                    None => StorageError::Resource(ResourceError::NotFound {
                        collection: current.collection().to_string(),
                        id: current.id().to_string(),
                    }),
                    Some(actual_version) => {
                        StorageError::Concurrency(ConcurrencyError::VersionConflict {
                            collection: current.collection().to_string(),
                            id: current.id().to_string(),
                            expected_version: current.version(),
                            actual_version,
                        })
                    }
                },
            );
        }

        Ok(StoredDocument::from_storage(
            current.collection(),
            current.id(),
            current.version() + 1,
            content,
            current.created_at(),
            now,
        ))
    }

    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        content: Value,
    ) -> StorageResult<StoredDocument> {
        let data = serde_json::to_string(&content)
            .map_err(|e| serialization_error(format!("Failed to serialize document: {}", e)))?;
        let now = Utc::now();

        let (version, created_at): (i64, String) = {
            let conn = self.get_connection()?;
            conn.query_row(
                "INSERT INTO documents (collection, id, version, data, created_at, last_modified)
                 VALUES (?1, ?2, 1, ?3, ?4, ?4)
                 ON CONFLICT(collection, id) DO UPDATE SET
                    version = version + 1,
                    data = excluded.data,
                    last_modified = excluded.last_modified
                 RETURNING version, created_at",
                params![collection, id, data, format_timestamp(now)],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(|e| internal_error(format!("Failed to upsert document: {}", e)))?
        };

        Ok(StoredDocument::from_storage(
            collection,
            id,
            version as u64,
            content,
            parse_timestamp(&created_at)?,
            now,
        ))
    }

    async fn delete(&self, collection: &str, id: &str) -> StorageResult<()> {
        let mut conn = self.get_connection()?;
        let tx = conn
            .transaction()
            .map_err(|e| internal_error(format!("Failed to begin transaction: {}", e)))?;

        let removed = tx
            .execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                params![collection, id],
            )
            .map_err(|e| internal_error(format!("Failed to delete document: {}", e)))?;

        if removed == 0 {
            return Err(StorageError::Resource(ResourceError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            }));
        }

        tx.execute(
            "DELETE FROM unique_keys WHERE collection = ?1 AND document_id = ?2",
            params![collection, id],
        )
        .map_err(|e| internal_error(format!("Failed to release unique keys: {}", e)))?;

        tx.commit()
            .map_err(|e| internal_error(format!("Failed to commit transaction: {}", e)))?;

        Ok(())
    }

    async fn find(&self, query: &DocumentQuery) -> StorageResult<Vec<StoredDocument>> {
        let (clause, mut params) = where_clause(query);
        let order = match query.sort {
            SortOrder::CreatedAsc => "created_at ASC, rowid ASC",
            SortOrder::CreatedDesc => "created_at DESC, rowid DESC",
        };
        let mut sql = format!(
            "SELECT id, version, data, created_at, last_modified FROM documents WHERE {} ORDER BY {}",
            clause, order
        );
        if let Some(page) = query.pagination {
            sql.push_str(" LIMIT ? OFFSET ?");
            params.push(SqlValue::Integer(page.count as i64));
            params.push(SqlValue::Integer(page.offset as i64));
        }

        let rows = {
            let conn = self.get_connection()?;
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| internal_error(format!("Failed to prepare query: {}", e)))?;
            let mapped = stmt
                .query_map(params_from_iter(params.iter()), DocumentRow::from_row)
                .map_err(|e| internal_error(format!("Failed to run query: {}", e)))?;
            mapped
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| internal_error(format!("Failed to read row: {}", e)))?
        };

        rows.into_iter()
            .map(|row| row.into_document(&query.collection))
            .collect()
    }

    async fn count(&self, query: &DocumentQuery) -> StorageResult<u64> {
        let (clause, params) = where_clause(query);
        let sql = format!("SELECT COUNT(*) FROM documents WHERE {}", clause);

        let conn = self.get_connection()?;
        let count: i64 = conn
            .query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))
            .map_err(|e| internal_error(format!("Failed to count documents: {}", e)))?;

        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("Ab_c%"), "%ab\\_c\\%%");
    }

    #[test]
    fn test_where_clause_null_and_empty_in() {
        let query = DocumentQuery::new("users")
            .with_eq("deleted_at", Value::Null)
            .with_in("role", Vec::<String>::new());
        let (clause, params) = where_clause(&query);
        assert_eq!(
            clause,
            "collection = ? AND json_extract(data, ?) IS NULL AND 0"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_sql_value_bool() {
        assert_eq!(sql_value(&json!(true)), SqlValue::Integer(1));
        assert_eq!(sql_value(&json!("x")), SqlValue::Text("x".to_string()));
    }
}

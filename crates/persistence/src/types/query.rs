//! Query types for indexed document lookups.
//!
//! A [`DocumentQuery`] selects documents of one collection by a conjunction of
//! [`Filter`]s over JSON fields. Field names may be dotted paths into nested
//! objects (e.g. `"payment.status"`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single predicate over a document field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Field equals the value. A `Value::Null` matches missing or null fields.
    Eq {
        /// Field path.
        field: String,
        /// Expected value.
        value: Value,
    },

    /// Field equals any of the values.
    In {
        /// Field path.
        field: String,
        /// Accepted values.
        values: Vec<Value>,
    },

    /// Case-insensitive substring match on any of the fields.
    Contains {
        /// Field paths searched.
        fields: Vec<String>,
        /// Substring to look for.
        needle: String,
    },
}

/// Result ordering by creation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    /// Oldest first.
    #[default]
    CreatedAsc,
    /// Newest first.
    CreatedDesc,
}

/// Limit/offset pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of results to return.
    pub count: u32,
    /// Number of results to skip.
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            count: 20,
            offset: 0,
        }
    }
}

impl Pagination {
    /// Creates pagination for the first page with the given size.
    pub fn new(count: u32) -> Self {
        Self { count, offset: 0 }
    }

    /// Creates pagination for a 1-based page number.
    pub fn page(page: u32, count: u32) -> Self {
        Self {
            count,
            offset: page.saturating_sub(1).saturating_mul(count),
        }
    }
}

/// A lookup over one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentQuery {
    /// The collection to search.
    pub collection: String,
    /// Filters, all of which must match.
    pub filters: Vec<Filter>,
    /// Ordering of results.
    pub sort: SortOrder,
    /// Optional pagination. Without it all matches are returned.
    pub pagination: Option<Pagination>,
}

impl DocumentQuery {
    /// Creates a query matching every document of the collection.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            sort: SortOrder::default(),
            pagination: None,
        }
    }

    /// Adds an equality filter.
    pub fn with_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Adds a membership filter.
    pub fn with_in<V: Into<Value>>(
        mut self,
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.filters.push(Filter::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Adds a case-insensitive substring filter across several fields.
    pub fn with_contains(mut self, fields: Vec<&str>, needle: impl Into<String>) -> Self {
        self.filters.push(Filter::Contains {
            fields: fields.into_iter().map(String::from).collect(),
            needle: needle.into(),
        });
        self
    }

    /// Sets the sort order.
    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }

    /// Sets pagination.
    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }
}

/// Converts a dotted field path into a SQLite JSON path (`a.b` -> `$.a.b`).
pub(crate) fn json_path(field: &str) -> String {
    format!("$.{}", field)
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_builder() {
        let query = DocumentQuery::new("users")
            .with_eq("role", "patient")
            .with_in("status", vec!["pending", "approved"])
            .with_sort(SortOrder::CreatedDesc)
            .with_pagination(Pagination::page(2, 10));

        assert_eq!(query.filters.len(), 2);
        assert_eq!(query.sort, SortOrder::CreatedDesc);
        assert_eq!(query.pagination.unwrap().offset, 10);
    }

    #[test]
    fn test_json_path() {
        assert_eq!(json_path("payment.status"), "$.payment.status");
    }
}

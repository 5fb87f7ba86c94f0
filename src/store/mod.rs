//! Document store gateway.
//!
//! The [`DocumentStore`] trait is the only way the ingestion and query paths
//! touch persistence. Operations are scoped to a named collection inside the
//! database the store was opened on.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`get_indexes`](DocumentStore::get_indexes) | List indexes on a collection |
//! | [`create_index`](DocumentStore::create_index) | Create a named compound index |
//! | [`insert_many`](DocumentStore::insert_many) | Bulk insert, all or nothing |
//! | [`insert_one`](DocumentStore::insert_one) | Insert a single document |
//! | [`find`](DocumentStore::find) | Filter, sort, skip, limit, project |
//! | [`count`](DocumentStore::count) | Count documents matching a filter |
//!
//! # Filter semantics
//!
//! A [`Filter`] is a map of field to value and every entry must match. A
//! scalar matches a field equal to it or an array field containing it;
//! `null` matches a null or missing field; arrays and objects match by exact
//! equality.

pub mod sqlite;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::models::Document;

pub use sqlite::SqliteDocumentStore;

/// Equality filter: field name to required value.
pub type Filter = Map<String, Value>;

/// Direction of a sort or index key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "i32")]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_i32(self) -> i32 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }

    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1 => Some(SortDirection::Ascending),
            -1 => Some(SortDirection::Descending),
            _ => None,
        }
    }
}

impl From<SortDirection> for i32 {
    fn from(direction: SortDirection) -> Self {
        direction.as_i32()
    }
}

/// Ordered `(field, direction)` pairs. Earlier pairs take precedence.
pub type SortKeys = Vec<(String, SortDirection)>;

/// An index as reported by [`DocumentStore::get_indexes`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexInfo {
    pub name: String,
    pub key: SortKeys,
}

/// Which fields a query returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Return only these fields.
    Include(Vec<String>),
    /// Return everything except these fields.
    Exclude(Vec<String>),
}

impl Projection {
    pub fn exclude<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection::Exclude(fields.into_iter().map(Into::into).collect())
    }

    /// Applies the projection to a document in place.
    pub fn apply(&self, doc: &mut Document) {
        match self {
            Projection::Include(fields) => doc.retain(|k, _| fields.iter().any(|f| f == k)),
            Projection::Exclude(fields) => {
                for field in fields {
                    doc.shift_remove(field);
                }
            }
        }
    }
}

/// Options for [`DocumentStore::find`], applied in a fixed order: filter,
/// sort, skip, limit, projection.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub filter: Filter,
    pub sort: SortKeys,
    pub skip: u64,
    pub limit: Option<u64>,
    pub projection: Option<Projection>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_sort(mut self, sort: SortKeys) -> Self {
        self.sort = sort;
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }
}

/// Collection-scoped access to a document database.
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// request handler in the process.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// List the indexes currently defined on a collection.
    async fn get_indexes(&self, collection: &str) -> Result<Vec<IndexInfo>>;

    /// Create a named index over `keys` and return its name.
    ///
    /// Creating an index that already exists with the same keys is a no-op.
    async fn create_index(&self, collection: &str, keys: &SortKeys, name: &str)
        -> Result<String>;

    /// Insert every document or none. Returns the assigned ids in input order.
    async fn insert_many(&self, collection: &str, documents: Vec<Document>)
        -> Result<Vec<String>>;

    /// Insert a single document and return its id.
    async fn insert_one(&self, collection: &str, document: Document) -> Result<String>;

    /// Run a query. An empty result is not an error.
    async fn find(&self, collection: &str, options: &FindOptions) -> Result<Vec<Document>>;

    /// Count documents matching `filter`, with the same semantics as [`find`](Self::find).
    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64>;
}

/// Checks a database or collection name before it is spliced into SQL.
pub(crate) fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        bail!(
            "invalid {} name '{}': only ASCII letters, digits and '_' are allowed",
            kind,
            name
        );
    }
    Ok(())
}

/// Checks a document field name (dot-separated for nested fields).
pub(crate) fn validate_field(field: &str) -> Result<()> {
    let ok = !field.is_empty()
        && field.split('.').all(|part| {
            !part.is_empty() && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if !ok {
        bail!("invalid field name '{}'", field);
    }
    Ok(())
}

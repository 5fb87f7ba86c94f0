//! Core data types shared by the ingestion and query paths.
//!
//! Movies are stored as schemaless JSON documents; this module pins down the
//! column layout an upload must follow and how each column is coerced.

use serde_json::{Map, Value};

/// A stored document: a JSON object keyed by field name.
pub type Document = Map<String, Value>;

/// Collection holding the uploaded movie records.
pub const MOVIES_COLLECTION: &str = "movies_data";

/// Field the store uses for its internal identifier. Never returned to clients.
pub const ID_FIELD: &str = "_id";

/// Field derived from `release_date` during ingestion.
pub const RELEASE_YEAR_FIELD: &str = "release_year";

/// How a CSV cell is turned into a JSON value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Kept as text; empty cells become `null`.
    Text,
    /// Integer if it parses as one, else float, else the raw text.
    Numeric,
    /// Text, and also the source of `release_year`.
    Date,
    /// A list literal decoded into a JSON array of strings.
    StringList,
}

/// The upload schema, in the exact order the CSV header must list it.
pub const MOVIE_COLUMNS: [(&str, ColumnKind); 15] = [
    ("budget", ColumnKind::Numeric),
    ("homepage", ColumnKind::Text),
    ("original_language", ColumnKind::Text),
    ("original_title", ColumnKind::Text),
    ("overview", ColumnKind::Text),
    ("release_date", ColumnKind::Date),
    ("revenue", ColumnKind::Numeric),
    ("runtime", ColumnKind::Numeric),
    ("status", ColumnKind::Text),
    ("title", ColumnKind::Text),
    ("vote_average", ColumnKind::Numeric),
    ("vote_count", ColumnKind::Numeric),
    ("production_company_id", ColumnKind::Numeric),
    ("genre_id", ColumnKind::Numeric),
    ("languages", ColumnKind::StringList),
];

/// Column names of [`MOVIE_COLUMNS`], in order.
pub fn expected_headers() -> Vec<&'static str> {
    MOVIE_COLUMNS.iter().map(|(name, _)| *name).collect()
}

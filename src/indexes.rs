//! Index bootstrap for the movie collection.
//!
//! Runs once per process start. Each index is compared against the existing
//! ones by exact name and key list and created only when missing. The check
//! is a soft pre-check: two processes racing to create the same index is
//! harmless because creation by name is idempotent in the store.

use anyhow::Result;
use tracing::{error, info};

use crate::config::Config;
use crate::db;
use crate::models::MOVIES_COLLECTION;
use crate::store::{DocumentStore, SortDirection, SortKeys};

use SortDirection::{Ascending, Descending};

/// A named index the service expects to exist.
#[derive(Debug, Clone)]
pub struct IndexDef {
    pub name: &'static str,
    pub keys: &'static [(&'static str, SortDirection)],
}

impl IndexDef {
    pub fn sort_keys(&self) -> SortKeys {
        self.keys
            .iter()
            .map(|(field, dir)| (field.to_string(), *dir))
            .collect()
    }
}

/// Indexes backing the filter and sort combinations the fetch API allows.
pub const MOVIE_INDEXES: [IndexDef; 4] = [
    IndexDef {
        name: "release_year_index",
        keys: &[("release_year", Descending)],
    },
    IndexDef {
        name: "languages_index",
        keys: &[("languages", Ascending)],
    },
    IndexDef {
        name: "language_ratings_index",
        keys: &[("languages", Ascending), ("vote_average", Descending)],
    },
    IndexDef {
        name: "language_release_date_ratings_index",
        keys: &[
            ("languages", Ascending),
            ("release_date", Descending),
            ("vote_average", Descending),
        ],
    },
];

/// Outcome of [`ensure_indexes`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub existing: Vec<String>,
    pub created: Vec<String>,
}

/// Creates any of `defs` missing from `collection`.
pub async fn ensure_indexes(
    store: &dyn DocumentStore,
    collection: &str,
    defs: &[IndexDef],
) -> Result<BootstrapReport> {
    let existing = store.get_indexes(collection).await?;
    let mut report = BootstrapReport::default();

    for def in defs {
        let keys = def.sort_keys();
        let exists = existing
            .iter()
            .any(|index| index.name == def.name && index.key == keys);

        if exists {
            info!(index = def.name, ?keys, "Index already exists");
            report.existing.push(def.name.to_string());
            continue;
        }

        info!(index = def.name, ?keys, "Index does not exist");
        let created = store.create_index(collection, &keys, def.name).await?;
        info!(index = %created, "Index created");
        report.created.push(created);
    }

    Ok(report)
}

/// Cold-start hook: ensures the movie indexes, logging instead of failing.
pub async fn bootstrap_movie_indexes(store: &dyn DocumentStore) -> Option<BootstrapReport> {
    match ensure_indexes(store, MOVIES_COLLECTION, &MOVIE_INDEXES).await {
        Ok(report) => Some(report),
        Err(e) => {
            error!(error = %format!("{:#}", e), "Exception while initialising the document store");
            None
        }
    }
}

/// `movies init`: ensures the movie indexes and prints what happened.
/// Unlike the server's cold start, a failure here is an error.
pub async fn run_init(config: &Config) -> Result<()> {
    let store = db::open_store(config)?;
    let report = ensure_indexes(&store, MOVIES_COLLECTION, &MOVIE_INDEXES).await?;

    for name in &report.existing {
        println!("exists   {}", name);
    }
    for name in &report.created {
        println!("created  {}", name);
    }
    println!(
        "Indexes ready on {}.{}",
        store.db_name(),
        MOVIES_COLLECTION
    );

    store.pool().close().await;
    Ok(())
}

/// `movies indexes`: lists every index on the movie collection.
pub async fn run_list(config: &Config) -> Result<()> {
    let store = db::open_store(config)?;

    for index in store.get_indexes(MOVIES_COLLECTION).await? {
        let keys: Vec<String> = index
            .key
            .iter()
            .map(|(field, dir)| format!("{}: {}", field, dir.as_i32()))
            .collect();
        println!("{:<40} {}", index.name, keys.join(", "));
    }

    store.pool().close().await;
    Ok(())
}

//! SQLite-backed [`DocumentStore`].
//!
//! Each collection is a table named `"<db>.<collection>"` holding one JSON
//! body per row; `seq` records insertion order and breaks sort ties. Index
//! management maps onto SQLite expression indexes over `json_extract`, with
//! a catalog table `"<db>.$indexes"` remembering each index's name and key
//! list so [`get_indexes`](DocumentStore::get_indexes) can report them.
//!
//! `CREATE ... IF NOT EXISTS` and `INSERT OR IGNORE` make index creation
//! idempotent, so several processes bootstrapping at once is harmless.

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use uuid::Uuid;

use super::{
    validate_field, validate_name, DocumentStore, Filter, FindOptions, IndexInfo, SortDirection,
    SortKeys,
};
use crate::models::{Document, ID_FIELD};

/// Name reported for the implicit unique index on `_id`.
const ID_INDEX_NAME: &str = "_id_";

/// SQLite implementation of the [`DocumentStore`] trait.
pub struct SqliteDocumentStore {
    pool: SqlitePool,
    db_name: String,
    /// Collections whose tables are known to exist in this process.
    ready: Mutex<HashSet<String>>,
}

impl SqliteDocumentStore {
    /// Wraps a pool, scoping every collection to `db_name`.
    pub fn new(pool: SqlitePool, db_name: &str) -> Result<Self> {
        validate_name("database", db_name)?;
        Ok(Self {
            pool,
            db_name: db_name.to_string(),
            ready: Mutex::new(HashSet::new()),
        })
    }

    pub fn db_name(&self) -> &str {
        &self.db_name
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn collection_table(&self, collection: &str) -> String {
        quote_ident(&format!("{}.{}", self.db_name, collection))
    }

    fn catalog_table(&self) -> String {
        quote_ident(&format!("{}.$indexes", self.db_name))
    }

    /// Creates the collection table (and the index catalog) on first use and
    /// returns the quoted table name.
    async fn ensure_collection(&self, collection: &str) -> Result<String> {
        validate_name("collection", collection)?;
        let table = self.collection_table(collection);

        let known = self
            .ready
            .lock()
            .map_err(|_| anyhow!("collection registry lock poisoned"))?
            .contains(collection);
        if known {
            return Ok(table);
        }

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                body TEXT NOT NULL
            )
            "#,
            table
        ))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create collection '{}'", collection))?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                collection TEXT NOT NULL,
                name TEXT NOT NULL,
                keys TEXT NOT NULL,
                PRIMARY KEY (collection, name)
            )
            "#,
            self.catalog_table()
        ))
        .execute(&self.pool)
        .await
        .context("Failed to create index catalog")?;

        self.ready
            .lock()
            .map_err(|_| anyhow!("collection registry lock poisoned"))?
            .insert(collection.to_string());

        Ok(table)
    }

    async fn catalog_keys(&self, collection: &str, name: &str) -> Result<Option<SortKeys>> {
        let raw: Option<String> = sqlx::query_scalar(&format!(
            "SELECT keys FROM {} WHERE collection = ? AND name = ?",
            self.catalog_table()
        ))
        .bind(collection)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        raw.map(|raw| parse_index_keys(&raw)).transpose()
    }
}

/// Double-quotes an SQL identifier. Callers only pass validated names.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// JSON path literal for a validated field name.
fn json_path(field: &str) -> String {
    format!("'$.{}'", field)
}

fn sql_direction(direction: SortDirection) -> &'static str {
    match direction {
        SortDirection::Ascending => "ASC",
        SortDirection::Descending => "DESC",
    }
}

/// Appends a `WHERE` clause for `filter`, binding every client-supplied value.
fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &Filter) -> Result<()> {
    for (i, (field, value)) in filter.iter().enumerate() {
        validate_field(field)?;
        let path = json_path(field);
        qb.push(if i == 0 { " WHERE " } else { " AND " });

        match value {
            Value::Null => {
                qb.push(format!(
                    "(json_type(body, {p}) IS NULL OR json_type(body, {p}) = 'null')",
                    p = path
                ));
            }
            Value::Bool(b) => {
                qb.push(format!(
                    "EXISTS (SELECT 1 FROM json_each(body, {}) AS e WHERE e.type = '{}')",
                    path,
                    if *b { "true" } else { "false" }
                ));
            }
            Value::Number(n) => {
                qb.push(format!(
                    "EXISTS (SELECT 1 FROM json_each(body, {}) AS e \
                     WHERE e.type IN ('integer', 'real') AND e.value = ",
                    path
                ));
                if let Some(i) = n.as_i64() {
                    qb.push_bind(i);
                } else {
                    let f = n
                        .as_f64()
                        .ok_or_else(|| anyhow!("unsupported number in filter: {}", n))?;
                    qb.push_bind(f);
                }
                qb.push(")");
            }
            Value::String(s) => {
                qb.push(format!(
                    "EXISTS (SELECT 1 FROM json_each(body, {}) AS e \
                     WHERE e.type = 'text' AND e.value = ",
                    path
                ));
                qb.push_bind(s.clone());
                qb.push(")");
            }
            Value::Array(_) | Value::Object(_) => {
                qb.push(format!("json_extract(body, {}) = json(", path));
                qb.push_bind(value.to_string());
                qb.push(")");
            }
        }
    }
    Ok(())
}

fn parse_index_keys(raw: &str) -> Result<SortKeys> {
    let pairs: Vec<(String, i32)> =
        serde_json::from_str(raw).with_context(|| format!("Corrupt index catalog entry: {}", raw))?;
    pairs
        .into_iter()
        .map(|(field, dir)| {
            SortDirection::from_i32(dir)
                .map(|d| (field, d))
                .ok_or_else(|| anyhow!("Corrupt index direction {} in catalog", dir))
        })
        .collect()
}

/// Moves `_id` to the front of the document, generating one if absent.
fn assign_id(doc: Document) -> Result<(String, Document)> {
    let id = match doc.get(ID_FIELD) {
        None => Uuid::new_v4().to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => bail!("document {} must be a string, got {}", ID_FIELD, other),
    };

    let mut stored = Document::new();
    stored.insert(ID_FIELD.to_string(), Value::String(id.clone()));
    for (k, v) in doc {
        if k != ID_FIELD {
            stored.insert(k, v);
        }
    }
    Ok((id, stored))
}

#[async_trait]
impl DocumentStore for SqliteDocumentStore {
    async fn get_indexes(&self, collection: &str) -> Result<Vec<IndexInfo>> {
        self.ensure_collection(collection).await?;

        let rows: Vec<(String, String)> = sqlx::query_as(&format!(
            "SELECT name, keys FROM {} WHERE collection = ? ORDER BY rowid ASC",
            self.catalog_table()
        ))
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        let mut indexes = vec![IndexInfo {
            name: ID_INDEX_NAME.to_string(),
            key: vec![(ID_FIELD.to_string(), SortDirection::Ascending)],
        }];
        for (name, keys) in rows {
            indexes.push(IndexInfo {
                name,
                key: parse_index_keys(&keys)?,
            });
        }
        Ok(indexes)
    }

    async fn create_index(
        &self,
        collection: &str,
        keys: &SortKeys,
        name: &str,
    ) -> Result<String> {
        validate_name("index", name)?;
        if name == ID_INDEX_NAME {
            bail!("index name '{}' is reserved", ID_INDEX_NAME);
        }
        if keys.is_empty() {
            bail!("index '{}' must have at least one key", name);
        }
        for (field, _) in keys {
            validate_field(field)?;
        }

        let table = self.ensure_collection(collection).await?;
        let keys_json = serde_json::to_string(keys)?;

        if let Some(existing) = self.catalog_keys(collection, name).await? {
            if existing != *keys {
                bail!(
                    "index '{}' already exists on '{}' with different keys",
                    name,
                    collection
                );
            }
            return Ok(name.to_string());
        }

        let columns = keys
            .iter()
            .map(|(field, dir)| {
                format!("json_extract(body, {}) {}", json_path(field), sql_direction(*dir))
            })
            .collect::<Vec<_>>()
            .join(", ");

        // Write first so the transaction takes the write lock up front and
        // concurrent bootstraps queue on the busy timeout instead of failing.
        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "INSERT OR IGNORE INTO {} (collection, name, keys) VALUES (?, ?, ?)",
            self.catalog_table()
        ))
        .bind(collection)
        .bind(name)
        .bind(&keys_json)
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
            quote_ident(&format!("{}.{}.{}", self.db_name, collection, name)),
            table,
            columns
        ))
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to create index '{}'", name))?;

        tx.commit().await?;

        // Another process may have won the race with different keys.
        match self.catalog_keys(collection, name).await? {
            Some(stored) if stored == *keys => Ok(name.to_string()),
            _ => bail!(
                "index '{}' already exists on '{}' with different keys",
                name,
                collection
            ),
        }
    }

    async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> Result<Vec<String>> {
        if documents.is_empty() {
            bail!("insert_many requires at least one document");
        }
        let table = self.ensure_collection(collection).await?;
        let insert = format!("INSERT INTO {} (id, body) VALUES (?, ?)", table);

        let mut tx = self.pool.begin().await?;
        let mut ids = Vec::with_capacity(documents.len());

        for doc in documents {
            let (id, stored) = assign_id(doc)?;
            let body = serde_json::to_string(&stored)?;
            sqlx::query(&insert)
                .bind(&id)
                .bind(body)
                .execute(&mut *tx)
                .await
                .with_context(|| format!("Failed to insert document {}", id))?;
            ids.push(id);
        }

        tx.commit().await?;
        Ok(ids)
    }

    async fn insert_one(&self, collection: &str, document: Document) -> Result<String> {
        let table = self.ensure_collection(collection).await?;
        let (id, stored) = assign_id(document)?;

        sqlx::query(&format!("INSERT INTO {} (id, body) VALUES (?, ?)", table))
            .bind(&id)
            .bind(serde_json::to_string(&stored)?)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to insert document {}", id))?;

        Ok(id)
    }

    async fn find(&self, collection: &str, options: &FindOptions) -> Result<Vec<Document>> {
        let table = self.ensure_collection(collection).await?;

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT body FROM {}", table));
        push_filter(&mut qb, &options.filter)?;

        qb.push(" ORDER BY ");
        for (field, dir) in &options.sort {
            validate_field(field)?;
            qb.push(format!(
                "json_extract(body, {}) {}, ",
                json_path(field),
                sql_direction(*dir)
            ));
        }
        qb.push("seq ASC LIMIT ");
        // SQLite treats a negative LIMIT as "no limit".
        let limit = match options.limit {
            Some(limit) => i64::try_from(limit).context("limit out of range")?,
            None => -1,
        };
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(i64::try_from(options.skip).context("skip out of range")?);

        let bodies: Vec<String> = qb.build_query_scalar().fetch_all(&self.pool).await?;

        let mut docs = Vec::with_capacity(bodies.len());
        for body in bodies {
            let mut doc: Document = serde_json::from_str(&body)
                .with_context(|| format!("Corrupt document in '{}'", collection))?;
            if let Some(projection) = &options.projection {
                projection.apply(&mut doc);
            }
            docs.push(doc);
        }
        Ok(docs)
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64> {
        let table = self.ensure_collection(collection).await?;

        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT COUNT(*) FROM {}", table));
        push_filter(&mut qb, filter)?;

        let count: i64 = qb.build_query_scalar().fetch_one(&self.pool).await?;
        Ok(u64::try_from(count)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Projection;
    use serde_json::json;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use tempfile::TempDir;

    async fn test_store() -> (TempDir, SqliteDocumentStore) {
        let tmp = TempDir::new().unwrap();
        let options = SqliteConnectOptions::new()
            .filename(tmp.path().join("store.sqlite"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .unwrap();
        (tmp, SqliteDocumentStore::new(pool, "imdb").unwrap())
    }

    fn doc(value: Value) -> Document {
        serde_json::from_value(value).unwrap()
    }

    async fn seed(store: &SqliteDocumentStore) {
        store
            .insert_many(
                "movies",
                vec![
                    doc(json!({"title": "A", "year": 1995, "rating": 7.7, "langs": ["English"]})),
                    doc(json!({"title": "B", "year": 1995, "rating": 6.9, "langs": ["English", "Français"]})),
                    doc(json!({"title": "C", "year": 2001, "rating": 8.1, "langs": []})),
                    doc(json!({"title": "D", "year": null, "rating": 6.9, "langs": ["Deutsch"]})),
                ],
            )
            .await
            .unwrap();
    }

    fn titles(docs: &[Document]) -> Vec<&str> {
        docs.iter().map(|d| d["title"].as_str().unwrap()).collect()
    }

    #[tokio::test]
    async fn test_insert_many_assigns_ids() {
        let (_tmp, store) = test_store().await;
        let ids = store
            .insert_many("movies", vec![doc(json!({"title": "A"})), doc(json!({"title": "B"}))])
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);

        let docs = store.find("movies", &FindOptions::new()).await.unwrap();
        assert_eq!(docs[0][ID_FIELD], ids[0].as_str());
        assert_eq!(docs[1][ID_FIELD], ids[1].as_str());
    }

    #[tokio::test]
    async fn test_insert_many_empty_is_error() {
        let (_tmp, store) = test_store().await;
        assert!(store.insert_many("movies", Vec::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_insert_many_is_all_or_nothing() {
        let (_tmp, store) = test_store().await;
        let result = store
            .insert_many(
                "movies",
                vec![
                    doc(json!({"_id": "dup", "title": "A"})),
                    doc(json!({"_id": "dup", "title": "B"})),
                ],
            )
            .await;
        assert!(result.is_err());
        assert_eq!(store.count("movies", &Filter::new()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_insert_one() {
        let (_tmp, store) = test_store().await;
        let id = store.insert_one("movies", doc(json!({"title": "Solo"}))).await.unwrap();
        let docs = store.find("movies", &FindOptions::new()).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0][ID_FIELD], id.as_str());
    }

    #[tokio::test]
    async fn test_filter_scalar_matches_array_member() {
        let (_tmp, store) = test_store().await;
        seed(&store).await;

        let filter = doc(json!({"langs": "Français"}));
        let found = store
            .find("movies", &FindOptions::new().with_filter(filter.clone()))
            .await
            .unwrap();
        assert_eq!(titles(&found), vec!["B"]);
        assert_eq!(store.count("movies", &filter).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_filter_number_and_type_strictness() {
        let (_tmp, store) = test_store().await;
        seed(&store).await;

        assert_eq!(store.count("movies", &doc(json!({"year": 1995}))).await.unwrap(), 2);
        assert_eq!(store.count("movies", &doc(json!({"year": "1995"}))).await.unwrap(), 0);
        assert_eq!(store.count("movies", &doc(json!({"year": 1995.0}))).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_filter_null_matches_missing() {
        let (_tmp, store) = test_store().await;
        seed(&store).await;
        store.insert_one("movies", doc(json!({"title": "E"}))).await.unwrap();

        let found = store
            .find("movies", &FindOptions::new().with_filter(doc(json!({"year": null}))))
            .await
            .unwrap();
        assert_eq!(titles(&found), vec!["D", "E"]);
    }

    #[tokio::test]
    async fn test_filter_array_exact() {
        let (_tmp, store) = test_store().await;
        seed(&store).await;
        let filter = doc(json!({"langs": ["English", "Français"]}));
        assert_eq!(store.count("movies", &filter).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_filter_rejects_bad_field() {
        let (_tmp, store) = test_store().await;
        let filter = doc(json!({"x') OR 1=1 --": 1}));
        assert!(store.count("movies", &filter).await.is_err());
    }

    #[tokio::test]
    async fn test_sort_multi_key_skip_limit_projection() {
        let (_tmp, store) = test_store().await;
        seed(&store).await;

        let options = FindOptions::new()
            .with_sort(vec![
                ("rating".into(), SortDirection::Descending),
                ("title".into(), SortDirection::Descending),
            ])
            .with_skip(1)
            .with_limit(2)
            .with_projection(Projection::exclude([ID_FIELD]));
        let found = store.find("movies", &options).await.unwrap();

        // Full order: C(8.1), A(7.7), D(6.9), B(6.9)
        assert_eq!(titles(&found), vec!["A", "D"]);
        assert!(found.iter().all(|d| !d.contains_key(ID_FIELD)));
    }

    #[tokio::test]
    async fn test_sort_ascending_puts_nulls_first() {
        let (_tmp, store) = test_store().await;
        seed(&store).await;
        let found = store
            .find(
                "movies",
                &FindOptions::new().with_sort(vec![("year".into(), SortDirection::Ascending)]),
            )
            .await
            .unwrap();
        assert_eq!(titles(&found), vec!["D", "A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_find_empty_collection() {
        let (_tmp, store) = test_store().await;
        let found = store
            .find("movies", &FindOptions::new().with_filter(doc(json!({"year": 1}))))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_create_index_is_idempotent() {
        let (_tmp, store) = test_store().await;
        let keys: SortKeys = vec![
            ("langs".into(), SortDirection::Ascending),
            ("rating".into(), SortDirection::Descending),
        ];

        let first = store.create_index("movies", &keys, "langs_rating").await.unwrap();
        let second = store.create_index("movies", &keys, "langs_rating").await.unwrap();
        assert_eq!(first, "langs_rating");
        assert_eq!(second, "langs_rating");

        let indexes = store.get_indexes("movies").await.unwrap();
        assert_eq!(indexes.len(), 2);
        assert_eq!(indexes[0].name, "_id_");
        assert_eq!(indexes[1].name, "langs_rating");
        assert_eq!(indexes[1].key, keys);
    }

    #[tokio::test]
    async fn test_create_index_name_conflict() {
        let (_tmp, store) = test_store().await;
        let asc: SortKeys = vec![("year".into(), SortDirection::Ascending)];
        let desc: SortKeys = vec![("year".into(), SortDirection::Descending)];
        store.create_index("movies", &asc, "year_index").await.unwrap();
        assert!(store.create_index("movies", &desc, "year_index").await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_collection_name() {
        let (_tmp, store) = test_store().await;
        assert!(store.count("movies\"; DROP TABLE x; --", &Filter::new()).await.is_err());
    }
}

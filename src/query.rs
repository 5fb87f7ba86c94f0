//! Fetch query planning.
//!
//! Narrows the client's loosely-typed `filter_params` / `sort_params` /
//! `page` / `size` into a bounded [`QueryPlan`] and runs it.
//!
//! The two allow-lists deliberately behave differently:
//!
//! | Input | Unknown key | Known key, bad value |
//! |-------|-------------|----------------------|
//! | `filter_params` | dropped | passed through as an equality match |
//! | `sort_params` | dropped | rejected |
//!
//! Pagination bounds come from a live count with the same filter, so a page
//! past the end is an error while a filter matching nothing is an empty,
//! successful result.

use anyhow::anyhow;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::config::Config;
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{Document, ID_FIELD, MOVIES_COLLECTION};
use crate::store::{DocumentStore, Filter, FindOptions, Projection, SortDirection, SortKeys};

pub const FETCH_SUCCESS_MESSAGE: &str = "Data fetched successfully";
pub const NO_MATCH_MESSAGE: &str = "No movie data found with the applied filter";

pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_SIZE: i64 = 20;

/// Fields a client may filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterField {
    Languages,
    ReleaseYear,
}

impl FilterField {
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "languages" => Some(FilterField::Languages),
            "release_year" => Some(FilterField::ReleaseYear),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FilterField::Languages => "languages",
            FilterField::ReleaseYear => "release_year",
        }
    }
}

/// Fields a client may sort on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Ratings,
    VoteAverage,
    ReleaseDate,
    ReleaseYear,
}

impl SortField {
    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "ratings" => Some(SortField::Ratings),
            "vote_average" => Some(SortField::VoteAverage),
            "release_date" => Some(SortField::ReleaseDate),
            "release_year" => Some(SortField::ReleaseYear),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortField::Ratings => "ratings",
            SortField::VoteAverage => "vote_average",
            SortField::ReleaseDate => "release_date",
            SortField::ReleaseYear => "release_year",
        }
    }
}

/// Body of `POST /api/fetch/movies`. Values stay untyped until validated.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchRequest {
    #[serde(default)]
    pub filter_params: Value,
    #[serde(default)]
    pub sort_params: Value,
    #[serde(default = "default_page")]
    pub page: Value,
    #[serde(default = "default_size")]
    pub size: Value,
}

fn default_page() -> Value {
    json!(DEFAULT_PAGE)
}
fn default_size() -> Value {
    json!(DEFAULT_SIZE)
}

/// A validated, bounded query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub filter: Filter,
    pub sort: SortKeys,
    pub skip: u64,
    pub limit: u64,
}

impl QueryPlan {
    pub fn find_options(&self) -> FindOptions {
        FindOptions::new()
            .with_filter(self.filter.clone())
            .with_sort(self.sort.clone())
            .with_skip(self.skip)
            .with_limit(self.limit)
            .with_projection(Projection::exclude([ID_FIELD]))
    }
}

/// Keeps only allow-listed filter keys. Unknown keys are dropped silently.
pub fn restrict_filter(params: &Value) -> ApiResult<Filter> {
    let Some(params) = as_object("filter_params", params)? else {
        return Ok(Filter::new());
    };

    Ok(params
        .iter()
        .filter_map(|(key, value)| {
            FilterField::parse(key).map(|field| (field.as_str().to_string(), value.clone()))
        })
        .collect())
}

/// Keeps only allow-listed sort keys, in the client's order, and rejects any
/// direction other than `1` or `-1`.
pub fn restrict_sort(params: &Value) -> ApiResult<SortKeys> {
    let Some(params) = as_object("sort_params", params)? else {
        return Ok(SortKeys::new());
    };

    let mut sort = SortKeys::new();
    for (key, value) in params {
        let Some(field) = SortField::parse(key) else {
            continue;
        };
        let direction = parse_direction(value).ok_or_else(|| {
            ApiError::bad_request(
                "Sort params only accept -1 (descending) or 1 (ascending) as value",
            )
        })?;
        sort.push((field.as_str().to_string(), direction));
    }
    Ok(sort)
}

fn as_object<'a>(
    name: &str,
    value: &'a Value,
) -> ApiResult<Option<&'a serde_json::Map<String, Value>>> {
    match value {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        other => Err(ApiError::bad_request(format!(
            "{} must be an object, got {}",
            name, other
        ))),
    }
}

fn parse_direction(value: &Value) -> Option<SortDirection> {
    let Value::Number(n) = value else {
        return None;
    };
    if let Some(i) = n.as_i64() {
        return i32::try_from(i).ok().and_then(SortDirection::from_i32);
    }
    match n.as_f64() {
        Some(f) if f == 1.0 => Some(SortDirection::Ascending),
        Some(f) if f == -1.0 => Some(SortDirection::Descending),
        _ => None,
    }
}

/// Reads an integral JSON number; `1.0` counts, `"1"` does not.
fn parse_integer(name: &str, value: &Value) -> ApiResult<i64> {
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < 9.0e15)
                .map(|f| f as i64)
        }),
        _ => None,
    };
    parsed.ok_or_else(|| ApiError::bad_request(format!("{} must be an integer, got {}", name, value)))
}

/// Validates the request and computes its bounds against a live count.
///
/// Returns `Ok(None)` when the filter matches no documents.
pub async fn plan_query(
    store: &dyn DocumentStore,
    request: &FetchRequest,
) -> ApiResult<Option<QueryPlan>> {
    let sort = restrict_sort(&request.sort_params)?;
    let filter = restrict_filter(&request.filter_params)?;

    let page = parse_integer("page", &request.page)?;
    let size = parse_integer("size", &request.size)?;
    let size = u64::try_from(size)
        .ok()
        .filter(|s| *s > 0)
        .ok_or_else(|| ApiError::bad_request(format!("size must be a positive integer, got {}", size)))?;

    let total = store
        .count(MOVIES_COLLECTION, &filter)
        .await
        .map_err(fetch_failure)?;
    if total == 0 {
        return Ok(None);
    }

    let max_page = total.div_ceil(size);
    let page = u64::try_from(page)
        .ok()
        .filter(|p| (1..=max_page).contains(p))
        .ok_or_else(|| {
            ApiError::bad_request(format!(
                "Requested page {} doesn't exist. Please enter page number between 1 and maximum available pages {}",
                page, max_page
            ))
        })?;

    Ok(Some(QueryPlan {
        filter,
        sort,
        skip: (page - 1).saturating_mul(size),
        limit: size,
    }))
}

/// Runs a fetch request end to end.
pub async fn fetch_movies(
    store: &dyn DocumentStore,
    request: &FetchRequest,
) -> ApiResult<Vec<Document>> {
    let Some(plan) = plan_query(store, request).await? else {
        return Ok(Vec::new());
    };

    let records = store
        .find(MOVIES_COLLECTION, &plan.find_options())
        .await
        .map_err(fetch_failure)?;

    info!(
        count = records.len(),
        skip = plan.skip,
        limit = plan.limit,
        "Fetched required records"
    );
    Ok(records)
}

/// Message paired with a fetch result in the HTTP response.
pub fn result_message(records: &[Document]) -> &'static str {
    if records.is_empty() {
        NO_MATCH_MESSAGE
    } else {
        FETCH_SUCCESS_MESSAGE
    }
}

fn fetch_failure(err: anyhow::Error) -> ApiError {
    ApiError::Internal(anyhow!(
        "An error occurred while fetching filtered movies data: {:#}",
        err
    ))
}

/// CLI entry point: run a fetch and print the JSON response.
pub async fn run_fetch(
    config: &Config,
    filter: Option<&str>,
    sort: Option<&str>,
    page: i64,
    size: i64,
) -> anyhow::Result<()> {
    let request = FetchRequest {
        filter_params: parse_json_arg("--filter", filter)?,
        sort_params: parse_json_arg("--sort", sort)?,
        page: json!(page),
        size: json!(size),
    };

    let store = db::open_store(config)?;
    let records = fetch_movies(&store, &request)
        .await
        .map_err(|e| anyhow!("fetch: {:#}", e))?;

    let body = json!({ "message": result_message(&records), "data": records });
    println!("{}", serde_json::to_string_pretty(&body)?);

    store.pool().close().await;
    Ok(())
}

fn parse_json_arg(flag: &str, raw: Option<&str>) -> anyhow::Result<Value> {
    match raw {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| anyhow!("{} is not valid JSON: {}", flag, e)),
        None => Ok(Value::Null),
    }
}

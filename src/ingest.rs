//! CSV ingestion.
//!
//! Turns an uploaded CSV body into movie documents and bulk-inserts them:
//! size and encoding checks → header validation → per-row coercion
//! (`release_year` derivation, `languages` literal decoding) → one
//! `insert_many` call. Nothing is written unless every row converts.

use anyhow::Context;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord};
use serde_json::{Number, Value};
use std::path::Path;
use tracing::info;

use crate::config::{Config, UploadConfig};
use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::literal::parse_string_list;
use crate::models::{
    expected_headers, ColumnKind, Document, MOVIES_COLLECTION, MOVIE_COLUMNS, RELEASE_YEAR_FIELD,
};
use crate::store::DocumentStore;

pub const UPLOAD_SUCCESS_MESSAGE: &str = "Data uploaded successfully";
const MALFORMED_FILE: &str = "Error parsing the file. Please ensure it is well-formed CSV file.";
const NO_DATA: &str = "No data found in the CSV.";

/// Date layouts tried, in order, when deriving `release_year`.
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Parses and validates a CSV upload into movie documents.
pub fn parse_movies_csv(body: &[u8], limits: &UploadConfig) -> ApiResult<Vec<Document>> {
    if body.is_empty() {
        return Err(ApiError::bad_request(
            "No file uploaded. Request body is empty.",
        ));
    }
    if body.len() > limits.max_bytes() {
        return Err(ApiError::bad_request(format!(
            "File size exceeds the maximum allowed limit of {} MB.",
            limits.max_file_size_mb
        )));
    }

    let text = std::str::from_utf8(body).map_err(|_| ApiError::bad_request(MALFORMED_FILE))?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());

    let headers = reader
        .headers()
        .map_err(|_| ApiError::bad_request(MALFORMED_FILE))?
        .clone();
    if headers.is_empty() {
        return Err(ApiError::bad_request(NO_DATA));
    }

    let expected = expected_headers();
    if !headers.iter().eq(expected.iter().copied()) {
        return Err(ApiError::bad_request(format!(
            "Invalid CSV headers. Expected: {:?}",
            expected
        )));
    }

    let mut documents = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|_| ApiError::bad_request(MALFORMED_FILE))?;
        if record.len() > headers.len() {
            return Err(ApiError::bad_request(MALFORMED_FILE));
        }
        documents.push(row_to_document(&record)?);
    }

    if documents.is_empty() {
        return Err(ApiError::bad_request(NO_DATA));
    }

    Ok(documents)
}

/// Validates an upload and inserts every row in a single store call.
pub async fn upload_csv(
    store: &dyn DocumentStore,
    limits: &UploadConfig,
    body: &[u8],
) -> ApiResult<String> {
    let documents = parse_movies_csv(body, limits)?;
    let count = documents.len();

    store
        .insert_many(MOVIES_COLLECTION, documents)
        .await
        .context("Failed to insert movie records")?;

    info!(count, collection = MOVIES_COLLECTION, "Inserted movie records");
    Ok(UPLOAD_SUCCESS_MESSAGE.to_string())
}

/// CLI entry point: ingest a CSV file from disk through the same validator.
pub async fn run_upload(config: &Config, path: &Path) -> anyhow::Result<()> {
    let body = std::fs::read(path)
        .with_context(|| format!("Failed to read CSV file: {}", path.display()))?;
    let store = db::open_store(config)?;

    let message = upload_csv(&store, &config.upload, &body)
        .await
        .map_err(|e| anyhow::anyhow!("upload {}: {}", path.display(), e))?;

    println!("{}", message);
    store.pool().close().await;
    Ok(())
}

fn row_to_document(record: &StringRecord) -> ApiResult<Document> {
    let mut doc = Document::new();
    let mut release_year = Value::Null;

    for (i, (name, kind)) in MOVIE_COLUMNS.iter().enumerate() {
        // Short rows are padded with empty cells.
        let cell = record.get(i).unwrap_or("");
        let value = match kind {
            ColumnKind::Text => text_value(cell),
            ColumnKind::Numeric => numeric_value(cell),
            ColumnKind::Date => {
                release_year = parse_year(cell).map(Value::from).unwrap_or(Value::Null);
                text_value(cell)
            }
            ColumnKind::StringList => string_list_value(cell).with_context(|| {
                let line = record.position().map(|p| p.line()).unwrap_or(0);
                format!("Invalid '{}' value on line {}", name, line)
            })?,
        };
        doc.insert(name.to_string(), value);
    }

    doc.insert(RELEASE_YEAR_FIELD.to_string(), release_year);
    Ok(doc)
}

fn text_value(cell: &str) -> Value {
    if cell.is_empty() {
        Value::Null
    } else {
        Value::String(cell.to_string())
    }
}

fn numeric_value(cell: &str) -> Value {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::from(i);
    }
    match trimmed.parse::<f64>() {
        // NaN and infinities have no JSON form.
        Ok(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        Err(_) => Value::String(cell.to_string()),
    }
}

fn string_list_value(cell: &str) -> anyhow::Result<Value> {
    if cell.trim().is_empty() {
        return Ok(Value::Array(Vec::new()));
    }
    let items = parse_string_list(cell)?;
    Ok(Value::Array(items.into_iter().map(Value::String).collect()))
}

/// Year of a release date, or `None` when the text is not a recognised date.
pub fn parse_year(cell: &str) -> Option<i32> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return None;
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date.year());
        }
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.year());
    }
    DateTime::parse_from_rfc3339(trimmed).ok().map(|dt| dt.year())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HEADER: &str = "budget,homepage,original_language,original_title,overview,release_date,revenue,runtime,status,title,vote_average,vote_count,production_company_id,genre_id,languages\n";

    fn limits() -> UploadConfig {
        UploadConfig {
            max_file_size_mb: 1,
        }
    }

    fn sample() -> String {
        format!(
            "{}{}{}",
            HEADER,
            "30000000.0,http://toystory.disney.com/toy-story,en,Toy Story,\"Led by Woody, Andy's toys live happily.\",1995-10-30,373554033.0,81,Released,Toy Story,7.7,5415.0,3,16,['English']\n",
            "65000000.0,,en,Jumanji,\"When siblings Judy and Peter discover an enchanted board game.\",1995-12-15,262797249.0,104,Released,Jumanji,6.9,2413.0,559,12,\"['English', 'Français']\"\n",
        )
    }

    fn client_message(err: ApiError) -> String {
        assert!(err.is_client_error(), "expected client error, got {:?}", err);
        err.to_string()
    }

    #[test]
    fn test_valid_upload_parses_rows() {
        let docs = parse_movies_csv(sample().as_bytes(), &limits()).unwrap();
        assert_eq!(docs.len(), 2);

        let toy = &docs[0];
        assert_eq!(toy["title"], "Toy Story");
        assert_eq!(toy["budget"], json!(30000000.0));
        assert_eq!(toy["runtime"], json!(81));
        assert_eq!(toy["release_year"], json!(1995));
        assert_eq!(toy["languages"], json!(["English"]));
        assert_eq!(toy.len(), 16);

        let jumanji = &docs[1];
        assert_eq!(jumanji["homepage"], Value::Null);
        assert_eq!(jumanji["languages"], json!(["English", "Français"]));
        assert_eq!(jumanji["production_company_id"], json!(559));
    }

    #[test]
    fn test_field_order_matches_schema() {
        let docs = parse_movies_csv(sample().as_bytes(), &limits()).unwrap();
        let mut expected: Vec<&str> = expected_headers();
        expected.push("release_year");
        assert_eq!(docs[0].keys().map(String::as_str).collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_empty_body() {
        let msg = client_message(parse_movies_csv(b"", &limits()).unwrap_err());
        assert!(msg.contains("empty"));
    }

    #[test]
    fn test_blank_lines_only() {
        let msg = client_message(parse_movies_csv(b"\n\n", &limits()).unwrap_err());
        assert_eq!(msg, NO_DATA);
    }

    #[test]
    fn test_header_only() {
        let msg = client_message(parse_movies_csv(HEADER.as_bytes(), &limits()).unwrap_err());
        assert_eq!(msg, NO_DATA);
    }

    #[test]
    fn test_oversized_body() {
        let body = vec![b'a'; 1_000_001];
        let msg = client_message(parse_movies_csv(&body, &limits()).unwrap_err());
        assert!(msg.contains("1 MB"));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut body = HEADER.as_bytes().to_vec();
        body.extend_from_slice(&[0xff, 0xfe, b'\n']);
        let msg = client_message(parse_movies_csv(&body, &limits()).unwrap_err());
        assert_eq!(msg, MALFORMED_FILE);
    }

    #[test]
    fn test_wrong_headers() {
        let body = "title,year,director\nMovie1,2020,Director1\nMovie2,2021,Director2";
        let msg = client_message(parse_movies_csv(body.as_bytes(), &limits()).unwrap_err());
        assert!(msg.starts_with("Invalid CSV headers. Expected:"));
        assert!(msg.contains("\"languages\""));
    }

    #[test]
    fn test_reordered_headers() {
        let reordered = HEADER.replacen("budget,homepage", "homepage,budget", 1);
        let body = format!("{}1,2,3,4,5,6,7,8,9,10,11,12,13,14,[]\n", reordered);
        assert!(parse_movies_csv(body.as_bytes(), &limits()).is_err());
    }

    #[test]
    fn test_extra_column() {
        let header = HEADER.trim_end().to_string() + ",extra\n";
        let body = format!("{}1,,en,T,O,1995-01-01,1,1,Released,T,1,1,1,1,[],x\n", header);
        assert!(parse_movies_csv(body.as_bytes(), &limits()).is_err());
    }

    #[test]
    fn test_row_with_too_many_fields() {
        let body = format!("{}1,,en,T,O,1995-01-01,1,1,Released,T,1,1,1,1,[],x\n", HEADER);
        let msg = client_message(parse_movies_csv(body.as_bytes(), &limits()).unwrap_err());
        assert_eq!(msg, MALFORMED_FILE);
    }

    #[test]
    fn test_short_row_is_padded() {
        let body = format!("{}1,,en,T,O,1995-01-01\n", HEADER);
        let docs = parse_movies_csv(body.as_bytes(), &limits()).unwrap();
        assert_eq!(docs[0]["languages"], json!([]));
        assert_eq!(docs[0]["genre_id"], Value::Null);
    }

    #[test]
    fn test_unparsable_date_yields_null_year() {
        let body = format!(
            "{}1,,en,A,O,not a date,1,1,Released,A,1,1,1,1,[]\n2,,en,B,O,1999-02-03,1,1,Released,B,1,1,1,1,[]\n",
            HEADER
        );
        let docs = parse_movies_csv(body.as_bytes(), &limits()).unwrap();
        assert_eq!(docs[0]["release_year"], Value::Null);
        assert_eq!(docs[0]["release_date"], "not a date");
        assert_eq!(docs[1]["release_year"], json!(1999));
    }

    #[test]
    fn test_malformed_languages_is_internal_error() {
        let body = format!("{}1,,en,A,O,1995-01-01,1,1,Released,A,1,1,1,1,English\n", HEADER);
        let err = parse_movies_csv(body.as_bytes(), &limits()).unwrap_err();
        assert!(!err.is_client_error());
        assert!(err.to_string().contains("languages"));
    }

    #[test]
    fn test_bom_is_ignored() {
        let body = format!("\u{feff}{}", sample());
        assert_eq!(parse_movies_csv(body.as_bytes(), &limits()).unwrap().len(), 2);
    }

    #[test]
    fn test_parse_year_formats() {
        assert_eq!(parse_year("1995-10-30"), Some(1995));
        assert_eq!(parse_year("1995/10/30"), Some(1995));
        assert_eq!(parse_year("10/30/1995"), Some(1995));
        assert_eq!(parse_year("1995-10-30T00:00:00Z"), Some(1995));
        assert_eq!(parse_year("1995-13-45"), None);
        assert_eq!(parse_year(""), None);
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(numeric_value("81"), json!(81));
        assert_eq!(numeric_value("7.7"), json!(7.7));
        assert_eq!(numeric_value(""), Value::Null);
        assert_eq!(numeric_value("nan"), Value::Null);
        assert_eq!(numeric_value("unknown"), json!("unknown"));
    }
}

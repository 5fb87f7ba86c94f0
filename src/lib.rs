//! # Movie Catalog
//!
//! Ingests movie records from CSV uploads and serves filtered, sorted,
//! paginated queries over them, backed by a document store on SQLite.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐
//! │  HTTP (axum) │   │  CLI (movies)│
//! └──────┬───────┘   └──────┬───────┘
//!        └────────┬─────────┘
//!                 ▼
//!   ┌─────────────────────────────┐
//!   │ ingest (CSV) │ query (fetch)│
//!   └──────────────┬──────────────┘
//!                  ▼
//!        ┌───────────────────┐
//!        │  DocumentStore    │──▶ SQLite (JSON documents)
//!        └───────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! movies init                         # create indexes
//! movies upload ./movies.csv          # ingest a CSV file
//! movies fetch --filter '{"languages":"English"}' --sort '{"vote_average":-1}'
//! movies serve                        # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with environment overrides |
//! | [`db`] | Connection string resolution and pool setup |
//! | [`store`] | Document store trait and SQLite implementation |
//! | [`models`] | Movie record schema |
//! | [`literal`] | Parser for stringified language lists |
//! | [`ingest`] | CSV validation, coercion and bulk insert |
//! | [`query`] | Filter/sort allow-listing and pagination |
//! | [`indexes`] | Index bootstrap |
//! | [`server`] | HTTP API |
//! | [`error`] | Request-facing error type |
//! | [`logging`] | Structured JSON logs |

pub mod config;
pub mod db;
pub mod error;
pub mod indexes;
pub mod ingest;
pub mod literal;
pub mod logging;
pub mod models;
pub mod query;
pub mod server;
pub mod store;

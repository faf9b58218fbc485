//! Lead Marketplace API Library
//!
//! Turns an external call log feed into scored, priced leads and lets
//! subscribing clinics buy each lead exclusively.
//!
//! # Modules
//!
//! - `feed_parser`: CSV feed to typed call rows.
//! - `classifier`: Tier, score, location and name heuristics.
//! - `feed_client`: HTTP download of the feed.
//! - `ingestion`: One ingestion cycle and its report.
//! - `poller`: Periodic ingestion in the background.
//! - `store`: Lead store trait with Postgres and in-memory backends.
//! - `claims`: Pricing, reservations and the exclusive claim.
//! - `auth`: Caller identity from gateway headers.
//! - `handlers`: HTTP request handlers and router.
//! - `openapi`: Generated OpenAPI document.
//! - `config`: Configuration management.
//! - `db`: Database pool and migrations.
//! - `errors`: Error handling types.
//! - `models`: Core data models and API views.

pub mod auth;
pub mod claims;
pub mod classifier;
pub mod config;
pub mod db;
pub mod errors;
pub mod feed_client;
pub mod feed_parser;
pub mod handlers;
pub mod ingestion;
pub mod models;
pub mod openapi;
pub mod poller;
pub mod store;

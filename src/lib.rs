//! feedhub - a content aggregation backend
//!
//! Articles from syndicated feeds are grouped into themes, ranked by a search
//! index and served as JSON, decorated with each user's collections and notes.

pub mod config;
pub mod db;
pub mod error;
pub mod listing;
pub mod models;
pub mod routes;
pub mod search;

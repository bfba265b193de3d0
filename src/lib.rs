//! Postage-stamp image catalog: scan folders, describe stamps with a local
//! vision model, gate near-duplicates, edit and tag records, export.

pub mod config;
pub mod core;
pub mod database;
pub mod logging;
pub mod services;

pub use config::{AppConfig, Paths};
pub use database::{Database, DatabaseError};

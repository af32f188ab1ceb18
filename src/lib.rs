//! Haber Akışı - RSS news ingestion pipeline
//!
//! This crate pulls articles from a registry of RSS/Atom sources, normalizes
//! them into a uniform record (summary, image, reading time, optional
//! translation) and stores them deduplicated by URL behind a JSON API.

pub mod config;
pub mod db;
pub mod error;
pub mod fetcher;
pub mod ingest;
pub mod normalizer;
pub mod routes;
pub mod scheduler;
pub mod translation;

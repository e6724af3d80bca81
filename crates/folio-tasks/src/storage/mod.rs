//! Storage backends implementing `DocumentRepository`
//!
//! Provides an in-memory store and SQLite-based persistence.

mod database;
mod memory;

pub use database::SqliteRepository;
pub use memory::InMemoryRepository;

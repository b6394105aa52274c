//! Media library metadata and thumbnail pipeline.
//!
//! Albums are directory trees registered in a SQLite catalog. An update run
//! ([`process::UpdateMetadataProcess`]) keeps the catalog in step with the
//! disk, extracts metadata for new files and renders their thumbnails.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod process;
pub mod scanner;
pub mod tools;

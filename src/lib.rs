//! Consent-aware footage processing: watch folder ingest, frame extraction,
//! face detection and matching against consent reference photos.

pub mod config;
pub mod db;
pub mod engine;
pub mod logging;
pub mod monitor;
pub mod pipeline;
pub mod scanner;
pub mod tasks;

pub use config::{Config, ProcessingConfig};
pub use db::Database;
pub use pipeline::{run_card_task, start_processing, stop_processing, Engines};

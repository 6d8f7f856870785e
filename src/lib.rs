// src/lib.rs

pub mod config;
pub mod context;
pub mod error;
pub mod generation;
pub mod history;
pub mod interpret;
pub mod languages;
pub mod logging;
pub mod model;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod tasks;

pub use config::HistorianConfig;
pub use error::{HistorianError, Result};
pub use service::{Historian, Ingestion};
pub use store::Store;

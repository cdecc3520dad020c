//! Urban tree registry, care log and plant identification.

pub mod analytics;
pub mod bulk;
pub mod classifier;
pub mod config;
pub mod db;
pub mod export;
pub mod health;
pub mod identify;
pub mod import;
pub mod models;
pub mod storage;
pub mod tabular;
pub mod throttle;

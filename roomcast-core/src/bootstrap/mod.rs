//! Bootstrap helpers for the `roomcast` server binary

pub mod config;

pub use config::load_config;

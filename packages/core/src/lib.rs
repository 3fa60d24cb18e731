// Library root — exposes internal modules for integration tests in `tests/`.
// Production entry point remains `src/main.rs`.

pub mod api;
pub mod cache;
pub mod db;
pub mod metrics;
pub mod reconcile;
pub mod repository;
pub mod scheduler;

// These modules are only needed by the binary.
pub mod cli;
pub mod config;
pub mod logging;

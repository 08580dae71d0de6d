// Library root: exposes internal modules for integration tests in `tests/`.
// Production entry point remains `src/main.rs`.

pub mod api;
pub mod cache;
pub mod controller;
pub mod error;
pub mod history;
pub mod metrics;
pub mod postgres;
pub mod scheduler;
pub mod services;
pub mod state;
pub mod supervisor;
pub mod types;

// Needed by the binary; public so integration tests can build configs.
pub mod cli;
pub mod config;
pub mod logging;

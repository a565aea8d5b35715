//! Observability: structured logging

mod logger;

pub use logger::{Logger, Severity};

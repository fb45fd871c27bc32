//! Declarative configuration: raw schema, normalized model, loader, watcher.

pub mod loader;
pub mod model;
pub mod schema;
pub mod watcher;

pub use loader::{load, ConfigError};
pub use model::Config;

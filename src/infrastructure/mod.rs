pub mod config;
pub mod container;
pub mod database;
pub mod external_services;
pub mod messaging;

// Re-export commonly used items
pub use config::AppConfig;
pub use container::AppContainer;
pub use database::{DbPool, create_connection_pool, run_migrations};

pub mod api;
pub mod buildinfo;
pub mod config;
pub mod db;
pub mod error;
pub mod logger;
pub mod server;
pub mod store;

pub use config::Config;
pub use db::{Database, Tracer, TracerConfig};
pub use error::AppError;
pub use store::{Store, StoreError};

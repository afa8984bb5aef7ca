pub mod cache;
pub mod config;
pub mod engine;
pub mod store;
pub mod wal;

pub use config::EngineConfig;
pub use engine::{CancelToken, Engine};
pub use store::{MetaStore, SqliteMetaStore};

pub mod alphabet;
pub mod collector;
pub mod config;
pub mod delay_manager;
pub mod directory;
pub mod error;
pub mod http_directory;
pub mod logger;
pub mod member;
pub mod prompt;
pub mod record_table;
pub mod resume_manager;
pub mod store;

// Exporting types for convenience
pub use collector::{Collector, CollectionSettings, RunOutcome, Summary};
pub use config::CollectorConfig;
pub use delay_manager::DelayManager;
pub use directory::{DirectorySearch, SearchError};
pub use error::CollectorError;
pub use http_directory::HttpDirectory;
pub use member::{Member, Record};
pub use resume_manager::Checkpoint;
pub use store::{DurableStore, FileStore, StoreError};

pub mod database;
pub mod process;
pub mod services;
pub mod state;
pub mod version;

pub use database::{Database, DatabaseSetupError};
pub use services::{Services, ServicesError};
pub use state::{AppConfig, AppState, BlobStoreBackend, BlobStoreEntry, StateError};

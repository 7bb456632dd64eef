pub mod config;
pub mod error;
pub mod types;

pub use config::AppConfig;
pub use error::{DynamisError, DynamisResult, ProviderError};
pub use types::{EncryptionContext, Record};

pub mod config;
pub mod error;
pub mod types;

pub use config::{
    ApiConfig, EmbeddingBackend, EmbeddingConfig, GeneralConfig, IndexBackend, IndexConfig,
    PoisonPolicy, StreamConfig, TwiderConfig,
};
pub use error::{Result, TwiderError};
pub use types::*;

pub mod config;
pub mod error;
pub mod file_config;
pub mod topics;
pub mod types;

pub use config::AppConfig;
pub use error::{PipelineError, PipelineResult};
pub use file_config::{load_config, BusConfig, FileConfig, ModelsConfig, PipelineConfig, ServerConfig};
pub use types::*;

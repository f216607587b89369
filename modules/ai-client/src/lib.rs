pub mod error;
pub mod openai;
pub mod traits;

pub use error::AiError;
pub use openai::OpenAi;
pub use traits::{EmbedAgent, LabelAgent};

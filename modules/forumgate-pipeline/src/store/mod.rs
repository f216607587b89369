//! Production adapters for the trait seams in `traits`.

pub mod admissions;
pub mod discord;
pub mod openai;
pub mod vectors;

pub use admissions::PgAdmissionStore;
pub use discord::DiscordDirectory;
pub use openai::OpenAiAdapter;
pub use vectors::{PgVectorIndex, KNOWLEDGE_INDEX, POST_INDEX};

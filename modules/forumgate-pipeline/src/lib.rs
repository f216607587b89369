//! Ingestion, dedup and routing stages for community forum traffic.
//!
//! Raw messages pass an idempotent ingestion gate, admitted forum posts are
//! classified as unique or duplicate by vector similarity, and decisions are
//! routed to downstream topics. Every stage is a stateless bus handler; all
//! collaborators sit behind the traits in [`traits`].

pub mod alerts;
pub mod classifier;
pub mod deadline;
pub mod deps;
pub mod gate;
pub mod handlers;
pub mod knowledge;
pub mod notifier;
pub mod outcome;
pub mod router;
pub mod store;
pub mod tagger;
pub mod traits;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use alerts::ConversationAlerts;
pub use classifier::{ClassifierConfig, SimilarityClassifier};
pub use deps::PipelineDeps;
pub use gate::{Admission, GateConfig, IdempotentIngestionGate};
pub use knowledge::{KnowledgeBase, KnowledgeConfig};
pub use notifier::DuplicateNotifier;
pub use outcome::Outcome;
pub use router::EventRouter;
pub use tagger::ForumPostTagger;

use std::sync::Arc;

use forumgate_common::topics::{
    ADMITTED_COMMUNITY_MESSAGES, ADMITTED_FORUM_POSTS, DUPLICATE_FORUM_POSTS, RAW_MESSAGES,
};
use forumgate_common::FileConfig;
use forumgate_events::{DeliveryHandler, EventBus, Subscription};

use crate::alerts::ConversationAlerts;
use crate::classifier::SimilarityClassifier;
use crate::gate::{GateConfig, IdempotentIngestionGate};
use crate::handlers::{AlertHandler, ClassifyHandler, IngestHandler, NotifyDuplicateHandler, TagHandler};
use crate::knowledge::KnowledgeBase;
use crate::notifier::DuplicateNotifier;
use crate::router::EventRouter;
use crate::tagger::ForumPostTagger;
use crate::traits::{
    AdmissionStore, LabelClassifier, TextEmbedder, ThreadDirectory, TopicMatcher, VectorIndex,
};

/// Every external collaborator of the pipeline, constructed once at startup.
#[derive(Clone)]
pub struct PipelineDeps {
    pub bus: Arc<dyn EventBus>,
    pub admissions: Arc<dyn AdmissionStore>,
    pub embedder: Arc<dyn TextEmbedder>,
    /// Vectors of unique forum posts.
    pub post_index: Arc<dyn VectorIndex>,
    /// Vectors of knowledge base articles.
    pub knowledge_index: Arc<dyn VectorIndex>,
    pub labels: Arc<dyn LabelClassifier>,
    pub topics: Arc<dyn TopicMatcher>,
    pub directory: Arc<dyn ThreadDirectory>,
    pub config: Arc<FileConfig>,
}

impl PipelineDeps {
    pub fn forum_gate(&self) -> IdempotentIngestionGate {
        let p = &self.config.pipeline;
        IdempotentIngestionGate::new(
            GateConfig::forum_posts(&p.forum_channel_id),
            self.admissions.clone(),
            self.bus.clone(),
            p.call_timeout(),
        )
        .with_directory(self.directory.clone())
    }

    pub fn community_gate(&self) -> IdempotentIngestionGate {
        let p = &self.config.pipeline;
        IdempotentIngestionGate::new(
            GateConfig::community_messages(&p.community_channel_id),
            self.admissions.clone(),
            self.bus.clone(),
            p.call_timeout(),
        )
    }

    pub fn router(&self) -> EventRouter {
        EventRouter::new(self.bus.clone(), self.config.pipeline.call_timeout())
    }

    pub fn classifier(&self) -> SimilarityClassifier {
        SimilarityClassifier::new(
            self.directory.clone(),
            self.embedder.clone(),
            self.post_index.clone(),
            self.router(),
            (&self.config.pipeline).into(),
        )
    }

    pub fn tagger(&self) -> ForumPostTagger {
        ForumPostTagger::new(
            self.directory.clone(),
            self.labels.clone(),
            (&self.config.pipeline).into(),
        )
    }

    pub fn notifier(&self) -> DuplicateNotifier {
        DuplicateNotifier::new(self.directory.clone(), self.config.pipeline.call_timeout())
    }

    pub fn alerts(&self) -> ConversationAlerts {
        ConversationAlerts::new(
            self.topics.clone(),
            self.directory.clone(),
            self.admissions.clone(),
            self.config.alerts.clone(),
            self.config.pipeline.call_timeout(),
        )
    }

    pub fn knowledge_base(&self) -> KnowledgeBase {
        KnowledgeBase::new(
            self.embedder.clone(),
            self.knowledge_index.clone(),
            (&self.config.pipeline).into(),
        )
    }

    fn subscription(&self, name: &str, topic: &str) -> Subscription {
        Subscription::builder()
            .name(name)
            .topic(topic)
            .max_retries(self.config.bus.max_retries)
            .build()
    }

    /// Every bus subscription of the pipeline with its handler.
    pub fn subscriptions(&self) -> Vec<(Subscription, Arc<dyn DeliveryHandler>)> {
        let gates = vec![Arc::new(self.forum_gate()), Arc::new(self.community_gate())];

        vec![
            (
                self.subscription("ingestion-gate", RAW_MESSAGES),
                Arc::new(IngestHandler::new(gates)) as Arc<dyn DeliveryHandler>,
            ),
            (
                self.subscription("forum-post-classifier", ADMITTED_FORUM_POSTS),
                Arc::new(ClassifyHandler::new(Arc::new(self.classifier()))),
            ),
            (
                self.subscription("forum-post-tagger", ADMITTED_FORUM_POSTS),
                Arc::new(TagHandler::new(Arc::new(self.tagger()))),
            ),
            (
                self.subscription("dup-forum-post-handler", DUPLICATE_FORUM_POSTS),
                Arc::new(NotifyDuplicateHandler::new(Arc::new(self.notifier()))),
            ),
            (
                self.subscription("conversation-alerter", ADMITTED_COMMUNITY_MESSAGES),
                Arc::new(AlertHandler::new(Arc::new(self.alerts()))),
            ),
        ]
    }
}

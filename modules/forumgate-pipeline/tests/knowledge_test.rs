use std::sync::Arc;

use serde_json::json;

use forumgate_common::{KnowledgeArticle, PipelineError};
use forumgate_pipeline::knowledge::article_id;
use forumgate_pipeline::testing::*;
use forumgate_pipeline::traits::VectorMatch;
use forumgate_pipeline::{KnowledgeBase, KnowledgeConfig};

fn article_match(id: &str, score: f32) -> VectorMatch {
    VectorMatch {
        id: id.to_string(),
        score,
        metadata: Some(json!({
            "url": format!("https://docs.example.com/{id}"),
            "title": format!("Title {id}"),
            "text": format!("Body {id}"),
        })),
    }
}

fn knowledge_base(index: MemoryVectorIndex) -> (KnowledgeBase, Arc<MemoryVectorIndex>) {
    let index = Arc::new(index);
    let kb = KnowledgeBase::new(
        Arc::new(FixedEmbedder::new()),
        index.clone(),
        KnowledgeConfig::builder().build(),
    );
    (kb, index)
}

#[tokio::test]
async fn relevance_threshold_is_strict() {
    let (kb, _) = knowledge_base(MemoryVectorIndex::new().with_matches(vec![
        article_match("a", 0.31),
        article_match("b", 0.3),
        article_match("c", 0.1),
    ]));

    let articles = kb.find_relevant("how do I deploy").await.unwrap();

    assert_eq!(articles.len(), 1);
    assert_eq!(articles[0].id, "a");
    assert_eq!(articles[0].url, "https://docs.example.com/a");
    assert_eq!(articles[0].title, "Title a");
}

#[tokio::test]
async fn nothing_relevant_is_an_empty_list() {
    let (kb, _) = knowledge_base(MemoryVectorIndex::new().with_matches(vec![article_match("a", 0.2)]));
    assert!(kb.find_relevant("unrelated").await.unwrap().is_empty());
}

#[tokio::test]
async fn at_most_top_k_articles() {
    let (kb, _) = knowledge_base(MemoryVectorIndex::new().with_matches(vec![
        article_match("a", 0.9),
        article_match("b", 0.8),
        article_match("c", 0.7),
        article_match("d", 0.6),
    ]));
    let ids: Vec<String> = kb
        .find_relevant("q")
        .await
        .unwrap()
        .into_iter()
        .map(|a| a.id)
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn relevant_match_without_metadata_is_an_invariant_violation() {
    let (kb, _) = knowledge_base(MemoryVectorIndex::new().with_matches(vec![VectorMatch {
        id: "a".into(),
        score: 0.9,
        metadata: Some(json!({"url": "u"})),
    }]));

    let err = kb.find_relevant("q").await.unwrap_err();
    assert!(matches!(err, PipelineError::InvariantViolation(_)));
}

#[tokio::test]
async fn indexed_articles_are_found_again() {
    let (kb, index) = knowledge_base(MemoryVectorIndex::new());
    let article = KnowledgeArticle {
        id: String::new(),
        url: "https://docs.example.com/deploy".into(),
        title: "Deploying".into(),
        text: "Run the deploy command from the project root.".into(),
    };

    assert_eq!(kb.index_articles(std::slice::from_ref(&article)).await.unwrap(), 1);
    let id = article_id(&article.url);
    assert_eq!(index.metadata(&id).unwrap()["title"], "Deploying");

    // Same text embeds to the same vector: similarity 1.
    let found = kb.find_relevant(&article.text).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, id);
    assert_eq!(found[0].url, article.url);
}

#[tokio::test]
async fn reindexing_a_url_overwrites_it() {
    let (kb, index) = knowledge_base(MemoryVectorIndex::new());
    let mut article = KnowledgeArticle {
        id: String::new(),
        url: "https://docs.example.com/deploy".into(),
        title: "Deploying".into(),
        text: "v1".into(),
    };
    kb.index_articles(std::slice::from_ref(&article)).await.unwrap();
    article.text = "v2".into();
    kb.index_articles(std::slice::from_ref(&article)).await.unwrap();

    assert_eq!(index.len(), 1);
    assert_eq!(index.metadata(&article_id(&article.url)).unwrap()["text"], "v2");
}

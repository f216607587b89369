use anyhow::Result;
use async_trait::async_trait;
use pgvector::Vector;
use sqlx::PgPool;

use crate::traits::{VectorIndex, VectorMatch};

/// Index of unique forum posts.
pub const POST_INDEX: &str = "forum-posts";
/// Index of knowledge base articles.
pub const KNOWLEDGE_INDEX: &str = "knowledge-base";

/// One named index in the `vectors` table, scored by cosine similarity.
#[derive(Clone)]
pub struct PgVectorIndex {
    pool: PgPool,
    index_name: String,
}

#[derive(sqlx::FromRow)]
struct MatchRow {
    id: String,
    score: f64,
    metadata: Option<serde_json::Value>,
}

impl PgVectorIndex {
    pub fn new(pool: PgPool, index_name: impl Into<String>) -> Self {
        Self {
            pool,
            index_name: index_name.into(),
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }
}

#[async_trait]
impl VectorIndex for PgVectorIndex {
    async fn upsert(&self, id: &str, vector: Vec<f32>, metadata: serde_json::Value) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO vectors (index_name, id, embedding, metadata)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (index_name, id)
            DO UPDATE SET embedding = EXCLUDED.embedding,
                          metadata = EXCLUDED.metadata,
                          updated_at = now()
            "#,
        )
        .bind(&self.index_name)
        .bind(id)
        .bind(Vector::from(vector))
        .bind(&metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<VectorMatch>> {
        let rows = sqlx::query_as::<_, MatchRow>(
            r#"
            SELECT id,
                   1 - (embedding <=> $2) AS score,
                   CASE WHEN $4 THEN metadata END AS metadata
            FROM vectors
            WHERE index_name = $1
            ORDER BY embedding <=> $2, id
            LIMIT $3
            "#,
        )
        .bind(&self.index_name)
        .bind(Vector::from(vector))
        .bind(top_k as i64)
        .bind(include_metadata)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| VectorMatch {
                id: row.id,
                score: row.score as f32,
                metadata: row.metadata,
            })
            .collect())
    }
}

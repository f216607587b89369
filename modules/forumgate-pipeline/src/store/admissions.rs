use anyhow::Result;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use forumgate_common::AdmissionRecord;

use crate::traits::{AdmissionStore, AdmissionTx};

/// Admission records in the `admissions` table.
#[derive(Clone)]
pub struct PgAdmissionStore {
    pool: PgPool,
}

impl PgAdmissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

struct PgAdmissionTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl AdmissionStore for PgAdmissionStore {
    async fn begin(&self) -> Result<Box<dyn AdmissionTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgAdmissionTx { tx }))
    }

    async fn is_admitted(&self, stream: &str, external_id: &str) -> Result<bool> {
        let (exists,) = sqlx::query_as::<_, (bool,)>(
            "SELECT EXISTS(SELECT 1 FROM admissions WHERE stream = $1 AND external_id = $2)",
        )
        .bind(stream)
        .bind(external_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }
}

#[async_trait]
impl AdmissionTx for PgAdmissionTx {
    async fn insert_or_skip(&mut self, record: &AdmissionRecord) -> Result<u64> {
        let result = sqlx::query(
            r#"
            INSERT INTO admissions (id, stream, external_id, admitted_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (stream, external_id) DO NOTHING
            "#,
        )
        .bind(record.id)
        .bind(&record.stream)
        .bind(&record.external_id)
        .bind(record.admitted_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

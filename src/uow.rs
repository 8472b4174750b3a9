use sqlx::postgres::Postgres;
use sqlx::{PgConnection, PgPool, Transaction};
use tokio::time::Instant;

use crate::error::IndexerResult;

/// Transaction boundary for a processing cycle. Everything written through
/// one `DbTransaction` commits or rolls back together; dropping it without
/// `commit()` rolls back.
#[derive(Clone)]
pub struct UnitOfWork {
    pool: PgPool,
}

impl UnitOfWork {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> IndexerResult<DbTransaction> {
        let tx = self.pool.begin().await?;
        Ok(DbTransaction {
            tx,
            started: Instant::now(),
        })
    }
}

pub struct DbTransaction {
    tx: Transaction<'static, Postgres>,
    started: Instant,
}

impl DbTransaction {
    pub fn conn(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    pub async fn commit(self) -> IndexerResult<()> {
        let Self { tx, started } = self;
        tx.commit().await?;
        tracing::debug!(
            duration_ms = started.elapsed().as_millis() as u64,
            "transaction committed"
        );
        Ok(())
    }
}

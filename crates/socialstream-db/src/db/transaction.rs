//! Database transaction utilities

use socialstream_core::AppError;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

use super::store::IsolationLevel;

/// A database transaction wrapper that tracks whether it was finished.
///
/// # Example
///
/// ```ignore
/// use socialstream_db::{IsolationLevel, TransactionGuard};
///
/// async fn example(pool: &sqlx::PgPool) -> Result<(), socialstream_core::AppError> {
///     let mut tx = TransactionGuard::begin(pool, IsolationLevel::Serializable).await?;
///     sqlx::query("UPDATE media SET ...").execute(tx.conn()?).await?;
///     tx.commit().await
/// }
/// ```
pub struct TransactionGuard {
    transaction: Option<Transaction<'static, Postgres>>,
}

impl TransactionGuard {
    /// Begin a new database transaction at the given isolation level
    pub async fn begin(pool: &PgPool, isolation: IsolationLevel) -> Result<Self, AppError> {
        let mut transaction = pool.begin().await?;

        // Must be the first statement of the transaction.
        if isolation == IsolationLevel::Serializable {
            sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
                .execute(&mut *transaction)
                .await?;
        }

        Ok(Self {
            transaction: Some(transaction),
        })
    }

    /// Connection of the open transaction.
    pub fn conn(&mut self) -> Result<&mut PgConnection, AppError> {
        self.transaction
            .as_mut()
            .map(|tx| &mut **tx)
            .ok_or_else(|| {
                AppError::Internal("Transaction was already committed or rolled back".to_string())
            })
    }

    /// Commit the transaction
    pub async fn commit(mut self) -> Result<(), AppError> {
        if let Some(tx) = self.transaction.take() {
            tx.commit().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to commit database transaction");
                AppError::from(e)
            })?;
        }
        Ok(())
    }

    /// Rollback the transaction
    pub async fn rollback(mut self) -> Result<(), AppError> {
        if let Some(tx) = self.transaction.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}

impl Drop for TransactionGuard {
    fn drop(&mut self) {
        // sqlx rolls back a dropped Transaction when its connection returns to the pool.
        if self.transaction.is_some() {
            tracing::warn!(
                "Transaction was dropped without explicit commit or rollback - rolling back"
            );
        }
    }
}

//! Side effects raced against an operation budget.

use socialstream_core::AppError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Run `side_effect` on its own task and wait at most `budget` for it.
///
/// On expiry the task is cancelled and awaited, so the in-flight future has
/// been dropped by the time this returns `AppError::Timeout`. A panic inside
/// the task surfaces as `AppError::Internal`.
pub async fn race<T, Fut>(
    operation: &'static str,
    budget: Duration,
    side_effect: Fut,
) -> Result<T, AppError>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T, AppError>> + Send + 'static,
{
    let token = CancellationToken::new();
    let child = token.clone();
    let mut handle = tokio::spawn(async move {
        tokio::select! {
            _ = child.cancelled() => None,
            result = side_effect => Some(result),
        }
    });

    match tokio::time::timeout(budget, &mut handle).await {
        Ok(Ok(Some(result))) => result,
        Ok(Ok(None)) => Err(AppError::Internal(format!(
            "{} side effect cancelled before the budget elapsed",
            operation
        ))),
        Ok(Err(join_error)) => Err(AppError::Internal(format!(
            "{} side effect task failed: {}",
            operation, join_error
        ))),
        Err(_) => {
            token.cancel();
            if let Err(join_error) = handle.await {
                tracing::warn!(operation, error = %join_error, "Cancelled side effect task failed");
            }
            tracing::warn!(
                operation,
                budget_ms = budget.as_millis() as u64,
                "Side effect exceeded its budget and was cancelled"
            );
            Err(AppError::Timeout {
                operation,
                budget_ms: budget.as_millis() as u64,
            })
        }
    }
}

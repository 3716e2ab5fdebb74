use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::error::{EventSourcingError, Result};

/// Race `operation` against `token`. A fired token wins and yields
/// `Cancelled`; work the operation already completed is not undone.
pub async fn cancellable<F, T>(token: &CancellationToken, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => {
            tracing::debug!("Operation cancelled");
            Err(EventSourcingError::Cancelled)
        }
        result = operation => result,
    }
}

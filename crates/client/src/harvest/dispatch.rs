//! Bounded fan-out for one harvest stage.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use rctf_mirror_core::Error;

/// Run `branches` concurrently, at most `limiter`'s permit count at a time.
///
/// Results come back in input order. The first failing branch aborts the
/// join: the error is returned immediately and the remaining branches are
/// detached, not cancelled, so anything they are persisting still lands.
pub async fn dispatch<I, Fut, T>(limiter: &Arc<Semaphore>, stage: &'static str, branches: I) -> Result<Vec<T>, Error>
where
    I: IntoIterator<Item = Fut>,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
    T: Send + 'static,
{
    let mut join_set = JoinSet::new();
    let mut spawned = 0usize;

    for (index, branch) in branches.into_iter().enumerate() {
        let limiter = Arc::clone(limiter);
        join_set.spawn(async move {
            let _permit = limiter
                .acquire_owned()
                .await
                .map_err(|e| Error::TaskFailed(format!("{stage}: limiter closed: {e}")))?;
            branch.await.map(|value| (index, value))
        });
        spawned += 1;
    }

    tracing::debug!(stage, branches = spawned, "stage dispatched");

    let mut results = Vec::with_capacity(spawned);
    while let Some(joined) = join_set.join_next().await {
        let outcome = joined.map_err(|e| Error::TaskFailed(format!("{stage}: {e}"))).and_then(|r| r);
        match outcome {
            Ok(item) => results.push(item),
            Err(e) => {
                tracing::error!(stage, error = %e, pending = join_set.len(), "branch failed, aborting stage");
                join_set.detach_all();
                return Err(e);
            }
        }
    }

    results.sort_unstable_by_key(|(index, _)| *index);
    Ok(results.into_iter().map(|(_, value)| value).collect())
}

//! The document store seam.
//!
//! The paper/section/metadata store is an external collaborator; this crate
//! does not implement its queries. What lives here is the *contract* the
//! pipeline consumes — paper record, section fragments, citation sources,
//! author/funding metadata — plus the one piece of fetch behaviour that is
//! this crate's responsibility: rate-limited calls retry with exponential
//! backoff, and nothing else does.

use crate::document::{CitationSource, PaperMeta};
use crate::retry::{run_with_backoff, RetryPolicy, Sleeper};
use serde::{Deserialize, Serialize};
use std::future::Future;
use thiserror::Error;

/// A paper record as the store returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperRecord {
    pub id: u64,
    pub name: String,
    /// Store-side type flag distinguishing papers from other documents.
    pub is_paper: bool,
}

/// One section listing entry; the fragment is fetched separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionRecord {
    pub id: u64,
    pub name: String,
    /// Serialized document fragment (decoded snapshot) for this section.
    pub fragment: String,
}

/// Errors a store implementation reports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// HTTP 429 or equivalent. The only retryable variant.
    #[error("store rate limited the request")]
    RateLimited,
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("store request failed: {0}")]
    Failed(String),
}

/// What the pipeline needs from the paper store.
///
/// Implemented by the hosting service against its persistence layer; tests
/// implement it in memory.
pub trait DocumentStore {
    fn fetch_paper(&self, id: u64) -> impl Future<Output = Result<PaperRecord, StoreError>> + Send;
    fn fetch_sections(
        &self,
        paper_id: u64,
    ) -> impl Future<Output = Result<Vec<SectionRecord>, StoreError>> + Send;
    fn fetch_citations(
        &self,
        paper_id: u64,
    ) -> impl Future<Output = Result<Vec<CitationSource>, StoreError>> + Send;
    fn fetch_meta(&self, paper_id: u64)
        -> impl Future<Output = Result<PaperMeta, StoreError>> + Send;
}

/// Run one store call under the backoff policy.
///
/// Retries [`StoreError::RateLimited`] only; `NotFound` and `Failed`
/// propagate on the first occurrence.
pub async fn fetch_with_backoff<T, F, Fut, S>(
    policy: &RetryPolicy,
    sleeper: &S,
    op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
    S: Sleeper,
{
    run_with_backoff(policy, sleeper, |e| matches!(e, StoreError::RateLimited), op).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct NoopSleeper;
    impl Sleeper for NoopSleeper {
        async fn sleep(&self, _d: Duration) {}
    }

    #[tokio::test]
    async fn rate_limits_are_retried() {
        let calls = Mutex::new(0u32);
        let result = fetch_with_backoff(&RetryPolicy::default(), &NoopSleeper, || {
            let n = {
                let mut c = calls.lock().unwrap();
                *c += 1;
                *c
            };
            async move {
                if n < 3 {
                    Err(StoreError::RateLimited)
                } else {
                    Ok("paper")
                }
            }
        })
        .await;
        assert_eq!(result, Ok("paper"));
        assert_eq!(*calls.lock().unwrap(), 3);
    }

    #[tokio::test]
    async fn not_found_propagates_immediately() {
        let calls = Mutex::new(0u32);
        let result: Result<(), _> =
            fetch_with_backoff(&RetryPolicy::default(), &NoopSleeper, || {
                *calls.lock().unwrap() += 1;
                async { Err(StoreError::NotFound("paper 7".into())) }
            })
            .await;
        assert_eq!(result, Err(StoreError::NotFound("paper 7".into())));
        assert_eq!(*calls.lock().unwrap(), 1);
    }
}

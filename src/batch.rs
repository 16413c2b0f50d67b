use crate::error::ApiError;
use crate::limiter::{RateLimiter, RetryOptions, API_REQUEST_KEY};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::future::Future;

pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Knobs for one `process_batch` invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchOptions {
    pub max_concurrent: usize,
    pub continue_on_error: bool,
    pub retry_on_rate_limit: bool,
    pub retry: RetryOptions,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            continue_on_error: true,
            retry_on_rate_limit: true,
            retry: RetryOptions::default(),
        }
    }
}

/// Outcome of one item, addressed by its position in the original input.
/// Exactly one of `data`/`error` is populated, per `success`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItemResult<T> {
    pub index: usize,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> BatchItemResult<T> {
    fn ok(index: usize, data: T) -> Self {
        Self {
            index,
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn failed(index: usize, error: String) -> Self {
        Self {
            index,
            success: false,
            data: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Aggregate outcome of a batch. `success` is the AND over all items.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult<T> {
    pub success: bool,
    pub results: Vec<BatchItemResult<T>>,
    pub summary: BatchSummary,
}

impl<T> BatchResult<T> {
    /// Unwrap a one-element batch: the item's value becomes the call's
    /// result, the item's recorded error becomes the call's own failure.
    pub fn into_single(mut self) -> Result<T, ApiError> {
        debug_assert_eq!(self.results.len(), 1);
        match self.results.pop() {
            Some(BatchItemResult {
                success: true,
                data: Some(data),
                ..
            }) => Ok(data),
            Some(item) => Err(ApiError::Status {
                code: "operation_failed".into(),
                message: item.error.unwrap_or_else(|| "operation failed".into()),
            }),
            None => Err(ApiError::Status {
                code: "operation_failed".into(),
                message: "empty batch".into(),
            }),
        }
    }
}

/// Tool input normalized at the boundary: either one item or an explicit
/// batch with options. The executor itself only ever sees a `Vec`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ToolRequest<I> {
    Batch {
        items: Vec<I>,
        #[serde(default)]
        options: BatchOptions,
    },
    Single(I),
}

impl<I> ToolRequest<I> {
    /// (items, options, single?) — a single item becomes a 1-element batch
    /// whose result the caller unwraps.
    pub fn into_parts(self) -> (Vec<I>, BatchOptions, bool) {
        match self {
            ToolRequest::Batch { items, options } => (items, options, false),
            ToolRequest::Single(item) => (vec![item], BatchOptions::default(), true),
        }
    }
}

/// Run every item through `op` under a concurrency cap, collecting one
/// result per item in original input order.
///
/// Items are partitioned into consecutive windows of `max_concurrent`;
/// windows run strictly in sequence and a window is fully joined before the
/// next starts, so peak concurrency never exceeds the cap. With
/// `continue_on_error=false` the lowest-index failure in a window aborts the
/// call after the window joins; siblings run to completion but their results
/// are discarded.
pub async fn process_batch<I, T, F, Fut>(
    items: Vec<I>,
    options: &BatchOptions,
    limiter: Option<&RateLimiter>,
    op: F,
) -> Result<BatchResult<T>, ApiError>
where
    I: Clone,
    F: Fn(I, usize) -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let total = items.len();
    let window_size = options.max_concurrent.max(1);
    let indexed: Vec<(usize, I)> = items.into_iter().enumerate().collect();
    let mut results: Vec<BatchItemResult<T>> = Vec::with_capacity(total);
    let op = &op;

    for window in indexed.chunks(window_size) {
        let settled = join_all(window.iter().map(|entry| {
            let (index, item) = entry.clone();
            async move {
                let outcome = match limiter {
                    Some(limiter) if options.retry_on_rate_limit => {
                        limiter
                            .execute_with_retry(API_REQUEST_KEY, &options.retry, || {
                                op(item.clone(), index)
                            })
                            .await
                    }
                    _ => op(item, index).await,
                };
                (index, outcome)
            }
        }))
        .await;

        // join_all yields in dispatch order, so slots land at their original
        // index and the first error seen is the lowest-index one.
        for (index, outcome) in settled {
            match outcome {
                Ok(value) => results.push(BatchItemResult::ok(index, value)),
                Err(err) if options.continue_on_error => {
                    results.push(BatchItemResult::failed(index, err.to_string()));
                }
                Err(err) => return Err(err),
            }
        }
    }

    let succeeded = results.iter().filter(|r| r.success).count();
    Ok(BatchResult {
        success: succeeded == total,
        summary: BatchSummary {
            total,
            succeeded,
            failed: total - succeeded,
        },
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::time::Duration;

    fn opts(max_concurrent: usize, continue_on_error: bool) -> BatchOptions {
        BatchOptions {
            max_concurrent,
            continue_on_error,
            retry_on_rate_limit: false,
            retry: RetryOptions::default(),
        }
    }

    #[tokio::test]
    async fn empty_batch_is_vacuously_successful() {
        let out = process_batch(Vec::<u32>::new(), &opts(5, true), None, |item, _| async move {
            Ok::<_, ApiError>(item)
        })
        .await
        .unwrap();
        assert!(out.success);
        assert!(out.results.is_empty());
        assert_eq!(
            out.summary,
            BatchSummary {
                total: 0,
                succeeded: 0,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn results_keep_input_order_under_shuffled_completion() {
        // Earlier items sleep longer, so completion order is reversed
        // within each window.
        let items: Vec<u64> = (0..9).collect();
        let out = process_batch(items, &opts(3, true), None, |item, index| async move {
            tokio::time::sleep(Duration::from_millis(30 - 10 * (index as u64 % 3))).await;
            Ok::<_, ApiError>(item * 2)
        })
        .await
        .unwrap();
        assert_eq!(out.results.len(), 9);
        for (i, r) in out.results.iter().enumerate() {
            assert_eq!(r.index, i);
            assert_eq!(r.data, Some(i as u64 * 2));
        }
    }

    #[tokio::test]
    async fn peak_concurrency_never_exceeds_cap() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let in_flight = &in_flight;
        let peak = &peak;
        let items: Vec<u32> = (0..10).collect();
        let out = process_batch(items, &opts(3, true), None, |item, _| async move {
            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok::<_, ApiError>(item)
        })
        .await
        .unwrap();
        assert!(out.success);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn partial_failure_scenario_seven_items() {
        let items: Vec<u32> = (0..7).collect();
        let out = process_batch(items, &opts(3, true), None, |item, index| async move {
            if index == 2 || index == 5 {
                Err(ApiError::Status {
                    code: "bad_request".into(),
                    message: format!("item {index} rejected"),
                })
            } else {
                Ok(item)
            }
        })
        .await
        .unwrap();
        assert!(!out.success);
        assert_eq!(
            out.summary,
            BatchSummary {
                total: 7,
                succeeded: 5,
                failed: 2
            }
        );
        for (i, r) in out.results.iter().enumerate() {
            assert_eq!(r.index, i);
            let should_fail = i == 2 || i == 5;
            assert_eq!(r.success, !should_fail);
            assert_eq!(r.data.is_some(), !should_fail);
            assert_eq!(r.error.is_some(), should_fail);
        }
        assert!(out.results[2].error.as_deref().unwrap().contains("item 2"));
    }

    #[tokio::test]
    async fn all_failures_still_produce_full_results() {
        let items: Vec<u32> = (0..4).collect();
        let out = process_batch(items, &opts(2, true), None, |_, index| async move {
            Err::<u32, _>(ApiError::Status {
                code: "conflict".into(),
                message: format!("nope {index}"),
            })
        })
        .await
        .unwrap();
        assert!(!out.success);
        assert_eq!(out.summary.failed, 4);
        assert!(out.results.iter().all(|r| !r.success));
    }

    #[tokio::test]
    async fn abort_mode_propagates_first_failure() {
        let err = process_batch(
            (0..5).collect::<Vec<u32>>(),
            &opts(2, false),
            None,
            |item, index| async move {
                if index >= 2 {
                    Err(ApiError::Status {
                        code: "not_found".into(),
                        message: format!("missing {index}"),
                    })
                } else {
                    Ok(item)
                }
            },
        )
        .await
        .unwrap_err();
        assert_eq!(err.code(), "not_found");
        assert!(err.to_string().contains("missing 2"));
    }

    #[tokio::test]
    async fn rate_limited_items_retry_through_the_limiter() {
        let limiter = RateLimiter::new();
        let rejections = AtomicU32::new(2);
        let options = BatchOptions {
            max_concurrent: 1,
            continue_on_error: true,
            retry_on_rate_limit: true,
            retry: RetryOptions {
                max_retries: 3,
                initial_delay_ms: 1,
                max_delay_ms: 5,
                backoff_multiplier: 2.0,
            },
        };
        let rejections = &rejections;
        let out = process_batch(vec![10u32, 20], &options, Some(&limiter), |item, _| {
            async move {
                if rejections
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    Err(ApiError::RateLimited {
                        message: "throttled".into(),
                        signal: None,
                        retry_after: None,
                    })
                } else {
                    Ok(item)
                }
            }
        })
        .await
        .unwrap();
        assert!(out.success, "rate-limited attempts should retry to success");
        assert_eq!(out.results[0].data, Some(10));
        assert_eq!(out.results[1].data, Some(20));
    }

    #[tokio::test]
    async fn single_unwrap_surfaces_item_error() {
        let out = process_batch(vec![1u32], &opts(5, true), None, |_, _| async {
            Err::<u32, _>(ApiError::Status {
                code: "forbidden".into(),
                message: "no access".into(),
            })
        })
        .await
        .unwrap();
        let err = out.into_single().unwrap_err();
        assert_eq!(err.code(), "operation_failed");
        assert!(err.message().contains("no access"));
    }

    #[test]
    fn tool_request_normalization() {
        let single: ToolRequest<serde_json::Value> =
            serde_json::from_value(serde_json::json!({"name": "web-01"})).unwrap();
        let (items, options, is_single) = single.into_parts();
        assert!(is_single);
        assert_eq!(items.len(), 1);
        assert_eq!(options, BatchOptions::default());

        let batch: ToolRequest<serde_json::Value> = serde_json::from_value(serde_json::json!({
            "items": [{"name": "a"}, {"name": "b"}],
            "options": {"max_concurrent": 2, "continue_on_error": false}
        }))
        .unwrap();
        let (items, options, is_single) = batch.into_parts();
        assert!(!is_single);
        assert_eq!(items.len(), 2);
        assert_eq!(options.max_concurrent, 2);
        assert!(!options.continue_on_error);
        assert!(options.retry_on_rate_limit);
    }
}

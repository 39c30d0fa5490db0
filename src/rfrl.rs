use std::future::Future;
use tokio::sync::mpsc;

/// Resolve the first success, reject only when all attempts have failed.
///
/// Every attempt starts immediately. The first `Ok` is returned as the
/// sole winner; remaining attempts keep running detached and their
/// results are discarded. Only once every attempt has failed does the
/// call return `Err`, carrying each attempt's error at its original
/// index. An empty attempt list rejects immediately.
pub async fn resolve_first_reject_last<T, E, F>(attempts: Vec<F>) -> Result<T, Vec<Option<E>>>
where
    F: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let total = attempts.len();
    if total == 0 {
        return Err(Vec::new());
    }

    let (tx, mut rx) = mpsc::channel::<(usize, Result<T, E>)>(total);
    for (idx, attempt) in attempts.into_iter().enumerate() {
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = attempt.await;
            // The receiver is gone once a winner was chosen; losers
            // finish silently.
            let _ = tx.send((idx, result)).await;
        });
    }
    drop(tx);

    let mut errors: Vec<Option<E>> = std::iter::repeat_with(|| None).take(total).collect();
    let mut failed = 0usize;
    while let Some((idx, result)) = rx.recv().await {
        match result {
            Ok(value) => return Ok(value),
            Err(err) => {
                errors[idx] = Some(err);
                failed += 1;
                if failed == total {
                    return Err(errors);
                }
            }
        }
    }
    Err(errors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::sleep;

    #[tokio::test]
    async fn single_success_wins() {
        let result: Result<u32, Vec<Option<String>>> =
            resolve_first_reject_last(vec![async { Ok::<_, String>(7) }]).await;
        assert_eq!(result.expect("winner"), 7);
    }

    #[tokio::test]
    async fn slow_success_beats_fast_failures() {
        let attempts = vec![
            Box::pin(async {
                sleep(Duration::from_millis(5)).await;
                Err::<u32, _>("fast fail".to_string())
            }) as std::pin::Pin<Box<dyn Future<Output = Result<u32, String>> + Send>>,
            Box::pin(async {
                sleep(Duration::from_millis(40)).await;
                Ok(42)
            }),
            Box::pin(async { Err("instant fail".to_string()) }),
        ];
        let result = resolve_first_reject_last(attempts).await;
        assert_eq!(result.expect("winner"), 42);
    }

    #[tokio::test]
    async fn first_completed_success_wins_regardless_of_order() {
        let attempts = vec![
            Box::pin(async {
                sleep(Duration::from_millis(50)).await;
                Ok::<_, String>("slow")
            }) as std::pin::Pin<Box<dyn Future<Output = Result<&str, String>> + Send>>,
            Box::pin(async {
                sleep(Duration::from_millis(5)).await;
                Ok("quick")
            }),
        ];
        let result = resolve_first_reject_last(attempts).await;
        assert_eq!(result.expect("winner"), "quick");
    }

    #[tokio::test]
    async fn all_failures_preserve_index_order() {
        let attempts = vec![
            Box::pin(async {
                sleep(Duration::from_millis(20)).await;
                Err::<u32, _>("a".to_string())
            }) as std::pin::Pin<Box<dyn Future<Output = Result<u32, String>> + Send>>,
            Box::pin(async { Err("b".to_string()) }),
            Box::pin(async {
                sleep(Duration::from_millis(10)).await;
                Err("c".to_string())
            }),
        ];
        let errors = resolve_first_reject_last(attempts)
            .await
            .expect_err("all failed");
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].as_deref(), Some("a"));
        assert_eq!(errors[1].as_deref(), Some("b"));
        assert_eq!(errors[2].as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn empty_attempt_list_rejects() {
        let result: Result<u32, Vec<Option<String>>> =
            resolve_first_reject_last(Vec::<std::pin::Pin<
                Box<dyn Future<Output = Result<u32, String>> + Send>,
            >>::new())
            .await;
        assert!(result.expect_err("rejects").is_empty());
    }
}

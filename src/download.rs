//! Concurrent batch execution with order-preserving results.
//!
//! A bounded pool of scoped OS threads pulls item indices from a shared
//! atomic counter and sends `(index, result)` back over a channel; the
//! calling thread writes each result into an index-addressed slot vector, so
//! output order always equals input order regardless of completion order.
//! Network fetches are the only blocking work inside a worker.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use thiserror::Error;

/// What to do when one item of a batch fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// First failure cancels not-yet-started work and fails the whole batch.
    FailFast,
    /// Failing items are recorded and omitted; the batch still succeeds.
    SkipErrors,
}

/// The failure that terminated a fail-fast batch.
#[derive(Debug, Error)]
#[error("batch item {index} failed: {error}")]
pub struct BatchFailure<E: std::error::Error + 'static> {
    /// Input index of the triggering item (lowest among observed failures).
    pub index: usize,
    #[source]
    pub error: E,
}

/// Outcome of a completed batch. `results[i]` is `None` only for items that
/// failed in skip-errors mode; `failures` lists them in input order.
#[derive(Debug)]
pub struct BatchReport<R, E> {
    pub results: Vec<Option<R>>,
    pub failures: Vec<(usize, E)>,
}

impl<R, E> BatchReport<R, E> {
    /// Surviving results in input order (index gaps simply absent).
    pub fn into_ordered(self) -> Vec<R> {
        self.results.into_iter().flatten().collect()
    }
}

/// Run `worker` over every item with up to `jobs` concurrent workers.
///
/// `progress` is invoked on the calling thread with (completed, total) after
/// each item finishes. With `jobs <= 1` or a single item, execution is
/// strictly sequential with identical semantics. In fail-fast mode,
/// dispatched-but-unfinished work is awaited and its results discarded; the
/// cancel flag only stops workers from claiming new items.
pub fn run_batch<T, R, E, F>(
    items: &[T],
    jobs: usize,
    mode: FailureMode,
    progress: Option<&dyn Fn(usize, usize)>,
    worker: F,
) -> Result<BatchReport<R, E>, BatchFailure<E>>
where
    T: Sync,
    R: Send,
    E: Send + std::error::Error + 'static,
    F: Fn(usize, &T) -> Result<R, E> + Sync,
{
    let total = items.len();
    let mut slots: Vec<Option<R>> = Vec::with_capacity(total);
    slots.resize_with(total, || None);
    let mut failures: Vec<(usize, E)> = Vec::new();

    if total == 0 {
        return Ok(BatchReport {
            results: slots,
            failures,
        });
    }

    if jobs <= 1 || total == 1 {
        for (idx, item) in items.iter().enumerate() {
            match worker(idx, item) {
                Ok(result) => slots[idx] = Some(result),
                Err(error) => match mode {
                    FailureMode::FailFast => return Err(BatchFailure { index: idx, error }),
                    FailureMode::SkipErrors => failures.push((idx, error)),
                },
            }
            if let Some(progress) = progress {
                progress(idx + 1, total);
            }
        }
        return Ok(BatchReport {
            results: slots,
            failures,
        });
    }

    let mut first_failure: Option<(usize, E)> = None;
    let next = AtomicUsize::new(0);
    let cancelled = AtomicBool::new(false);
    std::thread::scope(|scope| {
        let (tx, rx) = mpsc::channel::<(usize, Result<R, E>)>();
        let worker = &worker;
        let next = &next;
        let cancelled = &cancelled;
        for _ in 0..jobs.min(total) {
            let tx = tx.clone();
            scope.spawn(move || loop {
                if cancelled.load(Ordering::Relaxed) {
                    break;
                }
                let idx = next.fetch_add(1, Ordering::Relaxed);
                if idx >= total {
                    break;
                }
                if tx.send((idx, worker(idx, &items[idx]))).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        let mut done = 0;
        for (idx, result) in rx {
            done += 1;
            match result {
                Ok(r) => slots[idx] = Some(r),
                Err(error) => match mode {
                    FailureMode::FailFast => {
                        cancelled.store(true, Ordering::Relaxed);
                        let is_first = first_failure.as_ref().map_or(true, |(i, _)| idx < *i);
                        if is_first {
                            first_failure = Some((idx, error));
                        }
                    }
                    FailureMode::SkipErrors => failures.push((idx, error)),
                },
            }
            if let Some(progress) = progress {
                progress(done, total);
            }
        }
    });

    if let Some((index, error)) = first_failure {
        return Err(BatchFailure { index, error });
    }
    failures.sort_by_key(|(idx, _)| *idx);
    Ok(BatchReport {
        results: slots,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn boom(msg: &str) -> io::Error {
        io::Error::new(io::ErrorKind::Other, msg.to_string())
    }

    #[test]
    fn results_preserve_input_order_under_variable_latency() {
        let items = vec!["A", "B", "C", "D", "E"];
        let report = run_batch(&items, 3, FailureMode::FailFast, None, |idx, item| {
            // Earlier items sleep longer, so completion order is reversed.
            std::thread::sleep(Duration::from_millis((5 - idx as u64) * 10));
            Ok::<_, io::Error>(item.to_string())
        })
        .unwrap();
        let ordered = report.into_ordered();
        assert_eq!(ordered, vec!["A", "B", "C", "D", "E"]);
    }

    #[test]
    fn skip_errors_omits_failures_preserving_relative_order() {
        let items: Vec<usize> = (0..6).collect();
        let report = run_batch(&items, 3, FailureMode::SkipErrors, None, |idx, item| {
            if idx == 1 || idx == 3 {
                Err(boom("nope"))
            } else {
                Ok(*item)
            }
        })
        .unwrap();
        assert_eq!(report.results[1], None);
        assert_eq!(report.results[3], None);
        let failed: Vec<usize> = report.failures.iter().map(|(i, _)| *i).collect();
        assert_eq!(failed, vec![1, 3]);
        assert_eq!(report.into_ordered(), vec![0, 2, 4, 5]);
    }

    #[test]
    fn fail_fast_reports_triggering_index() {
        let items: Vec<usize> = (0..4).collect();
        let err = run_batch(&items, 2, FailureMode::FailFast, None, |idx, _| {
            if idx == 2 {
                Err(boom("broken"))
            } else {
                std::thread::sleep(Duration::from_millis(5));
                Ok::<usize, io::Error>(idx)
            }
        })
        .unwrap_err();
        assert_eq!(err.index, 2);
    }

    #[test]
    fn fail_fast_cancels_not_yet_started_work() {
        let items: Vec<usize> = (0..50).collect();
        let executed = AtomicUsize::new(0);
        let result = run_batch(&items, 2, FailureMode::FailFast, None, |idx, _| {
            executed.fetch_add(1, Ordering::Relaxed);
            if idx == 0 {
                Err(boom("first"))
            } else {
                std::thread::sleep(Duration::from_millis(20));
                Ok::<usize, io::Error>(idx)
            }
        });
        assert!(result.is_err());
        assert!(executed.load(Ordering::Relaxed) < items.len());
    }

    #[test]
    fn sequential_fail_fast_stops_at_first_failure() {
        let items: Vec<usize> = (0..10).collect();
        let calls = AtomicUsize::new(0);
        let err = run_batch(&items, 1, FailureMode::FailFast, None, |idx, _| {
            calls.fetch_add(1, Ordering::Relaxed);
            if idx == 2 {
                Err(boom("stop"))
            } else {
                Ok::<usize, io::Error>(idx)
            }
        })
        .unwrap_err();
        assert_eq!(err.index, 2);
        assert_eq!(calls.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn empty_batch_is_ok() {
        let items: Vec<usize> = Vec::new();
        let report = run_batch(&items, 4, FailureMode::FailFast, None, |_, item| {
            Ok::<usize, io::Error>(*item)
        })
        .unwrap();
        assert!(report.results.is_empty());
        assert!(report.failures.is_empty());
    }

    #[test]
    fn progress_reports_every_completion() {
        let items: Vec<usize> = (0..5).collect();
        let ticks = std::cell::RefCell::new(Vec::new());
        let progress = |done: usize, total: usize| ticks.borrow_mut().push((done, total));
        run_batch(
            &items,
            3,
            FailureMode::FailFast,
            Some(&progress),
            |idx, _| Ok::<usize, io::Error>(idx),
        )
        .unwrap();
        let ticks = ticks.into_inner();
        assert_eq!(ticks.len(), 5);
        assert!(ticks.iter().all(|(_, total)| *total == 5));
        assert_eq!(ticks.last(), Some(&(5, 5)));
    }
}

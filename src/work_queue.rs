//! Fixed-size worker pool over a finite batch of work items.
//!
//! The queue is pre-loaded with every item before any worker starts; closing
//! the sending side is the end-of-work marker each worker terminates on.
//! [`run`] blocks until every worker has exited, so when it returns, every
//! item has either been processed or abandoned by a failing worker.

/// Process `items` on exactly `concurrency` workers.
///
/// Assignment of items to workers is unspecified; `worker_fn` must be safe to
/// call concurrently for arbitrary items. An error aborts the worker that hit
/// it (its remaining queue share is drained by the others), and `run` reports
/// the first error after all workers have joined. Worker panics are resumed
/// on the caller.
pub fn run<T, F>(concurrency: usize, items: Vec<T>, worker_fn: F) -> anyhow::Result<()>
where
    T: Send,
    F: Fn(T) -> anyhow::Result<()> + Sync,
{
    let (tx, rx) = crossbeam_channel::unbounded();
    for item in items {
        tx.send(item).expect("receiver outlives the send loop");
    }
    drop(tx);

    std::thread::scope(|s| {
        let workers: Vec<_> = (0..concurrency)
            .map(|_| {
                let rx = rx.clone();
                let worker_fn = &worker_fn;
                s.spawn(move || -> anyhow::Result<()> {
                    while let Ok(item) = rx.recv() {
                        worker_fn(item)?;
                    }
                    Ok(())
                })
            })
            .collect();

        let mut result = Ok(());
        for worker in workers {
            match worker.join() {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    if result.is_ok() {
                        result = Err(err);
                    }
                }
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
        result
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn processes_every_item() {
        let sum = AtomicUsize::new(0);
        run(4, (1..=100).collect(), |n: usize| {
            sum.fetch_add(n, Ordering::Relaxed);
            Ok(())
        })
        .unwrap();
        assert_eq!(sum.load(Ordering::Relaxed), 5050);
    }

    #[test]
    fn more_workers_than_items() {
        let seen = Mutex::new(Vec::new());
        run(8, vec!["a", "b"], |s| {
            seen.lock().unwrap().push(s);
            Ok(())
        })
        .unwrap();
        let mut seen = seen.into_inner().unwrap();
        seen.sort();
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        run(4, Vec::<u32>::new(), |_| unreachable!("no items to process")).unwrap();
    }

    #[test]
    fn error_is_reported_after_the_join_barrier() {
        let processed = AtomicUsize::new(0);
        let result = run(2, (0..50).collect(), |n: u32| {
            if n == 7 {
                anyhow::bail!("item {n} is unprocessable");
            }
            processed.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
        let err = result.unwrap_err();
        assert!(err.to_string().contains("unprocessable"), "{err:#}");
        // The surviving worker kept draining the queue.
        assert!(processed.load(Ordering::Relaxed) >= 1);
    }
}

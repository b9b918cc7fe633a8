//! Streaming pipeline primitives.
//!
//! Stages are connected by zero-capacity channels: a hand-off is a rendezvous, the producer blocks until a
//! consumer takes the item and vice versa. A slow stage therefore throttles every stage before it without any
//! explicit flow control.
//!
//! A stream ends when every sender feeding it is gone, which happens exactly once, after the last producer
//! finished. A consumer that stops early simply drops its [`Stream`]: the next send on the other side fails and
//! the producer exits, so shutdown cascades upstream.
//!
//! All threads are spawned in a [`std::thread::Scope`] and are joined when the scope ends.

use std::io;
use std::sync::Arc;
use std::thread::{self, Scope};

use crossbeam_channel as channel;

/// Receiving end of a pipeline stage.
pub type Stream<T> = channel::Receiver<T>;

/// Sending end of a pipeline stage.
pub type Sink<T> = channel::Sender<T>;

/// Creates a rendezvous channel.
pub fn rendezvous<T>() -> (Sink<T>, Stream<T>) {
    channel::bounded(0)
}

fn spawn<'scope, 'env, F>(scope: &'scope Scope<'scope, 'env>, name: String, f: F) -> io::Result<()>
where
    F: FnOnce() + Send + 'scope,
{
    thread::Builder::new().name(name).spawn_scoped(scope, f)?;
    return Ok(());
}

/// Runs `producer` on its own thread and returns the stream it feeds.
/// The stream ends when the producer returns.
pub fn produce<'scope, 'env, T, F>(scope: &'scope Scope<'scope, 'env>, name: &str, producer: F) -> io::Result<Stream<T>>
where
    T: Send + 'scope,
    F: FnOnce(Sink<T>) + Send + 'scope,
{
    let (tx, rx) = rendezvous();
    spawn(scope, name.to_string(), move || producer(tx))?;

    return Ok(rx);
}

/// Streams the items of a collection.
pub fn from_iter<'scope, 'env, I>(scope: &'scope Scope<'scope, 'env>, items: I) -> io::Result<Stream<I::Item>>
where
    I: IntoIterator + Send + 'scope,
    I::Item: Send + 'scope,
{
    produce(scope, "ems-source", move |tx| {
        for item in items {
            if tx.send(item).is_err() {
                return;
            }
        }
    })
}

/// Groups the input into batches of `size` items.
/// The last batch may be shorter; an empty input yields no batches.
pub fn batch<'scope, 'env, T>(
    scope: &'scope Scope<'scope, 'env>,
    size: usize,
    input: Stream<T>,
) -> io::Result<Stream<Vec<T>>>
where
    T: Send + 'scope,
{
    let size = size.max(1);

    produce(scope, "ems-batch", move |tx| {
        let mut group = Vec::with_capacity(size);
        for item in input.iter() {
            group.push(item);
            if group.len() == size {
                let full = std::mem::replace(&mut group, Vec::with_capacity(size));
                if tx.send(full).is_err() {
                    return;
                }
            }
        }

        if !group.is_empty() {
            let _ = tx.send(group);
        }
    })
}

/// Replicates `stage` over `workers` threads.
///
/// All workers pull from the same input, so items are handed out on demand to whichever worker is free.
/// Each worker gets its own output stream; combine them with [`fan_in`].
pub fn fan_out<'scope, 'env, T, U, F>(
    scope: &'scope Scope<'scope, 'env>,
    name: &str,
    workers: usize,
    input: Stream<T>,
    stage: F,
) -> io::Result<Vec<Stream<U>>>
where
    T: Send + 'scope,
    U: Send + 'scope,
    F: Fn(T) -> U + Send + Sync + 'scope,
{
    let stage = Arc::new(stage);
    let workers = workers.max(1);
    let mut outputs = Vec::with_capacity(workers);

    for idx in 0..workers {
        let (tx, rx) = rendezvous();
        let input = input.clone();
        let stage = Arc::clone(&stage);

        spawn(scope, format!("{}-{}", name, idx), move || {
            for item in input.iter() {
                if tx.send(stage(item)).is_err() {
                    return;
                }
            }
        })?;
        outputs.push(rx);
    }

    return Ok(outputs);
}

/// Merges several streams into one. Items are forwarded in the order they become ready;
/// the merged stream ends once every input stream has ended.
pub fn fan_in<'scope, 'env, T>(scope: &'scope Scope<'scope, 'env>, streams: Vec<Stream<T>>) -> io::Result<Stream<T>>
where
    T: Send + 'scope,
{
    let (tx, rx) = rendezvous();

    for (idx, stream) in streams.into_iter().enumerate() {
        let tx = tx.clone();
        spawn(scope, format!("ems-fan-in-{}", idx), move || {
            for item in stream.iter() {
                if tx.send(item).is_err() {
                    return;
                }
            }
        })?;
    }

    return Ok(rx);
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use rstest::*;

    use super::{batch, fan_in, fan_out, from_iter};

    #[rstest]
    #[case(vec![], 2, vec![])]
    #[case(vec![1], 2, vec![vec![1]])]
    #[case(vec![1, 2, 3, 4], 2, vec![vec![1, 2], vec![3, 4]])]
    #[case(vec![1, 2, 3, 4, 5], 2, vec![vec![1, 2], vec![3, 4], vec![5]])]
    #[case(vec![1, 2, 3], 5, vec![vec![1, 2, 3]])]
    fn test_batch(#[case] items: Vec<i32>, #[case] size: usize, #[case] expected: Vec<Vec<i32>>) {
        let actual: Vec<Vec<i32>> = thread::scope(|scope| {
            let input = from_iter(scope, items).unwrap();
            batch(scope, size, input).unwrap().iter().collect()
        });

        assert_eq!(actual, expected);
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(20)]
    fn test_fan_out_fan_in(#[case] workers: usize) {
        let mut actual: Vec<u64> = thread::scope(|scope| {
            let input = from_iter(scope, 0..100u64).unwrap();
            let outputs = fan_out(scope, "test-worker", workers, input, |item| {
                // uneven workload
                thread::sleep(Duration::from_micros(item % 7));
                item * 2
            })
            .unwrap();
            assert_eq!(outputs.len(), workers);

            fan_in(scope, outputs).unwrap().iter().collect()
        });

        actual.sort();
        assert_eq!(actual, Vec::from_iter((0..100u64).map(|item| item * 2)));
    }

    #[rstest]
    fn test_work_is_shared_between_workers() {
        let busy = AtomicUsize::new(0);
        let max_busy = AtomicUsize::new(0);

        let processed = thread::scope(|scope| {
            let input = from_iter(scope, 0..16).unwrap();
            let outputs = fan_out(scope, "test-worker", 4, input, |item: i32| {
                let now = busy.fetch_add(1, Ordering::SeqCst) + 1;
                max_busy.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(5));
                busy.fetch_sub(1, Ordering::SeqCst);
                item
            })
            .unwrap();

            fan_in(scope, outputs).unwrap().iter().count()
        });

        assert_eq!(processed, 16);
        assert!(max_busy.load(Ordering::SeqCst) <= 4);
    }

    #[rstest]
    fn test_fan_in_of_nothing_ends() {
        let actual: Vec<i32> = thread::scope(|scope| fan_in(scope, Vec::new()).unwrap().iter().collect());
        assert!(actual.is_empty());
    }

    #[rstest]
    fn test_early_consumer_exit_stops_producers() {
        let produced = AtomicUsize::new(0);

        thread::scope(|scope| {
            let input = from_iter(scope, 0..1_000_000).unwrap();
            let outputs = fan_out(scope, "test-worker", 4, input, |item: i32| {
                produced.fetch_add(1, Ordering::SeqCst);
                item
            })
            .unwrap();

            let merged = fan_in(scope, outputs).unwrap();
            let first: Vec<i32> = merged.iter().take(10).collect();
            assert_eq!(first.len(), 10);
        });

        assert!(produced.load(Ordering::SeqCst) < 1_000_000);
    }
}

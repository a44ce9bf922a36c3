//! Placement policy: maps each message to a partition index and hands it to
//! a fixed per-partition write function.
//!
//! The active policy lives in a single atomically-swapped cell. Writers
//! publish a fresh configuration; readers load one pointer per call, so a
//! reconfiguration can never produce an index outside the count observed in
//! the same read.

use crate::envelope::{Callback, KeyFn, PartitionWriteFn};
use arc_swap::ArcSwap;
use pageflow_core::hash::partition_for_key;
use pageflow_core::{Error, Result};
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

enum Placement<T> {
    /// Monotonic cursor modulo count; concurrent readers each observe a
    /// unique successive value.
    RoundRobin { count: usize, cursor: AtomicUsize },
    Random { count: usize },
    Key { count: usize, extractor: KeyFn<T> },
}

impl<T> Placement<T> {
    fn pick(&self, payload: &T) -> usize {
        match self {
            Placement::RoundRobin { count, cursor } => {
                cursor.fetch_add(1, Ordering::Relaxed) % count
            }
            Placement::Random { count } => rand::thread_rng().gen_range(0..*count),
            Placement::Key { count, extractor } => partition_for_key(&extractor(payload), *count),
        }
    }
}

/// Pluggable partition selector.
///
/// Starts in round-robin mode over a single partition; `set_*_mode` swaps in
/// a new configuration atomically.
pub struct Partitioner<T> {
    write: PartitionWriteFn<T>,
    placement: ArcSwap<Placement<T>>,
}

impl<T> Partitioner<T> {
    pub fn new(write: PartitionWriteFn<T>) -> Self {
        Self {
            write,
            placement: ArcSwap::from_pointee(Placement::RoundRobin {
                count: 1,
                cursor: AtomicUsize::new(0),
            }),
        }
    }

    /// Pick a partition under the current policy and forward the message.
    pub fn write(
        &self,
        token: &CancellationToken,
        payload: T,
        callback: Option<Callback<T>>,
    ) -> Result<()> {
        let placement = self.placement.load();
        let index = placement.pick(&payload);
        (self.write)(token, index, payload, callback)
    }

    /// Sequential placement over `count` partitions.
    pub fn set_round_robin_mode(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(Error::InvalidCount(count));
        }
        self.placement.store(Arc::new(Placement::RoundRobin {
            count,
            cursor: AtomicUsize::new(0),
        }));
        Ok(())
    }

    /// Uniform random placement over `count` partitions.
    pub fn set_random_mode(&self, count: usize) -> Result<()> {
        if count == 0 {
            return Err(Error::InvalidCount(count));
        }
        self.placement
            .store(Arc::new(Placement::Random { count }));
        Ok(())
    }

    /// Hash-based placement: messages with equal extracted keys always land
    /// on the same partition for a fixed count.
    pub fn set_key_mode(&self, extractor: KeyFn<T>, count: usize) -> Result<()> {
        if count == 0 {
            return Err(Error::InvalidCount(count));
        }
        self.placement
            .store(Arc::new(Placement::Key { count, extractor }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recording_writer(out: Arc<Mutex<Vec<usize>>>) -> PartitionWriteFn<String> {
        Arc::new(move |_, partition, _, _| {
            out.lock().push(partition);
            Ok(())
        })
    }

    #[test]
    fn round_robin_cycles_in_order() {
        let got = Arc::new(Mutex::new(Vec::new()));
        let partitioner = Partitioner::new(recording_writer(Arc::clone(&got)));
        partitioner.set_round_robin_mode(3).unwrap();

        let token = CancellationToken::new();
        for i in 0..6 {
            partitioner
                .write(&token, format!("m{i}"), None)
                .unwrap();
        }

        assert_eq!(*got.lock(), vec![0, 1, 2, 0, 1, 2]);
    }

    #[test]
    fn round_robin_is_fair_under_concurrency() {
        let got = Arc::new(Mutex::new(Vec::new()));
        let partitioner = Arc::new(Partitioner::new(recording_writer(Arc::clone(&got))));
        partitioner.set_round_robin_mode(3).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let partitioner = Arc::clone(&partitioner);
                std::thread::spawn(move || {
                    let token = CancellationToken::new();
                    for _ in 0..75 {
                        partitioner.write(&token, "m".to_string(), None).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut counts = [0usize; 3];
        for &index in got.lock().iter() {
            counts[index] += 1;
        }
        assert_eq!(counts, [100, 100, 100]);
    }

    #[test]
    fn random_mode_stays_in_range() {
        let got = Arc::new(Mutex::new(Vec::new()));
        let partitioner = Partitioner::new(recording_writer(Arc::clone(&got)));
        partitioner.set_random_mode(5).unwrap();

        let token = CancellationToken::new();
        for _ in 0..100 {
            partitioner.write(&token, "m".to_string(), None).unwrap();
        }

        for &index in got.lock().iter() {
            assert!(index < 5);
        }
    }

    #[test]
    fn key_mode_is_stable() {
        let got = Arc::new(Mutex::new(Vec::new()));
        let partitioner = Partitioner::new(recording_writer(Arc::clone(&got)));
        partitioner
            .set_key_mode(Arc::new(|payload: &String| payload.clone()), 10)
            .unwrap();

        let token = CancellationToken::new();
        for _ in 0..10 {
            partitioner
                .write(&token, "same-key".to_string(), None)
                .unwrap();
        }

        let got = got.lock();
        assert!(!got.is_empty());
        assert!(got.iter().all(|&index| index == got[0]));
    }

    #[test]
    fn zero_count_is_rejected() {
        let partitioner: Partitioner<String> = Partitioner::new(Arc::new(|_, _, _, _| Ok(())));

        assert!(matches!(
            partitioner.set_round_robin_mode(0),
            Err(Error::InvalidCount(0))
        ));
        assert!(matches!(
            partitioner.set_random_mode(0),
            Err(Error::InvalidCount(0))
        ));
        assert!(matches!(
            partitioner.set_key_mode(Arc::new(|p: &String| p.clone()), 0),
            Err(Error::InvalidCount(0))
        ));
    }

    #[test]
    fn reconfiguration_never_exceeds_observed_count() {
        let got = Arc::new(Mutex::new(Vec::new()));
        let partitioner = Arc::new(Partitioner::new(recording_writer(Arc::clone(&got))));
        partitioner.set_round_robin_mode(8).unwrap();

        let writer = {
            let partitioner = Arc::clone(&partitioner);
            std::thread::spawn(move || {
                let token = CancellationToken::new();
                for _ in 0..2000 {
                    partitioner.write(&token, "m".to_string(), None).unwrap();
                }
            })
        };

        for count in [3usize, 8, 2, 5] {
            partitioner.set_round_robin_mode(count).unwrap();
        }
        writer.join().unwrap();

        // Every index was computed against the count loaded in the same
        // read, so nothing can exceed the largest configured count.
        assert!(got.lock().iter().all(|&index| index < 8));
    }
}

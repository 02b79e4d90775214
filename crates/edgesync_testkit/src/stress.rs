//! Concurrent stress helpers.
//!
//! Each helper runs worker threads against one backend and reports what
//! they achieved, for tests to check against the expected totals.

use edgesync_core::{apply_stm, AppInstIdStore, RetryConfig, StoreError};
use edgesync_kv::KvStore;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent threads.
    pub threads: usize,
    /// Operations per thread.
    pub ops_per_thread: usize,
    /// Retry settings for each transaction.
    pub retry: RetryConfig,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            ops_per_thread: 50,
            retry: RetryConfig::new(1000)
                .with_initial_delay(Duration::from_micros(20))
                .with_max_delay(Duration::from_millis(1)),
        }
    }
}

fn read_counter(bytes: Option<Vec<u8>>) -> u64 {
    let mut buf = [0u8; 8];
    if let Some(bytes) = bytes {
        if bytes.len() == 8 {
            buf.copy_from_slice(&bytes);
        }
    }
    u64::from_be_bytes(buf)
}

/// Increments `key` from every thread through STM.
///
/// With no lost updates the final counter equals the successful count.
pub fn stress_stm_counter(
    kv: Arc<dyn KvStore>,
    key: &str,
    config: &StressConfig,
) -> (StressTestResult, u64) {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let handles: Vec<_> = (0..config.threads)
        .map(|_| {
            let kv = Arc::clone(&kv);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);
            let key = key.to_string();
            let config = config.clone();

            thread::spawn(move || {
                for _ in 0..config.ops_per_thread {
                    let result = apply_stm(kv.as_ref(), &config.retry, |stm| {
                        let cur = read_counter(stm.get(&key)?);
                        stm.put(key.clone(), (cur + 1).to_be_bytes().to_vec());
                        Ok(())
                    });
                    match result {
                        Ok(_) => successful.fetch_add(1, Ordering::SeqCst),
                        Err(_) => failed.fetch_add(1, Ordering::SeqCst),
                    };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    let result = StressTestResult::new(
        successful.load(Ordering::SeqCst),
        failed.load(Ordering::SeqCst),
        start.elapsed(),
    );
    let total = kv
        .get(key)
        .expect("counter read failed")
        .map(|entry| read_counter(Some(entry.value)))
        .unwrap_or(0);
    (result, total)
}

/// Races `threads` transactions to reserve the same id.
///
/// Each transaction checks the id, then reserves it if free. Returns how
/// many transactions reserved it and how many saw it taken.
pub fn race_id_reservation(kv: Arc<dyn KvStore>, id: &str, threads: usize) -> (usize, usize) {
    let winners = Arc::new(AtomicUsize::new(0));
    let losers = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(threads));
    let retry = StressConfig::default().retry;

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let kv = Arc::clone(&kv);
            let winners = Arc::clone(&winners);
            let losers = Arc::clone(&losers);
            let barrier = Arc::clone(&barrier);
            let id = id.to_string();
            let retry = retry.clone();

            thread::spawn(move || {
                let store = AppInstIdStore;
                barrier.wait();
                let result = apply_stm(kv.as_ref(), &retry, |stm| {
                    if store.stm_has(stm, &id)? {
                        return Err(StoreError::already_exists(id.clone()));
                    }
                    store.stm_put(stm, &id);
                    Ok(())
                });
                match result {
                    Ok(_) => winners.fetch_add(1, Ordering::SeqCst),
                    Err(StoreError::AlreadyExists { .. }) => losers.fetch_add(1, Ordering::SeqCst),
                    Err(err) => panic!("unexpected error: {err}"),
                };
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }
    (winners.load(Ordering::SeqCst), losers.load(Ordering::SeqCst))
}

//! Stress harnesses for the metadata core.
//!
//! These exercise the concurrency contracts: counter preservation under
//! parallel invalidation, and rebuild target selection racing the write
//! path.

use crate::fixtures::{blks, fill_segment, TestCore};
use rand::Rng;
use segmeta_core::{SegmentId, SegmentState};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressResult {
    /// Creates a new result.
    #[must_use]
    pub fn new(total_ops: usize, duration: Duration) -> Self {
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total_ops as f64 / duration.as_secs_f64()
        } else {
            0.0
        };
        Self {
            total_ops,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the run.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of race trials.
    pub trials: usize,
    /// Threads invalidating blocks.
    pub invalidator_threads: usize,
    /// Threads selecting rebuild targets / reading state.
    pub selector_threads: usize,
    /// Maximum random delay injected between racing calls, in nanoseconds.
    pub max_jitter_nanos: u64,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            trials: 100,
            invalidator_threads: 4,
            selector_threads: 2,
            max_jitter_nanos: 100,
        }
    }
}

fn jitter(max_nanos: u64) {
    if max_nanos > 0 {
        let nanos = rand::thread_rng().gen_range(0..max_nanos);
        thread::sleep(Duration::from_nanos(nanos));
    }
}

/// Parallel invalidation of disjoint ranges must lose no updates.
///
/// Fills one segment, then lets `invalidator_threads` threads each
/// invalidate a disjoint quarter of its stripes one block at a time,
/// while `selector_threads` threads hammer state reads and rebuild
/// target selection. Afterwards the segment must be exactly empty and
/// free.
///
/// # Panics
///
/// Panics if a counter was corrupted (the assertion is the test).
pub fn stress_counter_preservation(config: &StressConfig) -> StressResult {
    let core = Arc::new(TestCore::memory());
    let addr = core.address_info();
    let stripes = addr.stripes_per_segment();
    assert!(
        config.invalidator_threads as u32 <= stripes,
        "one stripe per invalidator thread at most"
    );

    fill_segment(&core, 0);
    let per_stripe = addr.blks_per_stripe();
    let ops = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();

    // Each invalidator owns a disjoint set of stripes of segment 0.
    for t in 0..config.invalidator_threads as u32 {
        let core = Arc::clone(&core);
        let ops = Arc::clone(&ops);
        let max_jitter = config.max_jitter_nanos;
        let threads = config.invalidator_threads as u32;
        handles.push(thread::spawn(move || {
            for stripe in (t..stripes).step_by(threads as usize) {
                for offset in 0..per_stripe {
                    jitter(max_jitter);
                    core.invalidate_blks(blks(stripe, offset, 1), false);
                    ops.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }

    for _ in 0..config.selector_threads {
        let core = Arc::clone(&core);
        let ops = Arc::clone(&ops);
        let trials = config.trials;
        let max_jitter = config.max_jitter_nanos;
        handles.push(thread::spawn(move || {
            for _ in 0..trials {
                jitter(max_jitter);
                let _ = core.rebuild_target_segment();
                let _ = core.segment_state(SegmentId::new(0));
                ops.fetch_add(1, Ordering::Relaxed);
            }
        }));
    }

    for handle in handles {
        handle.join().expect("stress thread panicked");
    }

    // Every block was invalidated exactly once: no lost updates.
    assert_eq!(core.valid_block_count(SegmentId::new(0)), 0);
    assert_eq!(core.segment_state(SegmentId::new(0)), SegmentState::Free);
    assert_eq!(core.occupied_stripe_count(SegmentId::new(0)), 0);

    StressResult::new(ops.load(Ordering::Relaxed), start.elapsed())
}

/// Rebuild target selection racing the invalidate path.
///
/// One thread selects rebuild targets while another force-invalidates
/// blocks of the same segments, with random scheduling jitter between
/// them. Counters must drain exactly regardless of interleaving.
///
/// # Panics
///
/// Panics if a counter drifts or a racing thread panics.
pub fn stress_selection_vs_invalidate(config: &StressConfig) -> StressResult {
    let core = Arc::new(TestCore::memory());
    let addr = core.address_info();
    let ops = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    for _ in 0..config.trials {
        fill_segment(&core, 0);
        fill_segment(&core, 1);
        core.make_rebuild_target();

        let selector = {
            let core = Arc::clone(&core);
            let ops = Arc::clone(&ops);
            let max_jitter = config.max_jitter_nanos;
            thread::spawn(move || {
                jitter(max_jitter);
                let mut picked = Vec::new();
                while let Some(segment) = core.rebuild_target_segment() {
                    // A claimed target may still be force-freed by the
                    // racing invalidator; the contract is only that the
                    // race corrupts nothing.
                    let _ = core.segment_state(segment);
                    picked.push(segment);
                    ops.fetch_add(1, Ordering::Relaxed);
                }
                picked
            })
        };

        let invalidator = {
            let core = Arc::clone(&core);
            let ops = Arc::clone(&ops);
            let max_jitter = config.max_jitter_nanos;
            let per_stripe = addr.blks_per_stripe();
            let stripes = addr.stripes_per_segment();
            thread::spawn(move || {
                // Drain segment 0 completely while selection runs.
                for stripe in 0..stripes {
                    jitter(max_jitter);
                    core.invalidate_blks(blks(stripe, 0, per_stripe), true);
                    ops.fetch_add(1, Ordering::Relaxed);
                }
            })
        };

        let picked = selector.join().expect("selector thread panicked");
        invalidator.join().expect("invalidator thread panicked");

        assert_eq!(core.valid_block_count(SegmentId::new(0)), 0);
        assert_eq!(core.valid_block_count(SegmentId::new(1)), addr.blks_per_segment());

        // Restore steady state for the next trial.
        for segment in picked {
            core.complete_rebuild_target(segment);
        }
        core.stop_rebuilding();
        let first = addr.stripes_per_segment();
        for stripe in first..first + addr.stripes_per_segment() {
            core.invalidate_blks(blks(stripe, 0, addr.blks_per_stripe()), true);
        }
    }

    StressResult::new(ops.load(Ordering::Relaxed), start.elapsed())
}

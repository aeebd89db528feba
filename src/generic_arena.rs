//! Instrumented general-purpose pool: tracks current and peak committed
//! bytes and learns the session's peak footprint across runs.

use std::alloc::{self, Layout};
use std::any::Any;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::arena::{Arena, ArenaTelemetry};
use crate::config::Config;
use crate::persistence;
use crate::predictor::Predictor;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    current_usage: u64,
    peak_usage: u64,
}

/// Instrumented pool over the system allocator.
///
/// Counter mutation is serialized under [`Self::counters`]; the allocation
/// and deallocation calls themselves do not hold that lock.
pub struct GenericArena {
    config: Config,
    counters: Mutex<Counters>,
    predictor: Mutex<Predictor>,
}

impl GenericArena {
    pub fn new(config: Config) -> Self {
        let mut predictor = Predictor::new(config.alpha);
        if let Some(bytes) = persistence::load(&config.log_path, &config.secret_key) {
            predictor.restore(bytes);
            info!(predicted_bytes = bytes, "restored predictor state from prior session");
        }

        Self {
            config,
            counters: Mutex::new(Counters::default()),
            predictor: Mutex::new(predictor),
        }
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn usage_snapshot(&self) -> (u64, u64) {
        let counters = self.counters.lock();
        (counters.current_usage, counters.peak_usage)
    }

    pub(crate) fn predicted_bytes(&self) -> u64 {
        self.predictor.lock().predicted_bytes()
    }

    pub(crate) fn predicted_slots(&self) -> u64 {
        self.predictor.lock().predicted_slots()
    }

    pub(crate) fn observe_lag(&self, lag: u64) {
        self.predictor.lock().observe_lag(lag);
    }
}

impl Arena for GenericArena {
    fn allocate(&self, size: usize, align: usize) -> Option<*mut u8> {
        let layout = Layout::from_size_align(size, align).ok()?;
        // SAFETY: layout has a nonzero-checked size/align pair validated above.
        let ptr = if layout.size() == 0 {
            layout.align() as *mut u8
        } else {
            unsafe { alloc::alloc(layout) }
        };
        if ptr.is_null() {
            debug!(size, align, "upstream allocation failed");
            return None;
        }

        let mut counters = self.counters.lock();
        counters.current_usage += size as u64;
        if counters.current_usage > counters.peak_usage {
            counters.peak_usage = counters.current_usage;
        }
        Some(ptr)
    }

    fn deallocate(&self, ptr: *mut u8, size: usize, align: usize) {
        if let Ok(layout) = Layout::from_size_align(size, align) {
            if layout.size() != 0 {
                // SAFETY: caller guarantees ptr/size/align match a prior allocate() call.
                unsafe { alloc::dealloc(ptr, layout) };
            }
        }

        let mut counters = self.counters.lock();
        counters.current_usage = counters.current_usage.saturating_sub(size as u64);
    }

    fn equals(&self, other: &dyn Arena) -> bool {
        match other.as_any().downcast_ref::<Self>() {
            Some(o) => std::ptr::eq(self, o),
            None => false,
        }
    }

    fn reset_learning(&self) {
        self.predictor.lock().reset_bytes();
    }

    fn save_statistics(&self) {
        let peak = self.counters.lock().peak_usage;
        let mut predictor = self.predictor.lock();
        predictor.observe_peak(peak);
        persistence::save(&self.config.log_path, &self.config.secret_key, predictor.predicted_bytes());
    }

    fn telemetry(&self) -> ArenaTelemetry {
        let counters = self.counters.lock();
        let predictor = self.predictor.lock();
        ArenaTelemetry {
            current_usage: counters.current_usage,
            peak_usage: counters.peak_usage,
            predicted_bytes: predictor.predicted_bytes(),
            ring_size: 0,
            ring_occupancy: 0,
            predicted_slots: 0,
            average_throughput_gbs: 0.0,
            is_warmed_up: false,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for GenericArena {
    fn drop(&mut self) {
        self.save_statistics();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Config {
        let dir = tempfile::tempdir().unwrap();
        Config {
            secret_key: "test-key".into(),
            log_path: dir.path().join("session.bin"),
            ..Config::default()
        }
    }

    #[test]
    fn allocate_increments_current_and_peak() {
        let arena = GenericArena::new(config());
        let a = arena.allocate(1 << 20, 8).expect("1 MiB allocation");
        let b = arena.allocate(2 << 20, 8).expect("2 MiB allocation");
        arena.deallocate(a, 1 << 20, 8);

        let (current, peak) = arena.usage_snapshot();
        assert_eq!(current, 2 << 20);
        assert_eq!(peak, 3 << 20);

        arena.deallocate(b, 2 << 20, 8);
    }

    #[test]
    fn peak_never_decreases_across_deallocations() {
        let arena = GenericArena::new(config());
        let a = arena.allocate(1000, 8).unwrap();
        arena.deallocate(a, 1000, 8);
        let (current, peak) = arena.usage_snapshot();
        assert_eq!(current, 0);
        assert_eq!(peak, 1000);
    }

    #[test]
    fn equals_is_identity_only() {
        let a = GenericArena::new(config());
        let b = GenericArena::new(config());
        assert!(a.equals(&a));
        assert!(!a.equals(&b));
    }

    #[test]
    fn reset_learning_clears_predicted_bytes_only() {
        let arena = GenericArena::new(config());
        {
            let mut p = arena.predictor.lock();
            p.observe_peak(500);
        }
        arena.reset_learning();
        assert_eq!(arena.predicted_bytes(), 0);
    }

    #[test]
    fn two_sessions_learn_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("session.bin");

        let cfg_a = Config {
            secret_key: "k".into(),
            log_path: log_path.clone(),
            alpha: 0.5,
            ..Config::default()
        };
        let arena_a = GenericArena::new(cfg_a);
        let ptr = arena_a.allocate(100_000_000, 8).unwrap();
        arena_a.deallocate(ptr, 100_000_000, 8);
        drop(arena_a);

        let cfg_b = Config {
            secret_key: "k".into(),
            log_path: log_path.clone(),
            alpha: 0.5,
            ..Config::default()
        };
        let arena_b = GenericArena::new(cfg_b);
        assert_eq!(arena_b.predicted_bytes(), 100_000_000);

        let ptr = arena_b.allocate(200_000_000, 8).unwrap();
        arena_b.deallocate(ptr, 200_000_000, 8);
        drop(arena_b);

        let cfg_c = Config {
            secret_key: "k".into(),
            log_path,
            alpha: 0.5,
            ..Config::default()
        };
        let arena_c = GenericArena::new(cfg_c);
        let expected = (0.5 * 200_000_000.0 + 0.5 * 100_000_000.0) as u64;
        assert_eq!(arena_c.predicted_bytes(), expected);
    }
}
